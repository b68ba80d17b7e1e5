//! Answer submission.
//!
//! A submission runs in three steps so that no lock is held while the
//! plugin service is working:
//!
//! 1. [`Submission::prepare`] resolves the task and builds the plugin call
//!    under a read lock,
//! 2. the call goes to the plugin service,
//! 3. [`Submission::record`] stores the outcome under a write lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use super::state::{decide, AnswerState, SaveDecision, SubmitFlags};
use super::{AnswerId, NewAnswer};
use crate::access::{has_access, Principal};
use crate::block::AccessType;
use crate::db::TimDb;
use crate::error::{Result, TimError};
use crate::plugin::{parse_answer_response, AnswerCall, AnswerResponse, Plugin, PluginClient, TaskId};
use crate::user::{GroupId, UserId};

fn default_true() -> bool {
    true
}

/// Client options sent with an answer (`abData` in the request body).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOptions {
    #[serde(default = "default_true")]
    pub save_answer: bool,
    /// The answer is made from the teacher view on behalf of `user_id`.
    #[serde(default)]
    pub teacher: bool,
    #[serde(default)]
    pub save_teacher: bool,
    #[serde(default)]
    pub give_custom_points: bool,
    #[serde(default)]
    pub points: Option<f64>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AnswerRequest {
    pub input: Value,
    #[serde(default, rename = "abData")]
    pub options: AnswerOptions,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AnswerResult {
    pub web: Value,
    #[serde(rename = "savedNew")]
    pub saved_new: Option<AnswerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub state: AnswerState,
}

/// A prepared answer call.
#[derive(Debug)]
pub struct Submission {
    pub plugin: Plugin,
    pub call: AnswerCall,
    flags: SubmitFlags,
    users: Vec<UserId>,
    saver: UserId,
    grader: GroupId,
    points_only: Option<Option<f64>>,
}

fn points_from_input(input: &Value) -> Result<Option<f64>> {
    match input.get("points") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| TimError::validation(format!("Invalid points: {s}"))),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(TimError::validation(format!("Invalid points: {other}"))),
    }
}

impl Submission {
    pub fn prepare(
        db: &TimDb,
        principal: &Principal,
        plugin_type: &str,
        task_id: &str,
        req: AnswerRequest,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let tid = TaskId::parse(task_id)?;
        let saver = principal.require_logged_in()?;
        let grader = principal
            .personal_group
            .ok_or_else(|| TimError::access_denied("You have to be logged in to perform this action."))?;
        let (doc_id, plugin) = db.resolve_task(principal, &tid, AccessType::View, now)?;
        plugin.verify_type(plugin_type)?;
        let block = db.require_document(doc_id)?;
        let is_teacher = has_access(principal, block, AccessType::Teacher, now);

        let opts = req.options;
        if (opts.teacher || opts.save_teacher || tid.is_points_ref()) && !is_teacher {
            return Err(TimError::access_denied(
                "Sorry, you don't have permission to teacher this resource.",
            ));
        }
        let should_save = opts.save_answer && tid.has_task_name();
        if (!should_save || opts.teacher) && !has_access(principal, block, AccessType::SeeAnswers, now) {
            return Err(TimError::access_denied(
                "Sorry, you don't have permission to see answers of this task.",
            ));
        }
        let users = match (opts.teacher, opts.user_id) {
            (true, Some(user)) => {
                db.require_user(user)?;
                vec![user]
            }
            _ => vec![saver],
        };

        let flags = SubmitFlags {
            should_save,
            is_teacher: opts.teacher,
            save_teacher: opts.save_teacher,
            give_custom_points: opts.give_custom_points,
            custom_points: opts.points,
            force: opts.force,
        };
        let points_only = if tid.is_points_ref() {
            Some(points_from_input(&req.input)?)
        } else {
            None
        };

        let key = tid.doc_task();
        let previous = db.answers.common_answers(&users, &key);
        let state = previous
            .first()
            .and_then(|a| serde_json::from_str::<Value>(&a.content).ok());
        let user_names: Vec<String> = users
            .iter()
            .filter_map(|u| db.users.user(*u).map(|u| u.name.clone()))
            .collect();
        let (valid, _) = plugin.is_answer_valid(previous.len(), &Default::default(), now);
        let info = plugin.get_info(&user_names, previous.len(), false, valid);
        let call = AnswerCall {
            markup: plugin.markup(),
            state,
            input: req.input,
            task_id: key,
            info,
        };
        Ok(Self {
            plugin,
            call,
            flags,
            users,
            saver,
            grader,
            points_only,
        })
    }

    /// Store the plugin's response.
    pub fn record(self, db: &mut TimDb, response: AnswerResponse, now: DateTime<Utc>) -> Result<AnswerResult> {
        let key = self.call.task_id.clone();
        let previous = db.answers.common_answers(&self.users, &key);
        let prior = AnswerState::of(&previous);
        let old_answers = previous.len();
        let submitted = prior.submit();

        let decision = decide(&self.plugin, &self.flags, &response, old_answers, self.grader, now);
        let content = match &response.save {
            Some(save) => serde_json::to_string(save)?,
            None => String::new(),
        };
        let tags = response.tags();
        let graded = matches!(decision, SaveDecision::Teacher { .. });
        let (new, error) = match decision {
            SaveDecision::Skip => (None, None),
            SaveDecision::Student {
                points,
                valid,
                explanation,
                points_given_by,
                points_error,
            } => (
                Some(NewAnswer {
                    users: self.users.clone(),
                    task_id: key.clone(),
                    content,
                    points,
                    tags,
                    valid,
                    points_given_by,
                    saver: Some(self.saver),
                    force: self.flags.force,
                }),
                explanation.or(points_error),
            ),
            SaveDecision::Teacher {
                points,
                points_given_by,
            } => (
                Some(NewAnswer {
                    users: self.users.clone(),
                    task_id: key.clone(),
                    content,
                    points,
                    tags,
                    valid: true,
                    points_given_by: Some(points_given_by),
                    saver: Some(self.saver),
                    force: self.flags.force,
                }),
                None,
            ),
        };

        let saved_new = match new {
            Some(new) => db.answers.save_answer(new, now),
            None => None,
        };
        let state = match saved_new {
            Some(id) => {
                db.commit()?;
                tracing::info!(answer_id = id, task = %key, graded, "answer saved");
                let saved = submitted.save()?;
                if graded {
                    saved.grade()?
                } else {
                    saved
                }
            }
            None => prior,
        };
        Ok(AnswerResult {
            web: response.web,
            saved_new,
            error,
            state,
        })
    }
}

/// Submit an answer: prepare under a read lock, call the plugin with no
/// lock held, then record under a write lock.
pub async fn submit_answer(
    db: &RwLock<TimDb>,
    client: &dyn PluginClient,
    principal: &Principal,
    plugin_type: &str,
    task_id: &str,
    req: AnswerRequest,
) -> Result<AnswerResult> {
    let submission = {
        let db = db.read().await;
        Submission::prepare(&db, principal, plugin_type, task_id, req, Utc::now())?
    };
    if let Some(points) = submission.points_only {
        let tid = TaskId::parse(task_id)?;
        let mut db = db.write().await;
        let id = db.save_points_ref(principal, &tid, &submission.users, points, Utc::now())?;
        return Ok(AnswerResult {
            web: serde_json::json!({"result": "points saved"}),
            saved_new: Some(id),
            error: None,
            state: AnswerState::Graded,
        });
    }
    let body = serde_json::to_value(&submission.call)?;
    let raw = client.answer(plugin_type, &body).await?;
    let response = parse_answer_response(&raw)?;
    let mut db = db.write().await;
    submission.record(&mut db, response, Utc::now())
}
