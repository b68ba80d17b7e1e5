use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::TimDb;
use crate::access::{has_access, verify_access, Principal};
use crate::answer::{Answer, AnswerId, NewAnswer, RenameOutcome};
use crate::block::{AccessType, BlockId};
use crate::error::{Result, TimError};
use crate::plugin::protocol::{HtmlCall, PluginBlock};
use crate::plugin::{find_plugin, Plugin, PluginError, TaskId};
use crate::user::UserId;

/// A user who has answered a task, with answer statistics.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TaskUser {
    pub id: UserId,
    pub name: String,
    pub real_name: Option<String>,
    pub answer_count: usize,
    /// Points of the newest answer.
    pub latest_points: Option<f64>,
}

impl TimDb {
    /// Resolve `task_id` to its plugin after checking `access` on the
    /// owning document.
    pub fn resolve_task(
        &self,
        principal: &Principal,
        task_id: &TaskId,
        access: AccessType,
        now: DateTime<Utc>,
    ) -> Result<(BlockId, Plugin)> {
        let doc_id = task_id
            .doc_id
            .ok_or_else(|| PluginError::InvalidTaskId(format!("Missing doc id: {task_id}")))?;
        verify_access(principal, self.require_document(doc_id)?, access, now)?;
        let cascade = self.cascade(principal, doc_id, now)?;
        let pars = self.docs.paragraphs(doc_id)?;
        let par = find_plugin(&pars, task_id)?;
        let mut plugin = Plugin::from_paragraph(par, doc_id, &cascade.macros())?;
        plugin.task_id.field = task_id.field.clone();
        Ok((doc_id, plugin))
    }

    /// Answers of `user_id` to a task, newest first. Reading someone
    /// else's answers requires `see_answers`.
    pub fn get_answers(
        &self,
        principal: &Principal,
        task_id: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Answer>> {
        let tid = TaskId::parse(task_id)?;
        let doc_id = tid
            .doc_id
            .ok_or_else(|| PluginError::InvalidTaskId(format!("Missing doc id: {task_id}")))?;
        let block = self.require_document(doc_id)?;
        if principal.user_id == Some(user_id) {
            verify_access(principal, block, AccessType::View, now)?;
        } else {
            verify_access(principal, block, AccessType::SeeAnswers, now)?;
        }
        self.require_user(user_id)?;
        Ok(self
            .answers
            .answers_for_user(user_id, &tid.doc_task())
            .into_iter()
            .cloned()
            .collect())
    }

    /// Set the points of an answer. Teachers may set any points; a user
    /// may set points on their own answer within the task's allowed range.
    pub fn save_points(
        &mut self,
        principal: &Principal,
        user_id: UserId,
        answer_id: AnswerId,
        points: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let answer = self.answers.require(answer_id)?;
        if !answer.has_user(user_id) {
            return Err(TimError::validation(
                "Trying to modify an answer that is not of this user",
            ));
        }
        let tid = TaskId::parse(&answer.task_id)?;
        let grader = principal
            .personal_group
            .ok_or_else(|| TimError::access_denied("You have to be logged in to perform this action."))?;
        let doc_id = tid
            .doc_id
            .ok_or_else(|| PluginError::InvalidTaskId(answer.task_id.clone()))?;
        let is_teacher = has_access(principal, self.require_document(doc_id)?, AccessType::Teacher, now);
        let points = if is_teacher {
            points
        } else if principal.user_id == Some(user_id) {
            let (_, plugin) = self.resolve_task(principal, &tid, AccessType::View, now)?;
            plugin.validate_points(points)?
        } else {
            return Err(TimError::access_denied(
                "Sorry, you don't have permission to teacher this resource.",
            ));
        };
        self.answers.set_points(answer_id, points, grader)?;
        self.commit()?;
        tracing::info!(answer_id, ?points, grader, "points saved");
        Ok(())
    }

    /// Points for a `doc.task.points` reference: updates the newest answer
    /// of `users`, or stores an empty answer carrying the points.
    pub fn save_points_ref(
        &mut self,
        principal: &Principal,
        tid: &TaskId,
        users: &[UserId],
        points: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<AnswerId> {
        self.resolve_task(principal, tid, AccessType::Teacher, now)?;
        let grader = principal
            .personal_group
            .ok_or_else(|| TimError::access_denied("You have to be logged in to perform this action."))?;
        let key = tid.doc_task();
        let latest = self.answers.common_answers(users, &key).first().map(|a| a.id);
        let id = match latest {
            Some(id) => {
                self.answers.set_points(id, points, grader)?;
                id
            }
            None => self
                .answers
                .save_answer(
                    NewAnswer {
                        users: users.to_vec(),
                        task_id: key,
                        content: "{}".to_string(),
                        points,
                        tags: Vec::new(),
                        valid: true,
                        points_given_by: Some(grader),
                        saver: principal.user_id,
                        force: true,
                    },
                    now,
                )
                .ok_or_else(|| TimError::Storage("answer was not stored".to_string()))?,
        };
        self.commit()?;
        Ok(id)
    }

    /// Users who have answered the task.
    pub fn task_users(&self, principal: &Principal, task_id: &str, now: DateTime<Utc>) -> Result<Vec<TaskUser>> {
        let tid = TaskId::parse(task_id)?;
        let doc_id = tid
            .doc_id
            .ok_or_else(|| PluginError::InvalidTaskId(format!("Missing doc id: {task_id}")))?;
        verify_access(principal, self.require_document(doc_id)?, AccessType::SeeAnswers, now)?;
        let key = tid.doc_task();
        Ok(self
            .answers
            .users_for_task(&key)
            .into_iter()
            .filter_map(|id| self.users.user(id))
            .map(|u| {
                let answers = self.answers.answers_for_user(u.id, &key);
                TaskUser {
                    id: u.id,
                    name: u.name.clone(),
                    real_name: u.real_name.clone(),
                    answer_count: answers.len(),
                    latest_points: answers.first().and_then(|a| a.points),
                }
            })
            .collect())
    }

    pub fn task_info(&self, principal: &Principal, task_id: &str, now: DateTime<Utc>) -> Result<Value> {
        let tid = TaskId::parse(task_id)?;
        let (_, plugin) = self.resolve_task(principal, &tid, AccessType::View, now)?;
        Ok(plugin.task_info())
    }

    /// Build the html request for a task, with the caller's latest answer
    /// as the plugin state. Returns the plugin type alongside the call.
    pub fn html_call(&self, principal: &Principal, task_id: &str, now: DateTime<Utc>) -> Result<(String, HtmlCall)> {
        let tid = TaskId::parse(task_id)?;
        let (_, plugin) = self.resolve_task(principal, &tid, AccessType::View, now)?;
        let key = tid.doc_task();
        let call = HtmlCall {
            markup: plugin.markup(),
            state: self.latest_state(principal, &key),
            task_id: key,
        };
        Ok((plugin.plugin_type, call))
    }

    /// Html requests for every plugin paragraph of a document, in
    /// document order.
    pub fn plugin_blocks(&self, principal: &Principal, doc_id: BlockId, now: DateTime<Utc>) -> Result<Vec<PluginBlock>> {
        verify_access(principal, self.require_document(doc_id)?, AccessType::View, now)?;
        let macros = self.cascade(principal, doc_id, now)?.macros();
        let pars = self.docs.paragraphs(doc_id)?;
        let mut blocks = Vec::new();
        for par in pars.iter().filter(|p| p.is_plugin()) {
            let plugin = Plugin::from_paragraph(par, doc_id, &macros)?;
            let key = plugin.task_id.doc_task();
            blocks.push(PluginBlock {
                par_id: par.id().to_string(),
                call: HtmlCall {
                    markup: plugin.markup(),
                    state: self.latest_state(principal, &key),
                    task_id: key,
                },
                plugin_type: plugin.plugin_type,
            });
        }
        Ok(blocks)
    }

    fn latest_state(&self, principal: &Principal, key: &str) -> Option<Value> {
        let user = principal.user_id?;
        self.answers
            .answers_for_user(user, key)
            .first()
            .and_then(|a| serde_json::from_str(&a.content).ok())
    }

    /// Rename the task `old` to `new` in the answers of the document at
    /// `doc_path` (a path or a numeric id).
    pub fn rename_answers(
        &mut self,
        principal: &Principal,
        old: &str,
        new: &str,
        doc_path: &str,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<RenameOutcome> {
        let doc_id = self
            .items
            .find_document(doc_path, true)
            .ok_or_else(|| TimError::not_found("Document not found"))?;
        verify_access(principal, self.require_document(doc_id)?, AccessType::Manage, now)?;
        let outcome = self.answers.rename_task(doc_id, old, new, force)?;
        self.commit()?;
        tracing::info!(doc_id, old, new, modified = outcome.modified, "answers renamed");
        Ok(outcome)
    }
}
