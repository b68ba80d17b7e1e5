//! Stored answers and grading.

pub mod state;
pub mod submit;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::block::BlockId;
use crate::error::{Result, TimError};
use crate::plugin::taskid::is_valid_task_name;
use crate::user::{GroupId, UserId};

pub use state::AnswerState;

pub type AnswerId = i64;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub id: AnswerId,
    /// `doc_id.task_name`
    pub task_id: String,
    pub content: String,
    pub points: Option<f64>,
    pub valid: bool,
    pub answered_on: DateTime<Utc>,
    pub users: Vec<UserId>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub saver: Option<UserId>,
    pub last_points_modifier: Option<GroupId>,
}

impl Answer {
    pub fn has_user(&self, user: UserId) -> bool {
        self.users.contains(&user)
    }
}

/// Fields of an answer about to be stored.
#[derive(Clone, Debug)]
pub struct NewAnswer {
    pub users: Vec<UserId>,
    pub task_id: String,
    pub content: String,
    pub points: Option<f64>,
    pub tags: Vec<String>,
    pub valid: bool,
    pub points_given_by: Option<GroupId>,
    pub saver: Option<UserId>,
    /// Store even if identical to the latest answer.
    pub force: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RenameOutcome {
    pub modified: usize,
    pub conflicts: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AnswerStore {
    answers: BTreeMap<AnswerId, Answer>,
    next_id: AnswerId,
}

impl AnswerStore {
    pub fn new() -> Self {
        Self {
            answers: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn get(&self, id: AnswerId) -> Option<&Answer> {
        self.answers.get(&id)
    }

    pub fn require(&self, id: AnswerId) -> Result<&Answer> {
        self.answers
            .get(&id)
            .ok_or_else(|| TimError::not_found(format!("Answer not found: {id}")))
    }

    /// Store an answer unless it repeats the newest common answer of the same
    /// users verbatim. Returns the id of the new row.
    pub fn save_answer(&mut self, new: NewAnswer, now: DateTime<Utc>) -> Option<AnswerId> {
        if !new.force {
            if let Some(latest) = self.common_answers(&new.users, &new.task_id).first() {
                if latest.content == new.content && latest.points == new.points {
                    return None;
                }
            }
        }
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        let mut users = new.users;
        users.sort_unstable();
        users.dedup();
        self.answers.insert(
            id,
            Answer {
                id,
                task_id: new.task_id,
                content: new.content,
                points: new.points,
                valid: new.valid,
                answered_on: now,
                users,
                tags: new.tags,
                saver: new.saver,
                last_points_modifier: new.points_given_by,
            },
        );
        Some(id)
    }

    /// Answers to `task_id` shared by all of `users`, newest first.
    pub fn common_answers(&self, users: &[UserId], task_id: &str) -> Vec<&Answer> {
        self.answers
            .values()
            .rev()
            .filter(|a| a.task_id == task_id)
            .filter(|a| users.iter().all(|u| a.has_user(*u)))
            .collect()
    }

    /// All answers of one user to a task, newest first.
    pub fn answers_for_user(&self, user: UserId, task_id: &str) -> Vec<&Answer> {
        self.common_answers(&[user], task_id)
    }

    pub fn set_points(&mut self, id: AnswerId, points: Option<f64>, modifier: GroupId) -> Result<()> {
        let answer = self
            .answers
            .get_mut(&id)
            .ok_or_else(|| TimError::not_found(format!("Answer not found: {id}")))?;
        answer.points = points;
        answer.last_points_modifier = Some(modifier);
        Ok(())
    }

    /// Users who have answered `task_id`.
    pub fn users_for_task(&self, task_id: &str) -> BTreeSet<UserId> {
        self.answers
            .values()
            .filter(|a| a.task_id == task_id)
            .flat_map(|a| a.users.iter().copied())
            .collect()
    }

    pub fn count_for_task(&self, task_id: &str) -> usize {
        self.answers.values().filter(|a| a.task_id == task_id).count()
    }

    /// Move every answer of `doc_id.old` to `doc_id.new`. Existing answers
    /// under the new name are conflicts; they block the rename unless
    /// `force` is set.
    pub fn rename_task(&mut self, doc_id: BlockId, old: &str, new: &str, force: bool) -> Result<RenameOutcome> {
        for name in [old, new] {
            if !is_valid_task_name(name) {
                return Err(TimError::validation(format!("Invalid task name: {name}")));
            }
        }
        let old_id = format!("{doc_id}.{old}");
        let new_id = format!("{doc_id}.{new}");
        let conflicts = self.count_for_task(&new_id);
        if conflicts > 0 && !force {
            return Err(TimError::Conflict(format!(
                "The new name conflicts with {conflicts} other answers with the same task name."
            )));
        }
        let mut modified = 0;
        for answer in self.answers.values_mut().filter(|a| a.task_id == old_id) {
            answer.task_id = new_id.clone();
            modified += 1;
        }
        Ok(RenameOutcome { modified, conflicts })
    }
}
