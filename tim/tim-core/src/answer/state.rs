//! Answer lifecycle for one task and one set of users.
//!
//! ```text
//! NoAnswer --submit--> Submitted --save--> Saved --grade--> Graded
//!                          ^                 |                 |
//!                          +----resubmit-----+-----------------+
//! ```
//!
//! A submission that is not saved falls back to the state it started from.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Answer;
use crate::error::{Result, TimError};
use crate::plugin::{AnswerResponse, Plugin};
use crate::user::GroupId;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerState {
    NoAnswer,
    Submitted,
    Saved,
    Graded,
}

impl AnswerState {
    /// State implied by existing answers, newest first.
    pub fn of(answers: &[&Answer]) -> Self {
        match answers.first() {
            None => AnswerState::NoAnswer,
            Some(a) if a.last_points_modifier.is_some() => AnswerState::Graded,
            Some(_) => AnswerState::Saved,
        }
    }

    pub fn submit(self) -> Self {
        AnswerState::Submitted
    }

    pub fn save(self) -> Result<Self> {
        match self {
            AnswerState::Submitted => Ok(AnswerState::Saved),
            other => Err(TimError::validation(format!("Cannot save an answer in state {other:?}"))),
        }
    }

    pub fn grade(self) -> Result<Self> {
        match self {
            AnswerState::Saved | AnswerState::Graded => Ok(AnswerState::Graded),
            AnswerState::NoAnswer | AnswerState::Submitted => {
                Err(TimError::validation("There is no saved answer to grade."))
            }
        }
    }
}

/// Options the client sends with a submission.
#[derive(Clone, Debug, Default)]
pub struct SubmitFlags {
    pub should_save: bool,
    pub is_teacher: bool,
    pub save_teacher: bool,
    pub give_custom_points: bool,
    pub custom_points: Option<f64>,
    pub force: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SaveDecision {
    Skip,
    Student {
        points: Option<f64>,
        valid: bool,
        explanation: Option<String>,
        points_given_by: Option<GroupId>,
        points_error: Option<String>,
    },
    Teacher {
        points: Option<f64>,
        points_given_by: GroupId,
    },
}

/// Decide what to store for a plugin response.
///
/// Student saves go through the plugin's validity predicate; invalid
/// answers are still stored but flagged. Teacher saves skip the predicate
/// and attribute the points to `grader`.
pub fn decide(
    plugin: &Plugin,
    flags: &SubmitFlags,
    response: &AnswerResponse,
    old_answers: usize,
    grader: GroupId,
    now: DateTime<Utc>,
) -> SaveDecision {
    if response.save.is_none() {
        return SaveDecision::Skip;
    }
    let mut points = plugin.scale_points(response.points());
    if !flags.is_teacher && flags.should_save {
        let (valid, explanation) = plugin.is_answer_valid(old_answers, &response.tim_info, now);
        let mut points_given_by = None;
        let mut points_error = None;
        if flags.give_custom_points {
            match plugin.validate_points(flags.custom_points) {
                Ok(p) => {
                    points = p;
                    points_given_by = Some(grader);
                }
                Err(e) => points_error = Some(e.to_string()),
            }
        }
        SaveDecision::Student {
            points,
            valid,
            explanation,
            points_given_by,
            points_error,
        }
    } else if flags.save_teacher {
        SaveDecision::Teacher {
            points: flags.custom_points.or(points),
            points_given_by: grader,
        }
    } else {
        SaveDecision::Skip
    }
}
