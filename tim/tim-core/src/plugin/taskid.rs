use std::fmt;

use super::PluginError;
use crate::block::BlockId;

/// Fields that may follow a task name instead of a paragraph hint.
const CUSTOM_FIELDS: [&str; 2] = ["points", "datetime"];

pub fn is_valid_task_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Identifies an answerable plugin instance: `doc_id.task_name`, optionally
/// followed by a paragraph hint and/or a custom field, e.g.
/// `22.palindrome.SSYzvCkQVYRu` or `22.palindrome.points`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub doc_id: Option<BlockId>,
    pub task_name: String,
    pub block_id_hint: Option<String>,
    pub field: Option<String>,
}

impl TaskId {
    pub fn parse(s: &str) -> Result<Self, PluginError> {
        Self::parse_with(s, true, true)
    }

    pub fn parse_with(s: &str, require_doc_id: bool, allow_block_hint: bool) -> Result<Self, PluginError> {
        let pieces: Vec<&str> = s.split('.').collect();
        let (doc_id, rest) = match pieces.as_slice() {
            [task] => {
                if require_doc_id {
                    return Err(PluginError::InvalidTaskId(format!(
                        "The format of task id is invalid. Missing doc id: {s}"
                    )));
                }
                (None, vec![*task])
            }
            [doc, rest @ ..] if rest.len() <= 3 => {
                let doc_id = doc
                    .parse::<BlockId>()
                    .map_err(|_| PluginError::InvalidTaskId(format!("Invalid doc id: {doc}")))?;
                (Some(doc_id), rest.to_vec())
            }
            _ => {
                return Err(PluginError::InvalidTaskId(format!(
                    "The format of task id is invalid: {s}"
                )))
            }
        };
        let task_name = rest[0].to_string();
        if !task_name.is_empty() && !is_valid_task_name(&task_name) {
            return Err(PluginError::InvalidTaskId(
                "Task name can only have characters a-z, 0-9, underscore and hyphen.".to_string(),
            ));
        }
        let mut block_id_hint = None;
        let mut field = None;
        match rest[1..] {
            [] => {}
            [one] if CUSTOM_FIELDS.contains(&one) => field = Some(one.to_string()),
            [one] => block_id_hint = Some(one.to_string()),
            [hint, f] => {
                block_id_hint = Some(hint.to_string());
                field = Some(f.to_string());
            }
            _ => unreachable!(),
        }
        if block_id_hint.is_some() && !allow_block_hint {
            return Err(PluginError::InvalidTaskId(format!(
                "Task id cannot contain a paragraph hint: {s}"
            )));
        }
        if block_id_hint.as_deref() == Some("") {
            return Err(PluginError::InvalidTaskId(format!("Empty paragraph hint: {s}")));
        }
        Ok(Self {
            doc_id,
            task_name,
            block_id_hint,
            field,
        })
    }

    /// `doc_id.task_name`, the key answers are stored under.
    pub fn doc_task(&self) -> String {
        match self.doc_id {
            Some(d) => format!("{d}.{}", self.task_name),
            None => self.task_name.clone(),
        }
    }

    /// `doc_id.task_name.field` when a field is present.
    pub fn extended_or_doc_task(&self) -> String {
        match &self.field {
            Some(f) => format!("{}.{f}", self.doc_task()),
            None => self.doc_task(),
        }
    }

    pub fn is_points_ref(&self) -> bool {
        self.field.as_deref() == Some("points")
    }

    pub fn has_task_name(&self) -> bool {
        !self.task_name.is_empty()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.doc_task())?;
        if let Some(hint) = &self.block_id_hint {
            write!(f, ".{hint}")?;
        }
        if let Some(field) = &self.field {
            write!(f, ".{field}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for TaskId {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskId::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_form() {
        let tid = TaskId::parse("22.palindrome.SSYzvCkQVYRu").unwrap();
        assert_eq!(tid.doc_id, Some(22));
        assert_eq!(tid.task_name, "palindrome");
        assert_eq!(tid.block_id_hint.as_deref(), Some("SSYzvCkQVYRu"));
        assert_eq!(tid.doc_task(), "22.palindrome");
        assert_eq!(tid.to_string(), "22.palindrome.SSYzvCkQVYRu");
    }

    #[test]
    fn display_round_trips() {
        for s in ["1.t", "5.task_1.abcDEF123456", "5.t-2.points", "5.t.abc.points", "7.x.datetime"] {
            assert_eq!(TaskId::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn custom_fields() {
        let tid = TaskId::parse("3.t.points").unwrap();
        assert!(tid.is_points_ref());
        assert_eq!(tid.block_id_hint, None);
        assert_eq!(tid.extended_or_doc_task(), "3.t.points");
    }

    #[test]
    fn invalid_ids() {
        assert!(TaskId::parse("task").is_err());
        assert!(TaskId::parse("x.task").is_err());
        assert!(TaskId::parse("1.t ask").is_err());
        assert!(TaskId::parse("1.t.a.b.c").is_err());
        assert!(TaskId::parse("1.t.").is_err());
        assert!(TaskId::parse_with("1.t.abc", true, false).is_err());
        let tid = TaskId::parse_with("task", false, false).unwrap();
        assert_eq!(tid.doc_id, None);
        assert_eq!(tid.doc_task(), "task");
    }
}
