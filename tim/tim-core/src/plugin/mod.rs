//! Plugins embedded in document paragraphs and the protocol used to talk
//! to the services that implement them.

pub mod client;
pub mod protocol;
pub mod taskid;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::block::BlockId;
use crate::document::{expand_macros, DocParagraph};

pub use client::{render_plugins, HttpPluginClient, PluginClient, PluginRegistry, RenderedPlugin};
pub use protocol::{parse_answer_response, parse_multihtml_response, AnswerCall, AnswerResponse, PluginBlock};
pub use taskid::TaskId;

pub const DEFAULT_CONTENT_FIELD: &str = "c";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PluginError {
    #[error("The plugin response was not a valid JSON string. The response was: {0}")]
    InvalidJson(String),

    #[error("The key \"{0}\" is missing in plugin response.")]
    MissingKey(String),

    #[error("Could not connect to plugin: {0}")]
    Unreachable(String),

    #[error("Plugin does not exist: {0}")]
    UnknownPlugin(String),

    #[error("{0}")]
    InvalidTaskId(String),

    #[error("Task not found in the document: {0}")]
    TaskNotFound(String),

    #[error("Plugin type mismatch: {expected} != {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Invalid plugin markup: {0}")]
    Markup(String),

    #[error("{0}")]
    Points(String),
}

/// A plugin instance resolved from a document paragraph.
#[derive(Clone, Debug, PartialEq)]
pub struct Plugin {
    pub task_id: TaskId,
    pub plugin_type: String,
    pub par_id: String,
    pub values: Map<String, Value>,
}

fn strip_fence(md: &str) -> &str {
    let trimmed = md.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => "",
    };
    body.trim_end().strip_suffix("```").unwrap_or(body)
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

impl Plugin {
    /// Build a plugin from a paragraph carrying a `plugin` attribute. The
    /// paragraph body is YAML markup, optionally wrapped in a code fence.
    pub fn from_paragraph(
        par: &DocParagraph,
        doc_id: BlockId,
        macros: &BTreeMap<String, String>,
    ) -> Result<Self, PluginError> {
        let plugin_type = par
            .plugin_type()
            .ok_or_else(|| PluginError::Markup(format!("paragraph {} is not a plugin", par.id())))?
            .to_string();
        let text = expand_macros(strip_fence(par.md()), macros);
        let values = if text.trim().is_empty() {
            Map::new()
        } else {
            let yaml: serde_yaml::Value =
                serde_yaml::from_str(&text).map_err(|e| PluginError::Markup(e.to_string()))?;
            match serde_json::to_value(yaml).map_err(|e| PluginError::Markup(e.to_string()))? {
                Value::Object(m) => m,
                Value::Null => Map::new(),
                _ => return Err(PluginError::Markup("markup must be a mapping".to_string())),
            }
        };
        Ok(Self {
            task_id: TaskId {
                doc_id: Some(doc_id),
                task_name: par.task_name().unwrap_or_default().to_string(),
                block_id_hint: Some(par.id().to_string()),
                field: None,
            },
            plugin_type,
            par_id: par.id().to_string(),
            values,
        })
    }

    pub fn verify_type(&self, requested: &str) -> Result<(), PluginError> {
        if self.plugin_type != requested {
            return Err(PluginError::TypeMismatch {
                expected: self.plugin_type.clone(),
                actual: requested.to_string(),
            });
        }
        Ok(())
    }

    pub fn markup(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn answer_limit(&self) -> Option<u64> {
        self.values.get("answerLimit").and_then(Value::as_u64)
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.values.get("deadline").and_then(Value::as_str).and_then(parse_time)
    }

    pub fn starttime(&self) -> Option<DateTime<Utc>> {
        self.values.get("starttime").and_then(Value::as_str).and_then(parse_time)
    }

    fn points_rule(&self) -> Option<&Map<String, Value>> {
        self.values.get("pointsRule").and_then(Value::as_object)
    }

    fn rule_f64(&self, key: &str) -> Option<f64> {
        self.points_rule().and_then(|r| r.get(key)).and_then(Value::as_f64)
    }

    /// Multiplier applied to points reported by the plugin. Zero disables
    /// automatic points.
    pub fn points_multiplier(&self) -> f64 {
        self.rule_f64("multiplier").unwrap_or(1.0)
    }

    pub fn max_points(&self) -> Option<f64> {
        self.rule_f64("maxPoints")
    }

    pub fn user_min_points(&self) -> Option<f64> {
        self.rule_f64("allowUserMin")
    }

    pub fn user_max_points(&self) -> Option<f64> {
        self.rule_f64("allowUserMax")
    }

    pub fn content_field_name(&self) -> &str {
        self.values
            .get("contentField")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_CONTENT_FIELD)
    }

    /// Apply the multiplier to plugin-reported points.
    pub fn scale_points(&self, points: Option<f64>) -> Option<f64> {
        let multiplier = self.points_multiplier();
        if multiplier == 0.0 {
            return None;
        }
        points.map(|p| p * multiplier)
    }

    /// Whether a new answer counts, given how many answers already exist.
    /// Returns an explanation when it does not.
    pub fn is_answer_valid(
        &self,
        old_answers: usize,
        tim_info: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> (bool, Option<String>) {
        if let Some(limit) = self.answer_limit() {
            if old_answers as u64 >= limit {
                return (false, Some("You have exceeded the answering limit.".to_string()));
            }
        }
        if let Some(start) = self.starttime() {
            if now < start {
                return (false, Some("You cannot submit answers yet.".to_string()));
            }
        }
        if let Some(deadline) = self.deadline() {
            if now > deadline {
                return (
                    false,
                    Some("The deadline for submitting answers has passed.".to_string()),
                );
            }
        }
        if tim_info.get("notValid").and_then(Value::as_bool) == Some(true) {
            let reason = tim_info
                .get("notValidReason")
                .and_then(Value::as_str)
                .unwrap_or("Answer is not valid.");
            return (false, Some(reason.to_string()));
        }
        (true, None)
    }

    /// Check points a student gives to themselves.
    pub fn validate_points(&self, points: Option<f64>) -> Result<Option<f64>, PluginError> {
        let Some(points) = points else {
            return Ok(None);
        };
        let (Some(min), Some(max)) = (self.user_min_points(), self.user_max_points()) else {
            return Err(PluginError::Points(
                "You cannot give yourself custom points in this task.".to_string(),
            ));
        };
        if points < min || points > max {
            return Err(PluginError::Points(format!(
                "Points must be in range [{min},{max}]"
            )));
        }
        Ok(Some(points))
    }

    /// The `info` object sent with every answer call.
    pub fn get_info(&self, user_names: &[String], old_answers: usize, look_answer: bool, valid: bool) -> Value {
        json!({
            "earlier_answers": old_answers,
            "max_answers": self.answer_limit(),
            "current_user_id": user_names.first(),
            "user_id": user_names.join(";"),
            "look_answer": look_answer,
            "valid": valid,
        })
    }

    /// Task limits reported by the task info route.
    pub fn task_info(&self) -> Value {
        json!({
            "maxPoints": self.max_points(),
            "userMin": self.user_min_points(),
            "userMax": self.user_max_points(),
            "deadline": self.deadline(),
            "starttime": self.starttime(),
            "answerLimit": self.answer_limit(),
            "triesText": self.values.get("triesText").and_then(Value::as_str).unwrap_or("Tries left:"),
            "pointsText": self.values.get("pointsText").and_then(Value::as_str).unwrap_or("Points:"),
        })
    }
}

/// Find the plugin paragraph for `task_id` among `pars`. A paragraph hint,
/// when present and matching, wins over the first paragraph with the name.
pub fn find_plugin<'a>(
    pars: &'a [DocParagraph],
    task_id: &TaskId,
) -> Result<&'a DocParagraph, PluginError> {
    let matching = |p: &&DocParagraph| p.is_plugin() && p.task_name() == Some(task_id.task_name.as_str());
    if let Some(hint) = &task_id.block_id_hint {
        if let Some(par) = pars.iter().filter(matching).find(|p| p.id() == hint) {
            return Ok(par);
        }
    }
    pars.iter()
        .find(matching)
        .ok_or_else(|| PluginError::TaskNotFound(task_id.doc_task()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn plugin_par(task: &str, md: &str) -> DocParagraph {
        let mut attrs = BTreeMap::new();
        attrs.insert("plugin".to_string(), "csPlugin".to_string());
        attrs.insert("taskId".to_string(), task.to_string());
        DocParagraph::new(md, attrs)
    }

    #[test]
    fn parses_fenced_markup_with_macros() {
        let par = plugin_par("t1", "``` {#t1 plugin=\"csPlugin\"}\ntype: python\nheader: \"%%title%%\"\n```");
        let mut macros = BTreeMap::new();
        macros.insert("title".to_string(), "Hello".to_string());
        let plugin = Plugin::from_paragraph(&par, 4, &macros).unwrap();
        assert_eq!(plugin.values["type"], "python");
        assert_eq!(plugin.values["header"], "Hello");
        assert_eq!(plugin.task_id.doc_task(), "4.t1");
        assert!(plugin.verify_type("csPlugin").is_ok());
        assert!(matches!(plugin.verify_type("mcq"), Err(PluginError::TypeMismatch { .. })));
    }

    #[test]
    fn answer_limit_and_deadline() {
        let par = plugin_par("t", "answerLimit: 2\ndeadline: \"2020-01-01 12:00:00\"\n");
        let plugin = Plugin::from_paragraph(&par, 1, &BTreeMap::new()).unwrap();
        let before = "2019-12-31T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(plugin.is_answer_valid(1, &Map::new(), before), (true, None));
        assert!(!plugin.is_answer_valid(2, &Map::new(), before).0);
        let after = plugin.deadline().unwrap() + Duration::seconds(1);
        let (valid, msg) = plugin.is_answer_valid(0, &Map::new(), after);
        assert!(!valid);
        assert_eq!(msg.unwrap(), "The deadline for submitting answers has passed.");
    }

    #[test]
    fn points_rules() {
        let par = plugin_par("t", "pointsRule:\n  multiplier: 2\n  allowUserMin: 0\n  allowUserMax: 5\n");
        let plugin = Plugin::from_paragraph(&par, 1, &BTreeMap::new()).unwrap();
        assert_eq!(plugin.scale_points(Some(1.5)), Some(3.0));
        assert_eq!(plugin.validate_points(Some(5.0)), Ok(Some(5.0)));
        assert!(plugin.validate_points(Some(5.5)).is_err());
        assert_eq!(plugin.validate_points(None), Ok(None));

        let zero = Plugin::from_paragraph(&plugin_par("t", "pointsRule:\n  multiplier: 0\n"), 1, &BTreeMap::new()).unwrap();
        assert_eq!(zero.scale_points(Some(1.0)), None);
        assert!(zero.validate_points(Some(1.0)).is_err());
    }

    #[test]
    fn find_plugin_prefers_hint() {
        let a = plugin_par("t", "");
        let b = plugin_par("t", "x: 1");
        let pars = vec![a.clone(), b.clone()];
        let mut tid = TaskId::parse("1.t").unwrap();
        assert_eq!(find_plugin(&pars, &tid).unwrap().id(), a.id());
        tid.block_id_hint = Some(b.id().to_string());
        assert_eq!(find_plugin(&pars, &tid).unwrap().id(), b.id());
        tid.task_name = "other".into();
        assert_eq!(
            find_plugin(&pars, &tid).unwrap_err(),
            PluginError::TaskNotFound("1.other".into())
        );
    }
}
