use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::paragraph::DocParagraph;
use crate::error::{Result, TimError};

pub const DEFAULT_PREAMBLE: &str = "preamble";

/// Document settings parsed from the leading `settings` paragraphs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocSettings {
    values: Map<String, Value>,
}

impl DocSettings {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let yaml: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| TimError::validation(format!("Invalid settings: {e}")))?;
        match serde_json::to_value(yaml)? {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::default()),
            _ => Err(TimError::validation("Invalid settings: expected a mapping")),
        }
    }

    /// Settings from the contiguous run of setting paragraphs at the start
    /// of `pars`. Later paragraphs override earlier ones.
    pub fn from_paragraphs<'a>(pars: impl IntoIterator<Item = &'a DocParagraph>) -> Result<Self> {
        let mut settings = Self::default();
        for par in pars.into_iter().take_while(|p| p.is_setting()) {
            settings = settings.merged(&Self::from_yaml(par.md())?);
        }
        Ok(settings)
    }

    /// Overlay `other` on top of `self`. The `macros` map is merged key by
    /// key; all other keys are replaced.
    pub fn merged(&self, other: &DocSettings) -> DocSettings {
        let mut values = self.values.clone();
        for (k, v) in &other.values {
            match (values.get_mut(k), v) {
                (Some(Value::Object(base)), Value::Object(over)) if k == "macros" => {
                    for (mk, mv) in over {
                        base.insert(mk.clone(), mv.clone());
                    }
                }
                _ => {
                    values.insert(k.clone(), v.clone());
                }
            }
        }
        DocSettings { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn preamble(&self) -> &str {
        self.values
            .get("preamble")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PREAMBLE)
    }

    pub fn macros(&self) -> BTreeMap<String, String> {
        let Some(Value::Object(m)) = self.values.get("macros") else {
            return BTreeMap::new();
        };
        m.iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect()
    }
}
