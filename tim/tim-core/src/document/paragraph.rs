//! Paragraphs: the immutable unit of document content.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PAR_ID_LEN: usize = 12;

/// Generate a new paragraph id. Ids always start with a letter.
pub fn random_id() -> String {
    let mut rng = rand::thread_rng();
    let first = loop {
        let c = rng.sample(Alphanumeric) as char;
        if c.is_ascii_alphabetic() {
            break c;
        }
    };
    std::iter::once(first)
        .chain((1..PAR_ID_LEN).map(|_| rng.sample(Alphanumeric) as char))
        .collect()
}

/// Content hash over markdown and attributes. The id is not part of the
/// hash, so two versions of one paragraph differ only when content does.
pub fn content_hash(md: &str, attrs: &BTreeMap<String, String>) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(md.as_bytes());
    for (k, v) in attrs {
        hasher.update(&[0]);
        hasher.update(k.as_bytes());
        hasher.update(&[1]);
        hasher.update(v.as_bytes());
    }
    format!("{:08x}", hasher.finalize())
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DocParagraph {
    id: String,
    md: String,
    #[serde(default)]
    attrs: BTreeMap<String, String>,
    hash: String,
}

impl DocParagraph {
    pub fn new(md: impl Into<String>, attrs: BTreeMap<String, String>) -> Self {
        Self::with_id(random_id(), md, attrs)
    }

    pub fn with_id(id: impl Into<String>, md: impl Into<String>, attrs: BTreeMap<String, String>) -> Self {
        let md = md.into();
        let hash = content_hash(&md, &attrs);
        Self {
            id: id.into(),
            md,
            attrs,
            hash,
        }
    }

    /// A new version of this paragraph sharing its id.
    pub fn revise(&self, md: impl Into<String>, attrs: BTreeMap<String, String>) -> Self {
        Self::with_id(self.id.clone(), md, attrs)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn md(&self) -> &str {
        &self.md
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn plugin_type(&self) -> Option<&str> {
        self.attr("plugin")
    }

    pub fn is_plugin(&self) -> bool {
        self.plugin_type().is_some()
    }

    pub fn task_name(&self) -> Option<&str> {
        self.attr("taskId")
    }

    pub fn is_setting(&self) -> bool {
        self.attrs.contains_key("settings")
    }

    pub fn area_start(&self) -> Option<&str> {
        self.attr("area")
    }

    pub fn area_end(&self) -> Option<&str> {
        self.attr("area_end")
    }

    /// Copy of this paragraph with `%%name%%` macros substituted. The hash
    /// still refers to the stored version.
    pub fn expanded(&self, macros: &BTreeMap<String, String>) -> Self {
        Self {
            md: expand_macros(&self.md, macros),
            ..self.clone()
        }
    }
}

/// Replace each `%%name%%` whose name is a known macro. Unknown names are
/// left untouched.
pub fn expand_macros(md: &str, macros: &BTreeMap<String, String>) -> String {
    if macros.is_empty() || !md.contains("%%") {
        return md.to_string();
    }
    let mut out = String::with_capacity(md.len());
    let mut rest = md;
    while let Some(start) = rest.find("%%") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("%%") {
            Some(end) => {
                let name = after[..end].trim();
                match macros.get(name) {
                    Some(value) => {
                        out.push_str(value);
                        rest = &after[end + 2..];
                    }
                    None => {
                        out.push_str("%%");
                        rest = after;
                    }
                }
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn ids_are_alphanumeric_and_start_with_letter() {
        for _ in 0..50 {
            let id = random_id();
            assert_eq!(id.len(), PAR_ID_LEN);
            assert!(id.chars().next().unwrap().is_ascii_alphabetic());
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn revision_keeps_id_and_changes_hash() {
        let par = DocParagraph::new("hello", BTreeMap::new());
        let rev = par.revise("hello world", BTreeMap::new());
        assert_eq!(par.id(), rev.id());
        assert_ne!(par.hash(), rev.hash());
        let same = par.revise("hello", BTreeMap::new());
        assert_eq!(par.hash(), same.hash());
    }

    #[test]
    fn attributes_affect_hash() {
        let a = DocParagraph::new("x", attrs(&[("plugin", "csPlugin")]));
        let b = DocParagraph::new("x", attrs(&[("plugin", "mcq")]));
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.plugin_type(), Some("csPlugin"));
        assert!(!a.is_setting());
    }

    #[test]
    fn macros_expand_known_names_only() {
        let macros = attrs(&[("course", "ohj1"), ("year", "2024")]);
        assert_eq!(expand_macros("%%course%% %%year%%!", &macros), "ohj1 2024!");
        assert_eq!(expand_macros("%%unknown%% %%course%%", &macros), "%%unknown%% ohj1");
        assert_eq!(expand_macros("100%% sure", &macros), "100%% sure");
    }
}
