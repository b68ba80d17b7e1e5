//! Folder and document paths.
//!
//! Items live in a slash-separated namespace. The root folder ("") has no
//! block of its own; everything below it maps a path to a block id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::block::BlockId;
use crate::error::{Result, TimError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Folder,
    Document,
}

impl ItemKind {
    fn noun(self) -> &'static str {
        match self {
            ItemKind::Folder => "folder",
            ItemKind::Document => "document",
        }
    }
}

/// Validate a full item path.
///
/// Rejects empty segments, purely numeric paths (they would be confused
/// with document ids) and characters other than ASCII letters, digits,
/// underscores and dashes.
pub fn validate_item_path(path: &str, kind: ItemKind) -> Result<()> {
    let noun = kind.noun();
    if path.split('/').any(str::is_empty) {
        return Err(TimError::validation(format!(
            "The {noun} path cannot have empty parts."
        )));
    }
    if path.chars().all(|c| c.is_ascii_digit() || c == '/') {
        return Err(TimError::validation(format!(
            "The {noun} path can not be a number to avoid confusion with document id."
        )));
    }
    let valid = path
        .split('/')
        .all(|part| part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    if !valid {
        return Err(TimError::validation(format!(
            "The {noun} path has invalid characters. Only letters, numbers, underscores and dashes are allowed."
        )));
    }
    Ok(())
}

/// Split `a/b/c` into (`a/b`, `c`). Top-level items have location "".
pub fn split_location(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

pub fn join_location(location: &str, name: &str) -> String {
    if location.is_empty() {
        name.to_string()
    } else {
        format!("{location}/{name}")
    }
}

/// Turn an arbitrary user name into a valid path segment.
pub fn sanitize_segment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Ancestor folder paths of `path`, nearest first, ending with "".
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = path;
    while !current.is_empty() {
        current = split_location(current).0;
        out.push(current);
    }
    out
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ItemIndex {
    folders: BTreeMap<String, BlockId>,
    documents: BTreeMap<String, BlockId>,
}

impl ItemIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folder(&self, path: &str) -> Option<BlockId> {
        self.folders.get(path).copied()
    }

    pub fn document(&self, path: &str) -> Option<BlockId> {
        self.documents.get(path).copied()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.folders.contains_key(path) || self.documents.contains_key(path)
    }

    /// Resolve a document path, or a numeric document id when
    /// `fallback_to_id` is set.
    pub fn find_document(&self, path: &str, fallback_to_id: bool) -> Option<BlockId> {
        if let Some(id) = self.document(path) {
            return Some(id);
        }
        if fallback_to_id {
            if let Ok(id) = path.parse::<BlockId>() {
                if self.documents.values().any(|d| *d == id) {
                    return Some(id);
                }
            }
        }
        None
    }

    pub fn insert(&mut self, path: &str, kind: ItemKind, id: BlockId) {
        match kind {
            ItemKind::Folder => self.folders.insert(path.to_string(), id),
            ItemKind::Document => self.documents.insert(path.to_string(), id),
        };
    }

    pub fn path_of(&self, id: BlockId) -> Option<(&str, ItemKind)> {
        if let Some((p, _)) = self.folders.iter().find(|(_, v)| **v == id) {
            return Some((p.as_str(), ItemKind::Folder));
        }
        self.documents
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(p, _)| (p.as_str(), ItemKind::Document))
    }

    /// Items directly inside `folder`.
    pub fn children(&self, folder: &str) -> Vec<(String, ItemKind, BlockId)> {
        let folders = self
            .folders
            .iter()
            .map(|(p, id)| (p, ItemKind::Folder, *id));
        let docs = self
            .documents
            .iter()
            .map(|(p, id)| (p, ItemKind::Document, *id));
        folders
            .chain(docs)
            .filter(|(p, _, _)| split_location(p).0 == folder)
            .map(|(p, k, id)| (p.clone(), k, id))
            .collect()
    }

    /// Every item strictly below `folder`.
    pub fn descendants(&self, folder: &str) -> Vec<(String, ItemKind, BlockId)> {
        let prefix = format!("{folder}/");
        let folders = self
            .folders
            .iter()
            .map(|(p, id)| (p, ItemKind::Folder, *id));
        let docs = self
            .documents
            .iter()
            .map(|(p, id)| (p, ItemKind::Document, *id));
        folders
            .chain(docs)
            .filter(|(p, _, _)| p.starts_with(&prefix))
            .map(|(p, k, id)| (p.clone(), k, id))
            .collect()
    }

    pub fn remove(&mut self, path: &str) {
        self.folders.remove(path);
        self.documents.remove(path);
    }

    /// Move an item and everything below it to `new_path`.
    pub fn rename(&mut self, old_path: &str, new_path: &str) {
        let prefix = format!("{old_path}/");
        for map in [&mut self.folders, &mut self.documents] {
            let moved: Vec<(String, BlockId)> = map
                .iter()
                .filter(|(p, _)| p.as_str() == old_path || p.starts_with(&prefix))
                .map(|(p, id)| (p.clone(), *id))
                .collect();
            for (path, id) in moved {
                map.remove(&path);
                let renamed = format!("{new_path}{}", &path[old_path.len()..]);
                map.insert(renamed, id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_parts() {
        for p in ["", "users//test", "/test", "test/"] {
            let err = validate_item_path(p, ItemKind::Folder).unwrap_err();
            assert_eq!(err.to_string(), "The folder path cannot have empty parts.");
        }
    }

    #[test]
    fn rejects_numeric_paths() {
        let err = validate_item_path("1234", ItemKind::Folder).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The folder path can not be a number to avoid confusion with document id."
        );
        assert!(validate_item_path("users/1234", ItemKind::Document).is_ok());
    }

    #[test]
    fn rejects_invalid_characters() {
        for c in ["ä", "å", ".", " ", "#", "@", "\\", "é"] {
            let path = format!("users/test{c}");
            let err = validate_item_path(&path, ItemKind::Folder).unwrap_err();
            assert!(err.to_string().contains("invalid characters"), "{path}");
        }
        assert!(validate_item_path("users/test_user-1", ItemKind::Folder).is_ok());
    }

    #[test]
    fn rename_moves_descendants() {
        let mut index = ItemIndex::new();
        index.insert("a", ItemKind::Folder, 1);
        index.insert("a/b", ItemKind::Folder, 2);
        index.insert("a/b/doc", ItemKind::Document, 3);
        index.insert("ab", ItemKind::Folder, 4);
        index.rename("a", "x/a");
        assert_eq!(index.folder("x/a"), Some(1));
        assert_eq!(index.folder("x/a/b"), Some(2));
        assert_eq!(index.document("x/a/b/doc"), Some(3));
        assert_eq!(index.folder("ab"), Some(4));
        assert!(!index.exists("a"));
    }

    #[test]
    fn location_helpers() {
        assert_eq!(split_location("a/b/c"), ("a/b", "c"));
        assert_eq!(split_location("c"), ("", "c"));
        assert_eq!(ancestors("a/b/c"), vec!["a/b", "a", ""]);
        assert_eq!(join_location("", "x"), "x");
        assert_eq!(sanitize_segment("john.doe"), "john-doe");
    }
}
