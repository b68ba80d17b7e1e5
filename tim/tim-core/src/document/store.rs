//! Filesystem-backed document store.
//!
//! A document is an ordered list of `(par_id, hash)` references plus a
//! version and changelog. Paragraph versions are content-addressed and
//! written once under `pars/<doc>/<par>/<hash>.json`; they are never
//! rewritten, so any earlier version stays readable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::paragraph::DocParagraph;
use crate::block::BlockId;
use crate::error::{Result, TimError};
use crate::user::GroupId;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    fn bump(self, op: Operation) -> Self {
        match op {
            Operation::Modify => Version {
                major: self.major,
                minor: self.minor + 1,
            },
            _ => Version {
                major: self.major + 1,
                minor: 0,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Modify,
    Delete,
    Move,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ParRef {
    pub id: String,
    pub hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub version: Version,
    pub op: Operation,
    pub par_id: String,
    pub group_id: GroupId,
    pub time: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    id: BlockId,
    version: Version,
    pars: Vec<ParRef>,
    changelog: Vec<ChangelogEntry>,
}

impl Document {
    fn new(id: BlockId) -> Self {
        Self {
            id,
            version: Version::default(),
            pars: Vec::new(),
            changelog: Vec::new(),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn par_refs(&self) -> &[ParRef] {
        &self.pars
    }

    pub fn changelog(&self) -> &[ChangelogEntry] {
        &self.changelog
    }

    fn position(&self, par_id: &str) -> Result<usize> {
        self.pars
            .iter()
            .position(|p| p.id == par_id)
            .ok_or_else(|| TimError::not_found(format!("Paragraph {par_id} not found")))
    }

    fn record(&mut self, op: Operation, par_id: &str, group_id: GroupId, now: DateTime<Utc>) {
        self.version = self.version.bump(op);
        self.changelog.push(ChangelogEntry {
            version: self.version,
            op,
            par_id: par_id.to_string(),
            group_id,
            time: now,
        });
    }
}

pub struct DocumentStore {
    dir: PathBuf,
    docs: HashMap<BlockId, Document>,
    pars: HashMap<(BlockId, String, String), DocParagraph>,
}

impl DocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join("docs"))?;
        std::fs::create_dir_all(dir.join("pars"))?;
        let mut store = Self {
            dir,
            docs: HashMap::new(),
            pars: HashMap::new(),
        };
        store.reload()?;
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    /// Drop in-memory state and read everything back from disk.
    pub fn reload(&mut self) -> Result<()> {
        self.docs.clear();
        self.pars.clear();
        for entry in std::fs::read_dir(self.dir.join("docs"))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let doc: Document = serde_json::from_slice(&std::fs::read(&path)?)?;
            for r in doc.pars.clone() {
                let par = self.read_par(doc.id, &r.id, &r.hash)?;
                self.pars.insert((doc.id, r.id, r.hash), par);
            }
            self.docs.insert(doc.id, doc);
        }
        Ok(())
    }

    fn doc_path(&self, id: BlockId) -> PathBuf {
        self.dir.join("docs").join(format!("{id}.json"))
    }

    fn par_path(&self, doc_id: BlockId, par_id: &str, hash: &str) -> PathBuf {
        self.dir
            .join("pars")
            .join(doc_id.to_string())
            .join(par_id)
            .join(format!("{hash}.json"))
    }

    fn read_par(&self, doc_id: BlockId, par_id: &str, hash: &str) -> Result<DocParagraph> {
        let path = self.par_path(doc_id, par_id, hash);
        let bytes = std::fs::read(&path).map_err(|e| {
            TimError::Storage(format!("paragraph {doc_id}/{par_id}/{hash} unreadable: {e}"))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_par(&self, doc_id: BlockId, par: &DocParagraph) -> Result<()> {
        let path = self.par_path(doc_id, par.id(), par.hash());
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(par)?)?;
        Ok(())
    }

    fn save(&self, id: BlockId) -> Result<()> {
        if let Some(doc) = self.docs.get(&id) {
            std::fs::write(self.doc_path(id), serde_json::to_vec_pretty(doc)?)?;
        }
        Ok(())
    }

    pub fn create(&mut self, id: BlockId) -> Result<&Document> {
        if self.docs.contains_key(&id) {
            return Err(TimError::Storage(format!("document {id} already exists")));
        }
        self.docs.insert(id, Document::new(id));
        self.save(id)?;
        self.require(id)
    }

    pub fn get(&self, id: BlockId) -> Option<&Document> {
        self.docs.get(&id)
    }

    pub fn require(&self, id: BlockId) -> Result<&Document> {
        self.docs
            .get(&id)
            .ok_or_else(|| TimError::not_found(format!("Document {id} not found")))
    }

    fn require_mut(&mut self, id: BlockId) -> Result<&mut Document> {
        self.docs
            .get_mut(&id)
            .ok_or_else(|| TimError::not_found(format!("Document {id} not found")))
    }

    /// Current paragraphs of the document in order.
    pub fn paragraphs(&self, id: BlockId) -> Result<Vec<DocParagraph>> {
        let doc = self.require(id)?;
        doc.pars
            .iter()
            .map(|r| self.paragraph_version(id, &r.id, &r.hash))
            .collect()
    }

    pub fn paragraph(&self, doc_id: BlockId, par_id: &str) -> Result<DocParagraph> {
        let doc = self.require(doc_id)?;
        let idx = doc.position(par_id)?;
        let r = &doc.pars[idx];
        self.paragraph_version(doc_id, &r.id, &r.hash)
    }

    pub fn paragraph_version(&self, doc_id: BlockId, par_id: &str, hash: &str) -> Result<DocParagraph> {
        if let Some(par) = self.pars.get(&(doc_id, par_id.to_string(), hash.to_string())) {
            return Ok(par.clone());
        }
        self.read_par(doc_id, par_id, hash)
    }

    /// Insert a paragraph before `before`, or append when `before` is None.
    pub fn add_paragraph(
        &mut self,
        doc_id: BlockId,
        md: &str,
        attrs: BTreeMap<String, String>,
        before: Option<&str>,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> Result<DocParagraph> {
        let par = DocParagraph::new(md, attrs);
        self.insert_paragraph(doc_id, par, before, group_id, now)
    }

    pub fn insert_paragraph(
        &mut self,
        doc_id: BlockId,
        par: DocParagraph,
        before: Option<&str>,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> Result<DocParagraph> {
        let doc = self.require(doc_id)?;
        if doc.pars.iter().any(|p| p.id == par.id()) {
            return Err(TimError::validation(format!(
                "Paragraph {} already exists in the document",
                par.id()
            )));
        }
        let idx = match before {
            Some(b) => doc.position(b)?,
            None => doc.pars.len(),
        };
        self.write_par(doc_id, &par)?;
        let doc = self.require_mut(doc_id)?;
        doc.pars.insert(
            idx,
            ParRef {
                id: par.id().to_string(),
                hash: par.hash().to_string(),
            },
        );
        doc.record(Operation::Insert, par.id(), group_id, now);
        self.pars.insert(
            (doc_id, par.id().to_string(), par.hash().to_string()),
            par.clone(),
        );
        self.save(doc_id)?;
        Ok(par)
    }

    /// Store a new version of a paragraph. Unchanged content does not bump
    /// the version.
    pub fn modify_paragraph(
        &mut self,
        doc_id: BlockId,
        par_id: &str,
        md: &str,
        attrs: BTreeMap<String, String>,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> Result<DocParagraph> {
        let old = self.paragraph(doc_id, par_id)?;
        let new = old.revise(md, attrs);
        if new.hash() == old.hash() {
            return Ok(old);
        }
        self.write_par(doc_id, &new)?;
        let doc = self.require_mut(doc_id)?;
        let idx = doc.position(par_id)?;
        doc.pars[idx].hash = new.hash().to_string();
        doc.record(Operation::Modify, par_id, group_id, now);
        self.pars.insert(
            (doc_id, par_id.to_string(), new.hash().to_string()),
            new.clone(),
        );
        self.save(doc_id)?;
        Ok(new)
    }

    pub fn delete_paragraph(
        &mut self,
        doc_id: BlockId,
        par_id: &str,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let doc = self.require_mut(doc_id)?;
        let idx = doc.position(par_id)?;
        doc.pars.remove(idx);
        doc.record(Operation::Delete, par_id, group_id, now);
        self.save(doc_id)
    }

    /// Move `par_id` so that it precedes `before` (or to the end).
    pub fn move_paragraph(
        &mut self,
        doc_id: BlockId,
        par_id: &str,
        before: Option<&str>,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if before == Some(par_id) {
            return Err(TimError::validation("Cannot move a paragraph before itself"));
        }
        let doc = self.require_mut(doc_id)?;
        let from = doc.position(par_id)?;
        if let Some(b) = before {
            doc.position(b)?;
        }
        let r = doc.pars.remove(from);
        let to = match before {
            Some(b) => doc.position(b)?,
            None => doc.pars.len(),
        };
        doc.pars.insert(to, r);
        doc.record(Operation::Move, par_id, group_id, now);
        self.save(doc_id)
    }

    /// Remove the document and all of its paragraph versions.
    pub fn delete(&mut self, id: BlockId) -> Result<()> {
        self.docs.remove(&id);
        self.pars.retain(|(doc, _, _), _| *doc != id);
        ignore_missing(std::fs::remove_file(self.doc_path(id)))?;
        ignore_missing(std::fs::remove_dir_all(self.dir.join("pars").join(id.to_string())))?;
        Ok(())
    }
}

fn ignore_missing(res: std::io::Result<()>) -> Result<()> {
    match res {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other.map_err(TimError::from),
    }
}
