use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::TimDb;
use crate::access::{has_access, verify_access, Principal, Rights};
use crate::block::{AccessType, Block, BlockId, BlockType};
use crate::document::{ChangelogEntry, DocParagraph, DocSettings, Version, PREAMBLE_FOLDER};
use crate::error::{Result, TimError};
use crate::item::{ancestors, join_location, split_location};
use crate::user::GroupId;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ParagraphView {
    #[serde(flatten)]
    pub par: DocParagraph,
    /// Set when the paragraph comes from a preamble document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preamble: Option<BlockId>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DocumentView {
    pub id: BlockId,
    pub path: String,
    pub version: Version,
    pub settings: Map<String, Value>,
    pub paragraphs: Vec<ParagraphView>,
    pub rights: Rights,
}

/// Settings of a document with its preambles applied.
pub(crate) struct Cascade {
    pub settings: DocSettings,
    pub preambles: Vec<(BlockId, Vec<DocParagraph>)>,
}

impl Cascade {
    pub fn macros(&self) -> BTreeMap<String, String> {
        self.settings.macros()
    }
}

impl TimDb {
    pub(crate) fn require_document(&self, id: BlockId) -> Result<&Block> {
        match self.blocks.get(id) {
            Some(b) if b.block_type == BlockType::Document => Ok(b),
            _ => Err(TimError::not_found("Document not found")),
        }
    }

    /// Preamble documents of `doc_id` named `name`, from the root folder
    /// down to the document's own folder. Preambles the principal cannot
    /// view are skipped.
    fn preamble_docs(&self, principal: &Principal, doc_id: BlockId, name: &str, now: DateTime<Utc>) -> Vec<BlockId> {
        let Some((path, _)) = self.items.path_of(doc_id) else {
            return Vec::new();
        };
        if split_location(path).0.ends_with(PREAMBLE_FOLDER) {
            return Vec::new();
        }
        let mut folders = ancestors(path);
        folders.reverse();
        folders
            .into_iter()
            .filter_map(|folder| {
                let candidate = join_location(&join_location(folder, PREAMBLE_FOLDER), name);
                self.items.document(&candidate)
            })
            .filter(|id| *id != doc_id)
            .filter(|id| {
                self.blocks
                    .get(*id)
                    .map_or(false, |b| has_access(principal, b, AccessType::View, now))
            })
            .collect()
    }

    pub(crate) fn cascade(&self, principal: &Principal, doc_id: BlockId, now: DateTime<Utc>) -> Result<Cascade> {
        let own_pars = self.docs.paragraphs(doc_id)?;
        let own = DocSettings::from_paragraphs(&own_pars)?;
        let mut settings = DocSettings::default();
        let mut preambles = Vec::new();
        for id in self.preamble_docs(principal, doc_id, own.preamble(), now) {
            let pars = self.docs.paragraphs(id)?;
            settings = settings.merged(&DocSettings::from_paragraphs(&pars)?);
            preambles.push((id, pars));
        }
        Ok(Cascade {
            settings: settings.merged(&own),
            preambles,
        })
    }

    pub fn document_settings(&self, principal: &Principal, doc_id: BlockId, now: DateTime<Utc>) -> Result<DocSettings> {
        verify_access(principal, self.require_document(doc_id)?, AccessType::View, now)?;
        Ok(self.cascade(principal, doc_id, now)?.settings)
    }

    /// The document as the principal sees it: preamble paragraphs first,
    /// macros expanded.
    pub fn view_document(&self, principal: &Principal, doc_id: BlockId, now: DateTime<Utc>) -> Result<DocumentView> {
        let block = self.require_document(doc_id)?;
        verify_access(principal, block, AccessType::View, now)?;
        let cascade = self.cascade(principal, doc_id, now)?;
        let macros = cascade.macros();
        let mut paragraphs = Vec::new();
        for (id, pars) in &cascade.preambles {
            paragraphs.extend(pars.iter().map(|p| ParagraphView {
                par: p.expanded(&macros),
                preamble: Some(*id),
            }));
        }
        paragraphs.extend(self.docs.paragraphs(doc_id)?.iter().map(|p| ParagraphView {
            par: p.expanded(&macros),
            preamble: None,
        }));
        Ok(DocumentView {
            id: doc_id,
            path: self
                .items
                .path_of(doc_id)
                .map(|(p, _)| p.to_string())
                .unwrap_or_default(),
            version: self.docs.require(doc_id)?.version(),
            settings: cascade.settings.values().clone(),
            paragraphs,
            rights: Rights::evaluate(principal, block, now),
        })
    }

    fn verify_edit(&self, principal: &Principal, doc_id: BlockId, now: DateTime<Utc>) -> Result<GroupId> {
        verify_access(principal, self.require_document(doc_id)?, AccessType::Edit, now)?;
        principal
            .personal_group
            .ok_or_else(|| TimError::access_denied("You have to be logged in to perform this action."))
    }

    pub fn add_paragraph(
        &mut self,
        principal: &Principal,
        doc_id: BlockId,
        md: &str,
        attrs: BTreeMap<String, String>,
        before: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DocParagraph> {
        let group = self.verify_edit(principal, doc_id, now)?;
        let par = self.docs.add_paragraph(doc_id, md, attrs, before, group, now)?;
        self.blocks.touch(doc_id, now);
        self.commit()?;
        Ok(par)
    }

    pub fn modify_paragraph(
        &mut self,
        principal: &Principal,
        doc_id: BlockId,
        par_id: &str,
        md: &str,
        attrs: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<DocParagraph> {
        let group = self.verify_edit(principal, doc_id, now)?;
        let par = self.docs.modify_paragraph(doc_id, par_id, md, attrs, group, now)?;
        self.blocks.touch(doc_id, now);
        self.commit()?;
        Ok(par)
    }

    pub fn delete_paragraph(
        &mut self,
        principal: &Principal,
        doc_id: BlockId,
        par_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let group = self.verify_edit(principal, doc_id, now)?;
        self.docs.delete_paragraph(doc_id, par_id, group, now)?;
        self.blocks.touch(doc_id, now);
        self.commit()
    }

    pub fn move_paragraph(
        &mut self,
        principal: &Principal,
        doc_id: BlockId,
        par_id: &str,
        before: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let group = self.verify_edit(principal, doc_id, now)?;
        self.docs.move_paragraph(doc_id, par_id, before, group, now)?;
        self.blocks.touch(doc_id, now);
        self.commit()
    }

    pub fn changelog(&self, principal: &Principal, doc_id: BlockId, now: DateTime<Utc>) -> Result<Vec<ChangelogEntry>> {
        verify_access(principal, self.require_document(doc_id)?, AccessType::View, now)?;
        Ok(self.docs.require(doc_id)?.changelog().to_vec())
    }
}
