use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use super::TimDb;
use crate::access::{verify_access, Principal};
use crate::block::{AccessType, BlockId};
use crate::error::{Result, TimError};
use crate::readmark::{ReadParagraph, ReadType};
use crate::user::GroupId;

/// Read statistics of one group, as reported to teachers.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ReadStatsRow {
    pub username: String,
    pub click_red: usize,
    pub click_par: usize,
    pub hover_par: usize,
    pub on_screen: usize,
    pub any_of_phs: usize,
}

impl TimDb {
    /// Logged-in users with view access may mark paragraphs read.
    fn verify_read_marking(&self, principal: &Principal, doc_id: BlockId, now: DateTime<Utc>) -> Result<GroupId> {
        let group = principal
            .personal_group
            .ok_or_else(|| TimError::access_denied("You have to be logged in to perform this action."))?;
        verify_access(principal, self.require_document(doc_id)?, AccessType::View, now)?;
        Ok(group)
    }

    /// Mark `par_ids` read. With `disable_automatic` set, automatic
    /// markings are accepted but not stored.
    pub fn mark_read(
        &mut self,
        principal: &Principal,
        doc_id: BlockId,
        par_ids: &[String],
        read_type: ReadType,
        disable_automatic: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if disable_automatic && read_type.is_automatic() {
            return Ok(());
        }
        let group = self.verify_read_marking(principal, doc_id, now)?;
        let mut pars = Vec::with_capacity(par_ids.len());
        let mut seen = BTreeSet::new();
        for par_id in par_ids.iter().filter(|id| seen.insert(*id)) {
            let par = self
                .docs
                .paragraph(doc_id, par_id)
                .map_err(|_| TimError::not_found("Non-existent paragraph"))?;
            pars.push(par);
        }
        for par in &pars {
            self.readings
                .check_unmarked(group, doc_id, par.id(), par.hash(), read_type)?;
        }
        for par in &pars {
            self.readings
                .mark_read(group, doc_id, par.id(), par.hash(), read_type, now)?;
        }
        self.commit()
    }

    pub fn unread(
        &mut self,
        principal: &Principal,
        doc_id: BlockId,
        par_id: &str,
        read_type: ReadType,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let group = self.verify_read_marking(principal, doc_id, now)?;
        self.docs
            .paragraph(doc_id, par_id)
            .map_err(|_| TimError::not_found("Non-existent paragraph"))?;
        self.readings.unread(group, doc_id, par_id, read_type);
        self.commit()
    }

    pub fn mark_all_read(&mut self, principal: &Principal, doc_id: BlockId, now: DateTime<Utc>) -> Result<()> {
        let group = self.verify_read_marking(principal, doc_id, now)?;
        let refs = self.docs.require(doc_id)?.par_refs().to_vec();
        self.readings.mark_all_read(
            group,
            doc_id,
            refs.iter().map(|r| (r.id.as_str(), r.hash.as_str())),
            now,
        );
        self.commit()
    }

    pub fn readings(&self, principal: &Principal, doc_id: BlockId, now: DateTime<Utc>) -> Result<Vec<ReadParagraph>> {
        let group = self.verify_read_marking(principal, doc_id, now)?;
        Ok(self.readings.readings(group, doc_id).into_iter().cloned().collect())
    }

    /// Per-user read counts of a document, for teachers.
    pub fn read_stats(&self, principal: &Principal, doc_path: &str, now: DateTime<Utc>) -> Result<Vec<ReadStatsRow>> {
        let doc_id = self
            .items
            .find_document(doc_path, true)
            .ok_or_else(|| TimError::not_found("Document not found"))?;
        verify_access(principal, self.require_document(doc_id)?, AccessType::Teacher, now)?;
        let mut rows: Vec<ReadStatsRow> = self
            .readings
            .stats(doc_id)
            .into_iter()
            .map(|s| ReadStatsRow {
                username: self
                    .users
                    .group(s.group_id)
                    .map(|g| g.name.clone())
                    .unwrap_or_default(),
                click_red: s.click_red,
                click_par: s.click_par,
                hover_par: s.hover_par,
                on_screen: s.on_screen,
                any_of_phs: s.any_of_phs,
            })
            .collect();
        rows.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(rows)
    }
}
