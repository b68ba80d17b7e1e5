//! Paragraph read markings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::block::BlockId;
use crate::error::{Result, TimError};
use crate::user::GroupId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ReadType {
    OnScreen = 1,
    HoverPar = 2,
    ClickPar = 3,
    ClickRed = 4,
}

impl ReadType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ReadType::OnScreen),
            2 => Some(ReadType::HoverPar),
            3 => Some(ReadType::ClickPar),
            4 => Some(ReadType::ClickRed),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Markings the client sends without an explicit user action.
    pub fn is_automatic(self) -> bool {
        matches!(self, ReadType::OnScreen | ReadType::HoverPar)
    }
}

impl TryFrom<u8> for ReadType {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        ReadType::from_code(code).ok_or_else(|| format!("invalid read type: {code}"))
    }
}

impl From<ReadType> for u8 {
    fn from(t: ReadType) -> u8 {
        t.code()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReadParagraph {
    pub group_id: GroupId,
    pub doc_id: BlockId,
    pub par_id: String,
    #[serde(rename = "type")]
    pub read_type: ReadType,
    pub par_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-group counts of read paragraphs in one document.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ReadStats {
    pub group_id: GroupId,
    pub click_red: usize,
    pub click_par: usize,
    pub hover_par: usize,
    pub on_screen: usize,
    pub any_of_phs: usize,
}

type Key = (GroupId, BlockId, String, ReadType);

#[derive(Debug, Default)]
pub struct ReadingStore {
    marks: BTreeMap<Key, ReadParagraph>,
}

impl Serialize for ReadingStore {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_seq(self.marks.values())
    }
}

impl<'de> Deserialize<'de> for ReadingStore {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let rows = Vec::<ReadParagraph>::deserialize(d)?;
        let marks = rows
            .into_iter()
            .map(|r| ((r.group_id, r.doc_id, r.par_id.clone(), r.read_type), r))
            .collect();
        Ok(Self { marks })
    }
}

impl ReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a paragraph version read. Marking the same version twice is a
    /// conflict; a newer version replaces the old marking.
    pub fn mark_read(
        &mut self,
        group_id: GroupId,
        doc_id: BlockId,
        par_id: &str,
        par_hash: &str,
        read_type: ReadType,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.check_unmarked(group_id, doc_id, par_id, par_hash, read_type)?;
        self.upsert((group_id, doc_id, par_id.to_string(), read_type), par_hash, now);
        Ok(())
    }

    /// Fail with a conflict if this paragraph version is already marked.
    pub fn check_unmarked(
        &self,
        group_id: GroupId,
        doc_id: BlockId,
        par_id: &str,
        par_hash: &str,
        read_type: ReadType,
    ) -> Result<()> {
        let key = (group_id, doc_id, par_id.to_string(), read_type);
        match self.marks.get(&key) {
            Some(existing) if existing.par_hash == par_hash => {
                Err(TimError::Conflict("Paragraph was already marked read".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn upsert(&mut self, key: Key, par_hash: &str, now: DateTime<Utc>) {
        let (group_id, doc_id, par_id, read_type) = key.clone();
        self.marks.insert(
            key,
            ReadParagraph {
                group_id,
                doc_id,
                par_id,
                read_type,
                par_hash: par_hash.to_string(),
                timestamp: now,
            },
        );
    }

    /// Mark every given paragraph as read by click, silently refreshing
    /// existing markings.
    pub fn mark_all_read<'a>(
        &mut self,
        group_id: GroupId,
        doc_id: BlockId,
        pars: impl IntoIterator<Item = (&'a str, &'a str)>,
        now: DateTime<Utc>,
    ) {
        for (par_id, hash) in pars {
            self.upsert((group_id, doc_id, par_id.to_string(), ReadType::ClickRed), hash, now);
        }
    }

    pub fn unread(&mut self, group_id: GroupId, doc_id: BlockId, par_id: &str, read_type: ReadType) -> bool {
        self.marks
            .remove(&(group_id, doc_id, par_id.to_string(), read_type))
            .is_some()
    }

    pub fn readings(&self, group_id: GroupId, doc_id: BlockId) -> Vec<&ReadParagraph> {
        self.marks
            .values()
            .filter(|r| r.group_id == group_id && r.doc_id == doc_id)
            .collect()
    }

    pub fn remove_document(&mut self, doc_id: BlockId) {
        self.marks.retain(|(_, d, _, _), _| *d != doc_id);
    }

    pub fn stats(&self, doc_id: BlockId) -> Vec<ReadStats> {
        let mut per_group: BTreeMap<GroupId, BTreeMap<ReadType, Vec<&str>>> = BTreeMap::new();
        for r in self.marks.values().filter(|r| r.doc_id == doc_id) {
            per_group
                .entry(r.group_id)
                .or_default()
                .entry(r.read_type)
                .or_default()
                .push(&r.par_id);
        }
        per_group
            .into_iter()
            .map(|(group_id, by_type)| {
                let count = |t: ReadType| by_type.get(&t).map_or(0, Vec::len);
                let mut automatic: Vec<&str> = by_type
                    .iter()
                    .filter(|(t, _)| **t != ReadType::ClickRed)
                    .flat_map(|(_, pars)| pars.iter().copied())
                    .collect();
                automatic.sort_unstable();
                automatic.dedup();
                ReadStats {
                    group_id,
                    click_red: count(ReadType::ClickRed),
                    click_par: count(ReadType::ClickPar),
                    hover_par: count(ReadType::HoverPar),
                    on_screen: count(ReadType::OnScreen),
                    any_of_phs: automatic.len(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_marking_conflicts() {
        let mut store = ReadingStore::new();
        let now = Utc::now();
        store.mark_read(1, 2, "p", "h1", ReadType::ClickRed, now).unwrap();
        let err = store.mark_read(1, 2, "p", "h1", ReadType::ClickRed, now).unwrap_err();
        assert_eq!(err.to_string(), "Paragraph was already marked read");
        // another type is a separate marking
        store.mark_read(1, 2, "p", "h1", ReadType::OnScreen, now).unwrap();
        // a new version replaces the old one
        store.mark_read(1, 2, "p", "h2", ReadType::ClickRed, now).unwrap();
        let hashes: Vec<&str> = store.readings(1, 2).iter().map(|r| r.par_hash.as_str()).collect();
        assert_eq!(hashes, vec!["h1", "h2"]);
    }

    #[test]
    fn unread_and_mark_all() {
        let mut store = ReadingStore::new();
        let now = Utc::now();
        store.mark_all_read(1, 2, [("a", "ha"), ("b", "hb")], now);
        store.mark_all_read(1, 2, [("a", "ha")], now);
        assert_eq!(store.readings(1, 2).len(), 2);
        assert!(store.unread(1, 2, "a", ReadType::ClickRed));
        assert!(!store.unread(1, 2, "a", ReadType::ClickRed));
        assert_eq!(store.readings(1, 2).len(), 1);
    }

    #[test]
    fn stats_count_automatic_markings_once() {
        let mut store = ReadingStore::new();
        let now = Utc::now();
        store.mark_read(1, 2, "a", "h", ReadType::OnScreen, now).unwrap();
        store.mark_read(1, 2, "a", "h", ReadType::HoverPar, now).unwrap();
        store.mark_read(1, 2, "b", "h", ReadType::ClickRed, now).unwrap();
        store.mark_read(3, 2, "b", "h", ReadType::ClickPar, now).unwrap();
        let stats = store.stats(2);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].any_of_phs, 1);
        assert_eq!(stats[0].click_red, 1);
        assert_eq!(stats[1].click_par, 1);
    }

    #[test]
    fn serializes_as_rows() {
        let mut store = ReadingStore::new();
        store.mark_read(1, 2, "a", "h", ReadType::ClickPar, Utc::now()).unwrap();
        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(json[0]["type"], 3);
        let back: ReadingStore = serde_json::from_value(json).unwrap();
        assert_eq!(back.readings(1, 2).len(), 1);
    }
}
