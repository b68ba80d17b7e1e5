//! Generic addressable entities and their access-control entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, TimError};
use crate::user::GroupId;

pub type BlockId = i64;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Document,
    Folder,
    Upload,
    Image,
    File,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    View,
    Edit,
    Teacher,
    Manage,
    SeeAnswers,
    Owner,
    Copy,
}

impl AccessType {
    /// Entry types that grant this level of access.
    pub fn satisfied_by(self) -> &'static [AccessType] {
        use AccessType::*;
        match self {
            View => &[View, Copy, Edit, Teacher, SeeAnswers, Manage, Owner],
            Edit => &[Edit, Manage, Owner],
            Teacher => &[Teacher, Manage, Owner],
            SeeAnswers => &[SeeAnswers, Teacher, Manage, Owner],
            Manage => &[Manage, Owner],
            Owner => &[Owner],
            Copy => &[Copy, Edit, Manage, Owner],
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        use AccessType::*;
        Some(match name {
            "view" => View,
            "edit" => Edit,
            "teacher" => Teacher,
            "manage" => Manage,
            "see_answers" => SeeAnswers,
            "owner" => Owner,
            "copy" => Copy,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AccessEntry {
    pub group_id: GroupId,
    pub access_type: AccessType,
    pub accessible_from: Option<DateTime<Utc>>,
    pub accessible_to: Option<DateTime<Utc>>,
}

impl AccessEntry {
    pub fn permanent(group_id: GroupId, access_type: AccessType) -> Self {
        Self {
            group_id,
            access_type,
            accessible_from: None,
            accessible_to: None,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.accessible_from.map_or(true, |from| from <= now)
            && self.accessible_to.map_or(true, |to| now < to)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub block_type: BlockType,
    pub description: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub accesses: Vec<AccessEntry>,
}

impl Block {
    pub fn owner_groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.accesses
            .iter()
            .filter(|a| a.access_type == AccessType::Owner)
            .map(|a| a.group_id)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BlockStore {
    blocks: BTreeMap<BlockId, Block>,
    next_id: BlockId,
}

impl BlockStore {
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Insert a new block owned by `owner_group`.
    pub fn insert(
        &mut self,
        block_type: BlockType,
        description: &str,
        owner_group: GroupId,
        now: DateTime<Utc>,
    ) -> BlockId {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.blocks.insert(
            id,
            Block {
                id,
                block_type,
                description: description.to_string(),
                created: now,
                modified: now,
                accesses: vec![AccessEntry::permanent(owner_group, AccessType::Owner)],
            },
        );
        id
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn require(&self, id: BlockId) -> Result<&Block> {
        self.blocks
            .get(&id)
            .ok_or_else(|| TimError::not_found(format!("Item {id} not found")))
    }

    pub fn touch(&mut self, id: BlockId, now: DateTime<Utc>) {
        if let Some(b) = self.blocks.get_mut(&id) {
            b.modified = now;
        }
    }

    pub fn set_description(&mut self, id: BlockId, description: &str) -> Result<()> {
        let block = self
            .blocks
            .get_mut(&id)
            .ok_or_else(|| TimError::not_found(format!("Item {id} not found")))?;
        block.description = description.to_string();
        Ok(())
    }

    /// Remove a block together with its access entries.
    pub fn remove(&mut self, id: BlockId) -> Option<Block> {
        self.blocks.remove(&id)
    }

    /// Grant access, replacing any existing entry for the same group and type.
    pub fn grant(&mut self, id: BlockId, entry: AccessEntry) -> Result<()> {
        if let (Some(from), Some(to)) = (entry.accessible_from, entry.accessible_to) {
            if to < from {
                return Err(TimError::validation(
                    "Access end time must not be before its start time.",
                ));
            }
        }
        let block = self
            .blocks
            .get_mut(&id)
            .ok_or_else(|| TimError::not_found(format!("Item {id} not found")))?;
        block
            .accesses
            .retain(|a| !(a.group_id == entry.group_id && a.access_type == entry.access_type));
        block.accesses.push(entry);
        Ok(())
    }

    /// Remove the entry for `group` and `access_type`. The last owner cannot
    /// be removed.
    pub fn revoke(&mut self, id: BlockId, group: GroupId, access_type: AccessType) -> Result<bool> {
        let block = self
            .blocks
            .get_mut(&id)
            .ok_or_else(|| TimError::not_found(format!("Item {id} not found")))?;
        if access_type == AccessType::Owner && block.owner_groups().eq([group]) {
            return Err(TimError::validation("Cannot remove last owner group."));
        }
        let before = block.accesses.len();
        block
            .accesses
            .retain(|a| !(a.group_id == group && a.access_type == access_type));
        Ok(block.accesses.len() != before)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_block_has_owner_entry() {
        let mut store = BlockStore::new();
        let id = store.insert(BlockType::Document, "doc", 7, Utc::now());
        let block = store.get(id).unwrap();
        assert_eq!(block.owner_groups().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn grant_replaces_same_group_and_type() {
        let mut store = BlockStore::new();
        let id = store.insert(BlockType::Folder, "f", 1, Utc::now());
        store.grant(id, AccessEntry::permanent(2, AccessType::View)).unwrap();
        store.grant(id, AccessEntry::permanent(2, AccessType::View)).unwrap();
        store.grant(id, AccessEntry::permanent(2, AccessType::Edit)).unwrap();
        assert_eq!(store.get(id).unwrap().accesses.len(), 3);
        assert!(store.revoke(id, 2, AccessType::View).unwrap());
        assert!(!store.revoke(id, 2, AccessType::View).unwrap());
        assert!(store.revoke(id, 1, AccessType::Owner).is_err());
    }

    #[test]
    fn revoking_owner_from_non_owner_group_is_a_no_op() {
        let mut store = BlockStore::new();
        let id = store.insert(BlockType::Document, "doc", 1, Utc::now());
        assert!(!store.revoke(id, 5, AccessType::Owner).unwrap());
        store.grant(id, AccessEntry::permanent(5, AccessType::Owner)).unwrap();
        assert!(store.revoke(id, 1, AccessType::Owner).unwrap());
        assert!(store.revoke(id, 5, AccessType::Owner).is_err());
        assert_eq!(store.get(id).unwrap().owner_groups().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn entry_window_is_half_open() {
        let now = Utc::now();
        let entry = AccessEntry {
            group_id: 1,
            access_type: AccessType::View,
            accessible_from: Some(now),
            accessible_to: Some(now + chrono::Duration::minutes(5)),
        };
        assert!(entry.is_valid_at(now));
        assert!(!entry.is_valid_at(now + chrono::Duration::minutes(5)));
        assert!(!entry.is_valid_at(now - chrono::Duration::seconds(1)));
    }
}
