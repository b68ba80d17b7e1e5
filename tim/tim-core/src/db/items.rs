use chrono::{DateTime, Utc};
use serde::Serialize;

use super::TimDb;
use crate::access::{has_access, verify_access, Principal, Rights};
use crate::block::{AccessEntry, AccessType, BlockId, BlockType};
use crate::error::{Result, TimError};
use crate::item::{ancestors, split_location, validate_item_path, ItemKind};
use crate::user::GroupId;

/// A folder or document as shown in listings.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ItemInfo {
    pub id: BlockId,
    pub name: String,
    pub path: String,
    pub kind: ItemKind,
    pub modified: DateTime<Utc>,
    pub rights: Rights,
}

fn item_exists() -> TimError {
    TimError::ItemExists("Item with a same name already exists.".to_string())
}

impl TimDb {
    pub(crate) fn insert_folder(&mut self, path: &str, owner: GroupId, now: DateTime<Utc>) -> BlockId {
        let id = self.blocks.insert(BlockType::Folder, split_location(path).1, owner, now);
        self.items.insert(path, ItemKind::Folder, id);
        id
    }

    /// Check that `principal` may create `path` and create the missing
    /// folders above it.
    fn prepare_location(
        &mut self,
        principal: &Principal,
        path: &str,
        kind: ItemKind,
        now: DateTime<Utc>,
    ) -> Result<GroupId> {
        principal.require_logged_in()?;
        let owner = principal
            .personal_group
            .ok_or_else(|| TimError::access_denied("You have to be logged in to perform this action."))?;
        let parents = ancestors(path);
        if parents.iter().any(|p| self.items.document(p).is_some()) {
            return Err(item_exists());
        }
        let nearest = parents
            .iter()
            .copied()
            .find(|p| p.is_empty() || self.items.folder(p).is_some())
            .unwrap_or_default();
        let allowed = if nearest.is_empty() {
            principal.admin
        } else {
            let block = self.blocks.require(self.items.folder(nearest).unwrap_or_default())?;
            verify_access(principal, block, AccessType::Edit, now).is_ok()
        };
        if !allowed {
            let noun = match kind {
                ItemKind::Folder => "folders",
                ItemKind::Document => "documents",
            };
            return Err(TimError::access_denied(format!(
                "You cannot create {noun} in this folder."
            )));
        }
        for missing in parents.iter().rev().filter(|p| !p.is_empty()) {
            if self.items.folder(missing).is_none() {
                self.insert_folder(missing, owner, now);
            }
        }
        Ok(owner)
    }

    pub fn create_folder(&mut self, principal: &Principal, path: &str, now: DateTime<Utc>) -> Result<BlockId> {
        validate_item_path(path, ItemKind::Folder)?;
        if self.items.exists(path) {
            return Err(item_exists());
        }
        let owner = self.prepare_location(principal, path, ItemKind::Folder, now)?;
        let id = self.insert_folder(path, owner, now);
        self.commit()?;
        tracing::info!(path, id, "folder created");
        Ok(id)
    }

    pub fn create_document(&mut self, principal: &Principal, path: &str, now: DateTime<Utc>) -> Result<BlockId> {
        validate_item_path(path, ItemKind::Document)?;
        if self.items.exists(path) {
            return Err(item_exists());
        }
        let owner = self.prepare_location(principal, path, ItemKind::Document, now)?;
        let id = self.blocks.insert(BlockType::Document, split_location(path).1, owner, now);
        self.docs.create(id)?;
        self.items.insert(path, ItemKind::Document, id);
        self.commit()?;
        tracing::info!(path, id, "document created");
        Ok(id)
    }

    /// Move an item (and, for folders, everything below it) to `new_path`.
    pub fn rename_item(
        &mut self,
        principal: &Principal,
        id: BlockId,
        new_path: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (old_path, kind) = self
            .items
            .path_of(id)
            .map(|(p, k)| (p.to_string(), k))
            .ok_or_else(|| TimError::not_found("Item not found."))?;
        verify_access(principal, self.blocks.require(id)?, AccessType::Manage, now)?;
        validate_item_path(new_path, kind)?;
        if new_path == old_path {
            return Ok(());
        }
        if new_path.starts_with(&format!("{old_path}/")) {
            return Err(TimError::access_denied("A folder cannot contain itself."));
        }
        if self.items.exists(new_path) {
            return Err(item_exists());
        }
        self.prepare_location(principal, new_path, kind, now)?;
        self.items.rename(&old_path, new_path);
        self.blocks.set_description(id, split_location(new_path).1)?;
        self.blocks.touch(id, now);
        self.commit()?;
        tracing::info!(from = %old_path, to = new_path, "item renamed");
        Ok(())
    }

    /// Delete an item. Folders are deleted with all their contents.
    pub fn delete_item(&mut self, principal: &Principal, id: BlockId, now: DateTime<Utc>) -> Result<Vec<BlockId>> {
        let (path, kind) = self
            .items
            .path_of(id)
            .map(|(p, k)| (p.to_string(), k))
            .ok_or_else(|| TimError::not_found("Item not found."))?;
        verify_access(principal, self.blocks.require(id)?, AccessType::Owner, now)?;
        let mut doomed = vec![(path.clone(), kind, id)];
        if kind == ItemKind::Folder {
            doomed.extend(self.items.descendants(&path));
        }
        let mut deleted = Vec::with_capacity(doomed.len());
        for (p, k, block) in doomed {
            if k == ItemKind::Document {
                self.docs.delete(block)?;
                self.readings.remove_document(block);
            }
            self.items.remove(&p);
            self.blocks.remove(block);
            deleted.push(block);
        }
        self.commit()?;
        tracing::info!(path = %path, count = deleted.len(), "items deleted");
        Ok(deleted)
    }

    /// Items directly inside `folder` that `principal` may view.
    pub fn list_items(&self, principal: &Principal, folder: &str, now: DateTime<Utc>) -> Result<Vec<ItemInfo>> {
        if !folder.is_empty() {
            let id = self
                .items
                .folder(folder)
                .ok_or_else(|| TimError::not_found("Folder not found."))?;
            verify_access(principal, self.blocks.require(id)?, AccessType::View, now)?;
        }
        let mut out = Vec::new();
        for (path, kind, id) in self.items.children(folder) {
            let Some(block) = self.blocks.get(id) else {
                continue;
            };
            if !has_access(principal, block, AccessType::View, now) {
                continue;
            }
            let rights = Rights::evaluate(principal, block, now);
            out.push(ItemInfo {
                id,
                name: split_location(&path).1.to_string(),
                path,
                kind,
                modified: block.modified,
                rights,
            });
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn grant(
        &mut self,
        principal: &Principal,
        id: BlockId,
        group: &str,
        access_type: AccessType,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<GroupId> {
        verify_access(principal, self.blocks.require(id)?, AccessType::Manage, now)?;
        let group_id = self.require_group(group)?;
        self.blocks.grant(
            id,
            AccessEntry {
                group_id,
                access_type,
                accessible_from: from,
                accessible_to: to,
            },
        )?;
        self.commit()?;
        Ok(group_id)
    }

    pub fn revoke(
        &mut self,
        principal: &Principal,
        id: BlockId,
        group: &str,
        access_type: AccessType,
        now: DateTime<Utc>,
    ) -> Result<GroupId> {
        verify_access(principal, self.blocks.require(id)?, AccessType::Manage, now)?;
        let group_id = self.require_group(group)?;
        if !self.blocks.revoke(id, group_id, access_type)? {
            return Err(TimError::not_found("Permission not found."));
        }
        self.commit()?;
        Ok(group_id)
    }
}
