//! The aggregate database: every store plus the operations that tie them
//! together behind access checks.
//!
//! State is kept in memory and written out as JSON tables under the data
//! directory on every [`TimDb::commit`]. Paragraph versions live in the
//! content-addressed [`DocumentStore`] under the same directory.

mod answers;
mod documents;
mod items;
mod readings;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::access::Principal;
use crate::answer::AnswerStore;
use crate::block::BlockStore;
use crate::document::DocumentStore;
use crate::error::{Result, TimError};
use crate::item::{join_location, sanitize_segment, ItemIndex};
use crate::readmark::ReadingStore;
use crate::user::{GroupId, User, UserId, UserStore, ADMIN_GROUPNAME};

pub use answers::TaskUser;
pub use documents::{DocumentView, ParagraphView};
pub use items::ItemInfo;
pub use readings::ReadStatsRow;

/// Folder holding personal folders of users.
pub const USERS_FOLDER: &str = "users";

const USERS_TABLE: &str = "users.json";
const BLOCKS_TABLE: &str = "blocks.json";
const ITEMS_TABLE: &str = "items.json";
const ANSWERS_TABLE: &str = "answers.json";
const READINGS_TABLE: &str = "readings.json";

pub struct TimDb {
    dir: PathBuf,
    pub users: UserStore,
    pub blocks: BlockStore,
    pub items: ItemIndex,
    pub answers: AnswerStore,
    pub readings: ReadingStore,
    pub docs: DocumentStore,
    dirty: bool,
}

/// Outcome of adding users to a group.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct AddMembers {
    pub added: Vec<String>,
    pub already_belongs: Vec<String>,
    pub not_exist: Vec<String>,
}

/// Outcome of removing users from a group.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct RemoveMembers {
    pub removed: Vec<String>,
    pub does_not_belong: Vec<String>,
    pub not_exist: Vec<String>,
}

fn read_table<T: DeserializeOwned + Default>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = std::fs::read(&path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TimError::Storage(format!("table {name} is corrupt: {e}")))
}

fn write_table<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<()> {
    let tmp = dir.join(format!("{name}.tmp"));
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(tmp, dir.join(name))?;
    Ok(())
}

impl TimDb {
    /// Open the database under `dir`, creating an empty one if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let docs = DocumentStore::new(&dir)?;
        let mut db = Self {
            dir,
            users: UserStore::new(),
            blocks: BlockStore::new(),
            items: ItemIndex::new(),
            answers: AnswerStore::new(),
            readings: ReadingStore::new(),
            docs,
            dirty: false,
        };
        db.load_tables()?;
        tracing::info!(dir = %db.dir.display(), "database opened");
        Ok(db)
    }

    fn load_tables(&mut self) -> Result<()> {
        self.users = read_table(&self.dir, USERS_TABLE)?;
        self.users.ensure_special_groups();
        self.blocks = read_table(&self.dir, BLOCKS_TABLE)?;
        self.items = read_table(&self.dir, ITEMS_TABLE)?;
        self.answers = read_table(&self.dir, ANSWERS_TABLE)?;
        self.readings = read_table(&self.dir, READINGS_TABLE)?;
        Ok(())
    }

    /// Re-read all tables and documents from disk.
    pub fn reload(&mut self) -> Result<()> {
        self.load_tables()?;
        self.docs.reload()
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    /// Persist every table. Marks the database dirty for the snapshotter.
    pub fn commit(&mut self) -> Result<()> {
        write_table(&self.dir, USERS_TABLE, &self.users)?;
        write_table(&self.dir, BLOCKS_TABLE, &self.blocks)?;
        write_table(&self.dir, ITEMS_TABLE, &self.items)?;
        write_table(&self.dir, ANSWERS_TABLE, &self.answers)?;
        write_table(&self.dir, READINGS_TABLE, &self.readings)?;
        self.dirty = true;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn admin_group(&self) -> Result<GroupId> {
        self.users
            .group_by_name(ADMIN_GROUPNAME)
            .map(|g| g.id)
            .ok_or_else(|| TimError::Storage("administrators group is missing".to_string()))
    }

    /// Principal for a user name; unknown or missing names are anonymous.
    pub fn principal_for_name(&self, name: Option<&str>, now: DateTime<Utc>) -> Principal {
        let id = name.and_then(|n| self.users.user_by_name(n)).map(|u| u.id);
        self.users.principal(id, now)
    }

    pub fn require_user(&self, id: UserId) -> Result<&User> {
        self.users
            .user(id)
            .ok_or_else(|| TimError::not_found("User not found."))
    }

    /// Create a user with a personal group and a personal folder under
    /// `users/`. No access check; callers decide who may register users.
    pub fn create_user(
        &mut self,
        name: &str,
        real_name: Option<String>,
        email: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<UserId> {
        let id = self.users.create_user(name, real_name, email, now)?;
        let admins = self.admin_group()?;
        if self.items.folder(USERS_FOLDER).is_none() {
            self.insert_folder(USERS_FOLDER, admins, now);
        }
        let personal_group = self.require_user(id)?.personal_group;
        let folder = join_location(USERS_FOLDER, &sanitize_segment(name));
        if !self.items.exists(&folder) {
            self.insert_folder(&folder, personal_group, now);
        }
        self.commit()?;
        tracing::info!(user = name, id, "user created");
        Ok(id)
    }

    pub fn register_user(
        &mut self,
        principal: &Principal,
        name: &str,
        real_name: Option<String>,
        email: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<UserId> {
        require_admin(principal)?;
        self.create_user(name, real_name, email, now)
    }

    /// Add a user to the administrators group.
    pub fn make_admin(&mut self, user: UserId, now: DateTime<Utc>) -> Result<()> {
        let admins = self.admin_group()?;
        self.users.add_member(admins, user, now)?;
        self.commit()
    }

    pub fn create_group(&mut self, principal: &Principal, name: &str) -> Result<GroupId> {
        require_admin(principal)?;
        let id = self.users.create_group(name)?;
        self.commit()?;
        Ok(id)
    }

    fn require_group(&self, name: &str) -> Result<GroupId> {
        self.users
            .group_by_name(name)
            .map(|g| g.id)
            .ok_or_else(|| TimError::not_found("Usergroup does not exist."))
    }

    pub fn group_members(&self, principal: &Principal, group: &str, now: DateTime<Utc>) -> Result<Vec<User>> {
        require_admin(principal)?;
        let group = self.require_group(group)?;
        Ok(self
            .users
            .group_members(group, now)
            .into_iter()
            .filter_map(|id| self.users.user(id).cloned())
            .collect())
    }

    pub fn add_members(
        &mut self,
        principal: &Principal,
        group: &str,
        names: &[String],
        now: DateTime<Utc>,
    ) -> Result<AddMembers> {
        require_admin(principal)?;
        let group = self.require_group(group)?;
        let mut out = AddMembers::default();
        for name in names {
            let Some(user) = self.users.user_by_name(name).map(|u| u.id) else {
                out.not_exist.push(name.clone());
                continue;
            };
            if self.users.add_member(group, user, now)? {
                out.added.push(name.clone());
            } else {
                out.already_belongs.push(name.clone());
            }
        }
        self.commit()?;
        Ok(out)
    }

    pub fn remove_members(
        &mut self,
        principal: &Principal,
        group: &str,
        names: &[String],
        now: DateTime<Utc>,
    ) -> Result<RemoveMembers> {
        require_admin(principal)?;
        let group = self.require_group(group)?;
        let mut out = RemoveMembers::default();
        for name in names {
            let Some(user) = self.users.user_by_name(name).map(|u| u.id) else {
                out.not_exist.push(name.clone());
                continue;
            };
            if self.users.remove_member(group, user, now)? {
                out.removed.push(name.clone());
            } else {
                out.does_not_belong.push(name.clone());
            }
        }
        self.commit()?;
        Ok(out)
    }
}

fn require_admin(principal: &Principal) -> Result<()> {
    if principal.admin {
        Ok(())
    } else {
        Err(TimError::access_denied("This action requires administrative rights."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        {
            let mut db = TimDb::open(dir.path()).unwrap();
            db.create_user("testuser1", None, Some("t1@example.com".into()), now).unwrap();
            assert!(db.is_dirty());
        }
        let db = TimDb::open(dir.path()).unwrap();
        let user = db.users.user_by_name("testuser1").unwrap();
        assert_eq!(user.email.as_deref(), Some("t1@example.com"));
        assert!(db.items.folder("users/testuser1").is_some());
        assert!(!db.is_dirty());
    }

    #[test]
    fn group_membership_changes_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let mut db = TimDb::open(dir.path()).unwrap();
        let admin = db.create_user("admin", None, None, now).unwrap();
        db.make_admin(admin, now).unwrap();
        for n in ["t1", "t2"] {
            db.create_user(n, None, None, now).unwrap();
        }
        let p = db.users.principal(Some(admin), now);
        db.create_group(&p, "testgroup1").unwrap();

        let names: Vec<String> = ["t1", "t5"].iter().map(|s| s.to_string()).collect();
        let added = db.add_members(&p, "testgroup1", &names, now).unwrap();
        assert_eq!(added.added, vec!["t1"]);
        assert_eq!(added.not_exist, vec!["t5"]);
        let again = db.add_members(&p, "testgroup1", &names[..1], now).unwrap();
        assert_eq!(again.already_belongs, vec!["t1"]);

        let names: Vec<String> = ["t1", "t2"].iter().map(|s| s.to_string()).collect();
        let removed = db.remove_members(&p, "testgroup1", &names, now).unwrap();
        assert_eq!(removed.removed, vec!["t1"]);
        assert_eq!(removed.does_not_belong, vec!["t2"]);

        let err = db.group_members(&p, "nope1", now).unwrap_err();
        assert_eq!(err.to_string(), "Usergroup does not exist.");

        let student = db.principal_for_name(Some("t1"), now);
        assert!(matches!(
            db.create_group(&student, "other1"),
            Err(TimError::AccessDenied(_))
        ));
    }
}
