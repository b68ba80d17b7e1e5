//! Users, groups and time-bounded group memberships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::access::Principal;
use crate::error::{Result, TimError};

pub type UserId = i64;
pub type GroupId = i64;

pub const ADMIN_GROUPNAME: &str = "Administrators";
pub const ANONYMOUS_GROUPNAME: &str = "Anonymous users";
pub const LOGGED_IN_GROUPNAME: &str = "Logged-in users";
pub const TEACHERS_GROUPNAME: &str = "teachers";

const SPECIAL_GROUPS: [&str; 4] = [
    ADMIN_GROUPNAME,
    ANONYMOUS_GROUPNAME,
    LOGGED_IN_GROUPNAME,
    TEACHERS_GROUPNAME,
];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub real_name: Option<String>,
    pub email: Option<String>,
    pub personal_group: GroupId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserGroup {
    pub id: GroupId,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub added: DateTime<Utc>,
    pub membership_end: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.added <= now && self.membership_end.map_or(true, |end| now < end)
    }
}

/// Group names created by users must contain a digit and a letter and
/// consist of lowercase letters, digits, hyphens and underscores.
pub fn validate_groupname(name: &str) -> Result<()> {
    let has_digit = name.chars().any(|c| c.is_ascii_digit());
    let has_letter = name.chars().any(|c| c.is_ascii_lowercase());
    let allowed = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !(has_digit && has_letter && allowed) {
        return Err(TimError::validation(
            "Usergroup must contain at least one digit and one letter and must not have \
             uppercase or special chars other than hyphen and underscore.",
        ));
    }
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserStore {
    users: BTreeMap<UserId, User>,
    groups: BTreeMap<GroupId, UserGroup>,
    memberships: Vec<Membership>,
    next_user_id: UserId,
    next_group_id: GroupId,
}

impl UserStore {
    pub fn new() -> Self {
        let mut store = Self {
            next_user_id: 1,
            next_group_id: 1,
            ..Default::default()
        };
        store.ensure_special_groups();
        store
    }

    /// Create the built-in groups if they are missing.
    pub fn ensure_special_groups(&mut self) {
        for name in SPECIAL_GROUPS {
            if self.group_by_name(name).is_none() {
                self.insert_group(name);
            }
        }
    }

    fn insert_group(&mut self, name: &str) -> GroupId {
        let id = self.next_group_id.max(1);
        self.next_group_id = id + 1;
        self.groups.insert(
            id,
            UserGroup {
                id,
                name: name.to_string(),
            },
        );
        id
    }

    pub fn create_user(
        &mut self,
        name: &str,
        real_name: Option<String>,
        email: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<UserId> {
        if name.trim().is_empty() {
            return Err(TimError::validation("User name cannot be empty."));
        }
        if self.user_by_name(name).is_some() || self.group_by_name(name).is_some() {
            return Err(TimError::ItemExists(format!("User {name} already exists.")));
        }
        let personal_group = self.insert_group(name);
        let id = self.next_user_id.max(1);
        self.next_user_id = id + 1;
        self.users.insert(
            id,
            User {
                id,
                name: name.to_string(),
                real_name,
                email,
                personal_group,
            },
        );
        self.memberships.push(Membership {
            user_id: id,
            group_id: personal_group,
            added: now,
            membership_end: None,
        });
        Ok(id)
    }

    pub fn create_group(&mut self, name: &str) -> Result<GroupId> {
        validate_groupname(name)?;
        if self.group_by_name(name).is_some() {
            return Err(TimError::ItemExists(format!(
                "User group {name} already exists."
            )));
        }
        Ok(self.insert_group(name))
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn user_by_name(&self, name: &str) -> Option<&User> {
        self.users.values().find(|u| u.name == name)
    }

    pub fn group(&self, id: GroupId) -> Option<&UserGroup> {
        self.groups.get(&id)
    }

    pub fn group_by_name(&self, name: &str) -> Option<&UserGroup> {
        self.groups.values().find(|g| g.name == name)
    }

    /// Add a user to a group. Re-adding an ended membership opens a new
    /// membership record; an active one is left as is.
    pub fn add_member(&mut self, group_id: GroupId, user_id: UserId, now: DateTime<Utc>) -> Result<bool> {
        self.require_user(user_id)?;
        self.require_group(group_id)?;
        if self.is_member(user_id, group_id, now) {
            return Ok(false);
        }
        self.memberships.push(Membership {
            user_id,
            group_id,
            added: now,
            membership_end: None,
        });
        Ok(true)
    }

    /// End an active membership. Memberships are never deleted so that the
    /// history stays available.
    pub fn remove_member(&mut self, group_id: GroupId, user_id: UserId, now: DateTime<Utc>) -> Result<bool> {
        self.require_user(user_id)?;
        let group = self.require_group(group_id)?;
        if self.users.get(&user_id).map(|u| u.personal_group) == Some(group.id) {
            return Err(TimError::validation("Cannot remove a user from their personal group."));
        }
        let mut removed = false;
        for m in self
            .memberships
            .iter_mut()
            .filter(|m| m.user_id == user_id && m.group_id == group_id && m.is_active(now))
        {
            m.membership_end = Some(now);
            removed = true;
        }
        Ok(removed)
    }

    pub fn is_member(&self, user_id: UserId, group_id: GroupId, now: DateTime<Utc>) -> bool {
        self.memberships
            .iter()
            .any(|m| m.user_id == user_id && m.group_id == group_id && m.is_active(now))
    }

    pub fn is_member_of(&self, user_id: UserId, group_name: &str, now: DateTime<Utc>) -> bool {
        self.group_by_name(group_name)
            .map_or(false, |g| self.is_member(user_id, g.id, now))
    }

    pub fn group_members(&self, group_id: GroupId, now: DateTime<Utc>) -> Vec<UserId> {
        let members: BTreeSet<UserId> = self
            .memberships
            .iter()
            .filter(|m| m.group_id == group_id && m.is_active(now))
            .map(|m| m.user_id)
            .collect();
        members.into_iter().collect()
    }

    pub fn memberships_of(&self, user_id: UserId) -> impl Iterator<Item = &Membership> {
        self.memberships.iter().filter(move |m| m.user_id == user_id)
    }

    /// Build the access principal for a (possibly anonymous) user at `now`.
    pub fn principal(&self, user_id: Option<UserId>, now: DateTime<Utc>) -> Principal {
        let mut groups = BTreeSet::new();
        if let Some(g) = self.group_by_name(ANONYMOUS_GROUPNAME) {
            groups.insert(g.id);
        }
        let Some(user) = user_id.and_then(|id| self.users.get(&id)) else {
            return Principal::anonymous(groups);
        };
        if let Some(g) = self.group_by_name(LOGGED_IN_GROUPNAME) {
            groups.insert(g.id);
        }
        groups.extend(
            self.memberships_of(user.id)
                .filter(|m| m.is_active(now))
                .map(|m| m.group_id),
        );
        let admin = self
            .group_by_name(ADMIN_GROUPNAME)
            .map_or(false, |g| groups.contains(&g.id));
        Principal {
            user_id: Some(user.id),
            personal_group: Some(user.personal_group),
            groups,
            admin,
        }
    }

    fn require_user(&self, id: UserId) -> Result<&User> {
        self.users
            .get(&id)
            .ok_or_else(|| TimError::not_found(format!("User {id} not found")))
    }

    fn require_group(&self, id: GroupId) -> Result<&UserGroup> {
        self.groups
            .get(&id)
            .ok_or_else(|| TimError::not_found(format!("User group {id} not found")))
    }
}
