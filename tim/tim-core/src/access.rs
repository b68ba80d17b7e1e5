//! Access evaluation against block access lists.
//!
//! Every request resolves the current user into a [`Principal`] (the union of
//! their currently valid group memberships) and checks it against the target
//! block. There is no caching: memberships and entries are re-read on each
//! check.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::block::{AccessEntry, AccessType, Block};
use crate::error::{Result, TimError};
use crate::user::{GroupId, UserId};

#[derive(Clone, Debug, PartialEq)]
pub struct Principal {
    pub user_id: Option<UserId>,
    pub personal_group: Option<GroupId>,
    pub groups: BTreeSet<GroupId>,
    pub admin: bool,
}

impl Principal {
    pub fn anonymous(groups: BTreeSet<GroupId>) -> Self {
        Self {
            user_id: None,
            personal_group: None,
            groups,
            admin: false,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn require_logged_in(&self) -> Result<UserId> {
        self.user_id
            .ok_or_else(|| TimError::access_denied("You have to be logged in to perform this action."))
    }
}

/// Find the entry that grants `access` to `principal` on `block` at `now`.
///
/// When several entries apply, the one whose window ends last wins; an
/// open-ended entry beats any bounded one. Administrators get a synthetic
/// owner entry.
pub fn get_access(
    principal: &Principal,
    block: &Block,
    access: AccessType,
    now: DateTime<Utc>,
) -> Option<AccessEntry> {
    if principal.admin {
        let group = principal.personal_group.unwrap_or_default();
        return Some(AccessEntry::permanent(group, AccessType::Owner));
    }
    let accepted = access.satisfied_by();
    block
        .accesses
        .iter()
        .filter(|e| principal.groups.contains(&e.group_id))
        .filter(|e| accepted.contains(&e.access_type))
        .filter(|e| e.is_valid_at(now))
        .max_by_key(|e| (e.accessible_to.is_none(), e.accessible_to))
        .cloned()
}

pub fn has_access(principal: &Principal, block: &Block, access: AccessType, now: DateTime<Utc>) -> bool {
    get_access(principal, block, access, now).is_some()
}

pub fn verify_access(
    principal: &Principal,
    block: &Block,
    access: AccessType,
    now: DateTime<Utc>,
) -> Result<AccessEntry> {
    get_access(principal, block, access, now).ok_or_else(|| {
        tracing::debug!(block = block.id, ?access, user = ?principal.user_id, "access denied");
        TimError::access_denied(denied_message(access))
    })
}

fn denied_message(access: AccessType) -> String {
    let what = match access {
        AccessType::View => "view",
        AccessType::Edit => "edit",
        AccessType::Teacher => "teacher",
        AccessType::Manage => "manage",
        AccessType::SeeAnswers => "see answers",
        AccessType::Owner => "owner",
        AccessType::Copy => "copy",
    };
    format!("Sorry, you don't have permission to {what} this resource.")
}

/// Effective rights of a principal, as reported in item listings.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Rights {
    pub editable: bool,
    pub can_mark_as_read: bool,
    pub can_comment: bool,
    pub browse_own_answers: bool,
    pub teacher: bool,
    pub see_answers: bool,
    pub manage: bool,
    pub owner: bool,
}

impl Rights {
    pub fn evaluate(principal: &Principal, block: &Block, now: DateTime<Utc>) -> Self {
        let view = has_access(principal, block, AccessType::View, now);
        let logged_view = view && principal.is_logged_in();
        Self {
            editable: has_access(principal, block, AccessType::Edit, now),
            can_mark_as_read: logged_view,
            can_comment: logged_view,
            browse_own_answers: logged_view,
            teacher: has_access(principal, block, AccessType::Teacher, now),
            see_answers: has_access(principal, block, AccessType::SeeAnswers, now),
            manage: has_access(principal, block, AccessType::Manage, now),
            owner: has_access(principal, block, AccessType::Owner, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use chrono::Duration;

    fn block(accesses: Vec<AccessEntry>) -> Block {
        let now = Utc::now();
        Block {
            id: 1,
            block_type: BlockType::Document,
            description: "d".into(),
            created: now,
            modified: now,
            accesses,
        }
    }

    fn principal(groups: &[GroupId]) -> Principal {
        Principal {
            user_id: Some(1),
            personal_group: groups.first().copied(),
            groups: groups.iter().copied().collect(),
            admin: false,
        }
    }

    #[test]
    fn stronger_type_implies_weaker() {
        let b = block(vec![AccessEntry::permanent(5, AccessType::Teacher)]);
        let p = principal(&[5]);
        let now = Utc::now();
        assert!(has_access(&p, &b, AccessType::View, now));
        assert!(has_access(&p, &b, AccessType::SeeAnswers, now));
        assert!(has_access(&p, &b, AccessType::Teacher, now));
        assert!(!has_access(&p, &b, AccessType::Edit, now));
        assert!(!has_access(&p, &b, AccessType::Manage, now));
    }

    #[test]
    fn expired_entry_grants_nothing() {
        let now = Utc::now();
        let b = block(vec![AccessEntry {
            group_id: 5,
            access_type: AccessType::View,
            accessible_from: Some(now - Duration::days(2)),
            accessible_to: Some(now - Duration::days(1)),
        }]);
        assert!(!has_access(&principal(&[5]), &b, AccessType::View, now));
    }

    #[test]
    fn most_permissive_window_wins() {
        let now = Utc::now();
        let short = AccessEntry {
            group_id: 5,
            access_type: AccessType::View,
            accessible_from: None,
            accessible_to: Some(now + Duration::hours(1)),
        };
        let long = AccessEntry {
            group_id: 6,
            access_type: AccessType::View,
            accessible_from: None,
            accessible_to: Some(now + Duration::days(3)),
        };
        let b = block(vec![short.clone(), long.clone()]);
        assert_eq!(get_access(&principal(&[5, 6]), &b, AccessType::View, now), Some(long));

        let open = AccessEntry::permanent(7, AccessType::Edit);
        let b = block(vec![short, open.clone()]);
        assert_eq!(get_access(&principal(&[5, 7]), &b, AccessType::View, now), Some(open));
    }

    #[test]
    fn admin_bypasses_access_list() {
        let b = block(vec![]);
        let mut p = principal(&[9]);
        assert!(verify_access(&p, &b, AccessType::Owner, Utc::now()).is_err());
        p.admin = true;
        assert!(verify_access(&p, &b, AccessType::Owner, Utc::now()).is_ok());
    }

    #[test]
    fn rights_for_anonymous_viewer() {
        let b = block(vec![AccessEntry::permanent(2, AccessType::View)]);
        let anon = Principal::anonymous([2].into_iter().collect());
        let rights = Rights::evaluate(&anon, &b, Utc::now());
        assert!(!rights.editable);
        assert!(!rights.can_mark_as_read);
        assert!(!rights.owner);
    }
}
