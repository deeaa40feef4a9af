// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access-control predicates over wings and sessions.
//!
//! These are pure: org membership arrives pre-resolved on the [`User`]
//! (stamped at session validation), so every check here is a plain function
//! usable from any handler without a store round-trip.

use crate::identity::{OrgRole, User};
use crate::registry::WingInfo;

pub fn is_owner(user_id: &str, info: &WingInfo) -> bool {
    info.user_id == user_id
}

/// Allow-list match is on email, case-insensitive.
pub fn allow_listed(email: &str, info: &WingInfo) -> bool {
    info.allow_emails.iter().any(|e| e.eq_ignore_ascii_case(email))
}

fn org_member(user: &User, info: &WingInfo) -> bool {
    info.org_id.as_ref().is_some_and(|org| user.org_ids.contains(org))
}

/// Owner, org member, or allow-listed.
pub fn can_access_wing(user: &User, info: &WingInfo) -> bool {
    is_owner(&user.id, info) || org_member(user, info) || allow_listed(&user.email, info)
}

/// Session owner, or anyone who can access the session's wing.
pub fn can_access_session(user: &User, session_owner: &str, wing: Option<&WingInfo>) -> bool {
    user.id == session_owner || wing.is_some_and(|info| can_access_wing(user, info))
}

/// Label ops and lock-state mutations: wing owner or org owner/admin.
pub fn can_manage_wing(user: &User, info: &WingInfo, org_role: Option<OrgRole>) -> bool {
    is_owner(&user.id, info) || org_role.is_some_and(|r| r.can_manage())
}

/// The caller's role string injected into tunnel envelopes.
pub fn org_role_label(user: &User, info: &WingInfo) -> &'static str {
    if is_owner(&user.id, info) {
        "owner"
    } else if org_member(user, info) {
        "member"
    } else {
        ""
    }
}

#[cfg(test)]
#[path = "access_tests.rs"]
mod tests;
