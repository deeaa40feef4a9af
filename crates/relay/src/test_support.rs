// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders, fixtures, and a seedable identity
//! store.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::identity::memory::MemoryIdentity;
use crate::identity::{Org, OrgRole, Tier, User};
use crate::registry::{Wing, WingInfo};
use crate::routing::BrowserHandle;
use crate::state::RelayState;

/// Extension trait to convert any `Display` error into `anyhow::Error`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

pub fn test_user(id: &str, email: &str, tier: Tier, org_ids: &[&str]) -> User {
    User {
        id: id.to_owned(),
        email: email.to_owned(),
        display_name: id.to_owned(),
        tier,
        org_ids: org_ids.iter().map(|s| (*s).to_owned()).collect(),
    }
}

pub fn test_info(wing_id: &str, user_id: &str, org_id: Option<&str>) -> WingInfo {
    WingInfo {
        wing_id: wing_id.to_owned(),
        user_id: user_id.to_owned(),
        org_id: org_id.map(str::to_owned),
        org_slug: None,
        public_key: "pk".to_owned(),
        locked: false,
        allowed_count: 0,
        platform: "linux".to_owned(),
        version: "1.0.0".to_owned(),
        agents: vec!["shell".to_owned()],
        labels: vec![],
        projects: vec![],
        allow_emails: vec![],
    }
}

/// Build a wing whose outbound frames land in the returned receiver.
pub fn test_wing(
    wing_id: &str,
    user_id: &str,
    org_id: Option<&str>,
) -> (Arc<Wing>, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(64);
    let wing = Arc::new(Wing::new(
        user_id,
        test_info(wing_id, user_id, org_id),
        tx,
        CancellationToken::new(),
    ));
    (wing, rx)
}

/// A browser write-half wired to a test receiver.
pub fn browser_handle() -> (BrowserHandle, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(64);
    (BrowserHandle { tx, cancel: CancellationToken::new() }, rx)
}

/// Default single-node config for tests.
pub fn test_config() -> RelayConfig {
    use clap::Parser;
    // Parse from an empty arg list so clap fills every default.
    RelayConfig::parse_from(["roost"])
}

/// Identity store pre-seeded with the scenario-1 cast: an org owner, a
/// member, and an outsider.
pub fn seeded_identity() -> Arc<MemoryIdentity> {
    let identity = MemoryIdentity::new();
    identity.add_org(Org { id: "org-1".to_owned(), slug: "acme".to_owned() });
    identity.add_user(
        test_user("owner-1", "owner@acme.dev", Tier::Pro, &["org-1"]),
        "tok-owner",
    );
    identity.add_user(
        test_user("member-1", "member@acme.dev", Tier::Free, &["org-1"]),
        "tok-member",
    );
    identity.add_user(test_user("outsider-1", "out@else.dev", Tier::Free, &[]), "tok-outsider");
    identity.set_org_role("org-1", "owner-1", OrgRole::Owner);
    identity.set_org_role("org-1", "member-1", OrgRole::Member);
    Arc::new(identity)
}

/// Single-node relay state over a seeded identity store.
pub fn test_state() -> Arc<RelayState> {
    let identity = seeded_identity();
    Arc::new(RelayState::new(test_config(), Some(identity), None))
}

/// Relay state with a specific config (role, node id, login url).
pub fn test_state_with(config: RelayConfig) -> Arc<RelayState> {
    let identity = seeded_identity();
    Arc::new(RelayState::new(config, Some(identity), None))
}
