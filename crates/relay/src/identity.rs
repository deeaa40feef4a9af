// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Contracts consumed by the relay core. The relational store behind them and
//! the push-notification client are separate services; the relay only ever
//! talks to these traits.

use serde::{Deserialize, Serialize};

/// Entitlement tier for bandwidth accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
}

/// Role within an org, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
}

impl OrgRole {
    /// Label ops and lock-state mutations require this tier.
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

/// An authenticated user as the relay sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub tier: Tier,
    #[serde(default)]
    pub org_ids: Vec<String>,
}

/// An org resolved from its slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Org {
    pub id: String,
    pub slug: String,
}

/// Scope of a wing label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelScope {
    User,
    Org,
}

/// The identity store the login node is wired to. Edges reach most of these
/// indirectly over `/internal/*`.
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    /// Resolve an opaque session or wing token to its user.
    async fn validate_token(&self, token: &str) -> anyhow::Result<Option<User>>;

    async fn user_by_id(&self, user_id: &str) -> anyhow::Result<Option<User>>;

    async fn is_org_member(&self, org_id: &str, user_id: &str) -> anyhow::Result<bool>;

    async fn org_member_role(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<OrgRole>>;

    async fn org_by_slug(&self, slug: &str) -> anyhow::Result<Option<Org>>;

    async fn user_tier(&self, user_id: &str) -> anyhow::Result<Tier>;

    /// Entitlement CRUD used by the upgrade/downgrade pass-throughs.
    async fn set_tier(&self, user_id: &str, tier: Tier) -> anyhow::Result<()>;

    /// Upsert into the monthly bandwidth roll-up. `month` is `YYYY-MM` UTC.
    async fn record_bandwidth(
        &self,
        user_id: &str,
        month: &str,
        bytes: u64,
    ) -> anyhow::Result<()>;

    async fn put_label(
        &self,
        wing_id: &str,
        user_id: &str,
        scope: LabelScope,
        label: &str,
    ) -> anyhow::Result<()>;

    async fn delete_label(
        &self,
        wing_id: &str,
        user_id: &str,
        scope: LabelScope,
    ) -> anyhow::Result<()>;
}

/// Exit-notification hook. The concrete client (ntfy etc.) lives outside the
/// relay; a node without one simply does not notify.
pub trait Notifier: Send + Sync {
    fn session_exited(&self, user_id: &str, wing_id: &str, session_id: &str);
}

/// Current month in UTC, as the bandwidth roll-up key.
pub fn month_utc() -> String {
    chrono::Utc::now().format("%Y-%m").to_string()
}

#[path = "identity_memory.rs"]
pub mod memory;
