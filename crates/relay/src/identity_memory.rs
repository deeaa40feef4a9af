// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`IdentityStore`] for single-node development deployments and
//! tests. Production login nodes wire the relational store instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::identity::{IdentityStore, LabelScope, Org, OrgRole, Tier, User};

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    tokens: HashMap<String, String>,
    orgs: HashMap<String, Org>,
    roles: HashMap<(String, String), OrgRole>,
    labels: HashMap<(String, LabelScope), String>,
    bandwidth: HashMap<(String, String), u64>,
}

#[derive(Default)]
pub struct MemoryIdentity {
    inner: Mutex<Inner>,
    fail_bandwidth: AtomicBool,
}

fn locked(m: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    m.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User, token: &str) {
        let mut inner = locked(&self.inner);
        inner.tokens.insert(token.to_owned(), user.id.clone());
        inner.users.insert(user.id.clone(), user);
    }

    pub fn add_org(&self, org: Org) {
        locked(&self.inner).orgs.insert(org.id.clone(), org);
    }

    pub fn set_org_role(&self, org_id: &str, user_id: &str, role: OrgRole) {
        locked(&self.inner).roles.insert((org_id.to_owned(), user_id.to_owned()), role);
    }

    /// Test hook: make bandwidth persistence fail until flipped back.
    pub fn fail_bandwidth_writes(&self, fail: bool) {
        self.fail_bandwidth.store(fail, Ordering::Relaxed);
    }

    pub fn bandwidth_total(&self, user_id: &str, month: &str) -> u64 {
        locked(&self.inner)
            .bandwidth
            .get(&(user_id.to_owned(), month.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    pub fn label(&self, wing_id: &str, scope: LabelScope) -> Option<String> {
        locked(&self.inner).labels.get(&(wing_id.to_owned(), scope)).cloned()
    }
}

#[async_trait::async_trait]
impl IdentityStore for MemoryIdentity {
    async fn validate_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        let inner = locked(&self.inner);
        Ok(inner.tokens.get(token).and_then(|id| inner.users.get(id)).cloned())
    }

    async fn user_by_id(&self, user_id: &str) -> anyhow::Result<Option<User>> {
        Ok(locked(&self.inner).users.get(user_id).cloned())
    }

    async fn is_org_member(&self, org_id: &str, user_id: &str) -> anyhow::Result<bool> {
        Ok(locked(&self.inner)
            .roles
            .contains_key(&(org_id.to_owned(), user_id.to_owned())))
    }

    async fn org_member_role(
        &self,
        org_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<OrgRole>> {
        Ok(locked(&self.inner)
            .roles
            .get(&(org_id.to_owned(), user_id.to_owned()))
            .copied())
    }

    async fn org_by_slug(&self, slug: &str) -> anyhow::Result<Option<Org>> {
        Ok(locked(&self.inner).orgs.values().find(|o| o.slug == slug).cloned())
    }

    async fn user_tier(&self, user_id: &str) -> anyhow::Result<Tier> {
        Ok(locked(&self.inner).users.get(user_id).map(|u| u.tier).unwrap_or(Tier::Free))
    }

    async fn set_tier(&self, user_id: &str, tier: Tier) -> anyhow::Result<()> {
        if let Some(user) = locked(&self.inner).users.get_mut(user_id) {
            user.tier = tier;
        }
        Ok(())
    }

    async fn record_bandwidth(
        &self,
        user_id: &str,
        month: &str,
        bytes: u64,
    ) -> anyhow::Result<()> {
        if self.fail_bandwidth.load(Ordering::Relaxed) {
            anyhow::bail!("bandwidth_log unavailable");
        }
        *locked(&self.inner)
            .bandwidth
            .entry((user_id.to_owned(), month.to_owned()))
            .or_insert(0) += bytes;
        Ok(())
    }

    async fn put_label(
        &self,
        wing_id: &str,
        _user_id: &str,
        scope: LabelScope,
        label: &str,
    ) -> anyhow::Result<()> {
        locked(&self.inner)
            .labels
            .insert((wing_id.to_owned(), scope), label.to_owned());
        Ok(())
    }

    async fn delete_label(
        &self,
        wing_id: &str,
        _user_id: &str,
        scope: LabelScope,
    ) -> anyhow::Result<()> {
        locked(&self.inner).labels.remove(&(wing_id.to_owned(), scope));
        Ok(())
    }
}
