// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared relay state and the cross-node lookups built on it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bandwidth::BandwidthMeter;
use crate::cluster::ClusterState;
use crate::config::RelayConfig;
use crate::identity::{IdentityStore, Notifier, User};
use crate::limiter::IpRateLimiter;
use crate::peers::PeerDirectory;
use crate::registry::{WingEvent, WingRegistry, WingSnapshot};
use crate::routing::{RouteTable, TunnelTable};
use crate::validate::SessionCache;

/// Timeout on session validation calls to the login node.
pub const SESSION_VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire form of a validated session on `/internal/sessions/{token}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    pub display_name: String,
    pub tier: crate::identity::Tier,
    #[serde(default)]
    pub org_ids: Vec<String>,
}

impl From<User> for SessionUser {
    fn from(u: User) -> Self {
        Self {
            user_id: u.id,
            email: u.email,
            display_name: u.display_name,
            tier: u.tier,
            org_ids: u.org_ids,
        }
    }
}

impl From<SessionUser> for User {
    fn from(s: SessionUser) -> Self {
        Self {
            id: s.user_id,
            email: s.email,
            display_name: s.display_name,
            tier: s.tier,
            org_ids: s.org_ids,
        }
    }
}

/// Result of `/internal/org-check/{slug}/{user_id}`: `ok` only when the user
/// may register org-scoped wings (owner or admin).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgCheckResponse {
    pub ok: bool,
    #[serde(default)]
    pub org_id: Option<String>,
}

/// One entry of the accessible-wings listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WingListEntry {
    #[serde(flatten)]
    pub wing: WingSnapshot,
    pub node_id: String,
}

pub struct RelayState {
    pub config: RelayConfig,
    pub shutdown: CancellationToken,
    /// Wired on login and single-node deployments; edges hold `None` and
    /// reach identity through `/internal/*`.
    pub identity: Option<Arc<dyn IdentityStore>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub registry: WingRegistry,
    pub routes: RouteTable,
    pub tunnels: TunnelTable,
    pub peers: PeerDirectory,
    pub cluster: ClusterState,
    pub bandwidth: Arc<BandwidthMeter>,
    pub ip_limiter: Arc<IpRateLimiter>,
    pub sessions: SessionCache,
    pub http: reqwest::Client,
}

impl RelayState {
    pub fn new(
        config: RelayConfig,
        identity: Option<Arc<dyn IdentityStore>>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let bandwidth =
            Arc::new(BandwidthMeter::new(config.bytes_per_sec, config.bytes_burst));
        let ip_limiter = Arc::new(IpRateLimiter::new(config.ip_rps, config.ip_burst));
        let sessions = SessionCache::new(config.session_cache_ttl());
        Self {
            config,
            shutdown: CancellationToken::new(),
            identity,
            notifier,
            registry: WingRegistry::new(),
            routes: RouteTable::new(),
            tunnels: TunnelTable::new(),
            peers: PeerDirectory::new(),
            cluster: ClusterState::new(),
            bandwidth,
            ip_limiter,
            sessions,
            http: reqwest::Client::new(),
        }
    }

    /// Resolve a session token to its user, through the cache. Edges fetch
    /// from the login node; login and single-node ask the identity store.
    pub async fn validate_session(&self, token: &str) -> Option<User> {
        if token.is_empty() {
            return None;
        }
        self.sessions
            .get_or_fetch(token, || async {
                if self.config.is_edge() {
                    self.fetch_session_from_login(token).await
                } else {
                    match &self.identity {
                        Some(identity) => identity.validate_token(token).await,
                        None => Ok(None),
                    }
                }
            })
            .await
    }

    async fn fetch_session_from_login(&self, token: &str) -> anyhow::Result<Option<User>> {
        let Some(login_url) = &self.config.login_url else {
            anyhow::bail!("edge has no login url configured");
        };
        let mut builder = self
            .http
            .get(format!("{login_url}/internal/sessions/{token}"))
            .timeout(SESSION_VALIDATE_TIMEOUT);
        if let Some(secret) = &self.config.internal_secret {
            builder = builder.header("X-Internal-Secret", secret);
        }
        let resp = builder.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        Ok(Some(resp.json::<SessionUser>().await?.into()))
    }

    /// May `user_id` register org-scoped wings under `slug`? Owner/admin
    /// only; resolved locally on login, delegated over HTTP from edges.
    pub async fn org_check(&self, slug: &str, user_id: &str) -> Option<String> {
        if self.config.is_edge() {
            return self.org_check_via_login(slug, user_id).await;
        }
        let identity = self.identity.as_ref()?;
        let org = identity.org_by_slug(slug).await.ok().flatten()?;
        let role = identity.org_member_role(&org.id, user_id).await.ok().flatten()?;
        role.can_manage().then_some(org.id)
    }

    async fn org_check_via_login(&self, slug: &str, user_id: &str) -> Option<String> {
        let login_url = self.config.login_url.as_ref()?;
        let mut builder = self
            .http
            .get(format!("{login_url}/internal/org-check/{slug}/{user_id}"))
            .timeout(SESSION_VALIDATE_TIMEOUT);
        if let Some(secret) = &self.config.internal_secret {
            builder = builder.header("X-Internal-Secret", secret);
        }
        let resp = builder.send().await.ok()?.error_for_status().ok()?;
        let check = resp.json::<OrgCheckResponse>().await.ok()?;
        check.ok.then_some(check.org_id).flatten()
    }

    /// Fan an event out locally and, from an edge, mirror it to the login
    /// node so its dashboards see it without waiting for a sync diff.
    pub async fn publish_wing_event(&self, owner_id: &str, org_id: Option<&str>, event: WingEvent) {
        self.registry.notify_wing(owner_id, org_id, event.clone()).await;

        if self.config.is_edge() {
            if let Some(login_url) = &self.config.login_url {
                let body = ForwardedWingEvent {
                    owner_id: owner_id.to_owned(),
                    org_id: org_id.map(str::to_owned),
                    event,
                };
                let mut builder = self
                    .http
                    .post(format!("{login_url}/internal/wing-event"))
                    .timeout(SESSION_VALIDATE_TIMEOUT)
                    .json(&body);
                if let Some(secret) = &self.config.internal_secret {
                    builder = builder.header("X-Internal-Secret", secret);
                }
                if let Err(e) = builder.send().await {
                    tracing::debug!(err = %e, "wing-event mirror to login failed");
                }
            }
        }
    }

    /// Wings, local and remote, this user may see.
    pub async fn accessible_wings(&self, user: &User) -> Vec<WingListEntry> {
        let mut out = Vec::new();
        let node_id = self.config.replay_target().to_owned();
        for wing in self.registry.local_wings().await {
            let snapshot = wing.snapshot().await;
            if crate::access::can_access_wing(user, &snapshot.info) {
                out.push(WingListEntry { wing: snapshot, node_id: node_id.clone() });
            }
        }
        for peer in self.peers.all().await {
            if crate::access::can_access_wing(user, &peer.wing.info) {
                out.push(WingListEntry { wing: peer.wing, node_id: peer.node_id });
            }
        }
        out
    }
}

/// Envelope for `/internal/wing-event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardedWingEvent {
    pub owner_id: String,
    #[serde(default)]
    pub org_id: Option<String>,
    pub event: WingEvent,
}
