// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory table of locally attached wings plus the dashboard subscriber
//! fan-out.
//!
//! Subscribers are dual-indexed by user and by org so a fan-out touches only
//! the handles that can legally see the event, never the whole table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Events a subscriber must be able to buffer without blocking the relay.
pub const SUBSCRIBER_DEPTH: usize = 16;

/// Everything the browser dashboard renders about a wing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WingInfo {
    pub wing_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_slug: Option<String>,
    pub public_key: String,
    pub locked: bool,
    pub allowed_count: u32,
    pub platform: String,
    pub version: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub allow_emails: Vec<String>,
}

/// A point-in-time view of a wing, as shipped to dashboards and peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WingSnapshot {
    pub conn_id: String,
    #[serde(flatten)]
    pub info: WingInfo,
    pub last_seen_secs: u64,
}

/// A locally connected wing. Owned by its handler task; the registry holds a
/// back-reference for lookup only.
pub struct Wing {
    /// Fresh per TCP connection.
    pub conn_id: String,
    pub user_id: String,
    /// Serialized frames headed for the wing socket. Writes are serialized
    /// by the wing's writer task.
    pub outbound: mpsc::Sender<String>,
    pub cancel: CancellationToken,
    pub info: RwLock<WingInfo>,
    last_seen: Mutex<Instant>,
    /// Registration order, for preferring the newest duplicate `wing_id`
    /// during a reconnect window.
    seq: AtomicU64,
}

impl Wing {
    pub fn new(
        user_id: impl Into<String>,
        info: WingInfo,
        outbound: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conn_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            outbound,
            cancel,
            info: RwLock::new(info),
            last_seen: Mutex::new(Instant::now()),
            seq: AtomicU64::new(0),
        }
    }

    pub async fn touch(&self) {
        *self.last_seen.lock().await = Instant::now();
    }

    pub async fn last_seen_secs(&self) -> u64 {
        self.last_seen.lock().await.elapsed().as_secs()
    }

    pub async fn snapshot(&self) -> WingSnapshot {
        WingSnapshot {
            conn_id: self.conn_id.clone(),
            info: self.info.read().await.clone(),
            last_seen_secs: self.last_seen_secs().await,
        }
    }
}

/// Dashboard-bound lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WingEvent {
    #[serde(rename = "wing.online")]
    Online { wing: WingSnapshot },
    #[serde(rename = "wing.offline")]
    Offline { conn_id: String, wing_id: String },
    #[serde(rename = "wing.config")]
    Config { wing: WingSnapshot },
    #[serde(rename = "session.attention")]
    Attention { session_id: String, wing_id: String },
}

#[derive(Clone)]
struct SubHandle {
    id: u64,
    tx: mpsc::Sender<WingEvent>,
}

struct SubMeta {
    user_id: String,
    org_ids: Vec<String>,
    tx: mpsc::Sender<WingEvent>,
}

#[derive(Default)]
struct SubIndex {
    by_user: HashMap<String, Vec<SubHandle>>,
    by_org: HashMap<String, Vec<SubHandle>>,
    meta: HashMap<u64, SubMeta>,
}

impl SubIndex {
    fn detach(&mut self, id: u64) -> Option<SubMeta> {
        let meta = self.meta.remove(&id)?;
        if let Some(handles) = self.by_user.get_mut(&meta.user_id) {
            handles.retain(|h| h.id != id);
            if handles.is_empty() {
                self.by_user.remove(&meta.user_id);
            }
        }
        for org in &meta.org_ids {
            if let Some(handles) = self.by_org.get_mut(org) {
                handles.retain(|h| h.id != id);
                if handles.is_empty() {
                    self.by_org.remove(org);
                }
            }
        }
        Some(meta)
    }

    fn attach(&mut self, id: u64, user_id: String, org_ids: Vec<String>, tx: mpsc::Sender<WingEvent>) {
        let handle = SubHandle { id, tx: tx.clone() };
        self.by_user.entry(user_id.clone()).or_default().push(handle.clone());
        for org in &org_ids {
            self.by_org.entry(org.clone()).or_default().push(handle.clone());
        }
        self.meta.insert(id, SubMeta { user_id, org_ids, tx });
    }
}

/// Registry of local wings plus the subscriber table.
pub struct WingRegistry {
    wings: RwLock<HashMap<String, Arc<Wing>>>,
    subs: RwLock<SubIndex>,
    next_seq: AtomicU64,
    next_sub: AtomicU64,
}

impl Default for WingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WingRegistry {
    pub fn new() -> Self {
        Self {
            wings: RwLock::new(HashMap::new()),
            subs: RwLock::new(SubIndex::default()),
            next_seq: AtomicU64::new(1),
            next_sub: AtomicU64::new(1),
        }
    }

    pub async fn add(&self, wing: Arc<Wing>) {
        wing.seq.store(self.next_seq.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        self.wings.write().await.insert(wing.conn_id.clone(), wing);
    }

    pub async fn remove(&self, conn_id: &str) -> Option<Arc<Wing>> {
        self.wings.write().await.remove(conn_id)
    }

    pub async fn find_by_conn_id(&self, conn_id: &str) -> Option<Arc<Wing>> {
        self.wings.read().await.get(conn_id).map(Arc::clone)
    }

    /// O(n) scan by stable wing id. A `wing_id` may briefly appear twice
    /// during reconnect; the newest registration wins.
    pub async fn find_by_wing_id(&self, wing_id: &str) -> Option<Arc<Wing>> {
        let wings = self.wings.read().await;
        let mut best: Option<&Arc<Wing>> = None;
        for wing in wings.values() {
            if wing.info.read().await.wing_id == wing_id {
                let newer = match best {
                    Some(b) => {
                        wing.seq.load(Ordering::Relaxed) > b.seq.load(Ordering::Relaxed)
                    }
                    None => true,
                };
                if newer {
                    best = Some(wing);
                }
            }
        }
        best.map(Arc::clone)
    }

    pub async fn count_for_user(&self, user_id: &str) -> usize {
        self.wings.read().await.values().filter(|w| w.user_id == user_id).count()
    }

    pub async fn local_wings(&self) -> Vec<Arc<Wing>> {
        self.wings.read().await.values().map(Arc::clone).collect()
    }

    /// Register a dashboard subscriber. The channel must buffer at least
    /// [`SUBSCRIBER_DEPTH`] events; a full channel drops events for that
    /// subscriber only.
    pub async fn subscribe(
        &self,
        user_id: impl Into<String>,
        org_ids: Vec<String>,
        tx: mpsc::Sender<WingEvent>,
    ) -> u64 {
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        self.subs.write().await.attach(id, user_id.into(), org_ids, tx);
        id
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.subs.write().await.detach(id);
    }

    /// Re-index a subscriber whose org memberships changed, keeping the
    /// two maps in lock-step.
    pub async fn update_user_orgs(&self, id: u64, org_ids: Vec<String>) {
        let mut subs = self.subs.write().await;
        if let Some(meta) = subs.detach(id) {
            subs.attach(id, meta.user_id, org_ids, meta.tx);
        }
    }

    /// Deliver to all subscribers of `owner_id` plus all subscribers of
    /// `org_id`, deduplicating when the owner is also an org member.
    /// Delivery never blocks: a full channel drops the event.
    pub async fn notify_wing(&self, owner_id: &str, org_id: Option<&str>, event: WingEvent) {
        let targets: Vec<SubHandle> = {
            let subs = self.subs.read().await;
            let mut seen = std::collections::HashSet::new();
            let mut out = Vec::new();
            if let Some(handles) = subs.by_user.get(owner_id) {
                for h in handles {
                    if seen.insert(h.id) {
                        out.push(h.clone());
                    }
                }
            }
            if let Some(org) = org_id {
                if let Some(handles) = subs.by_org.get(org) {
                    for h in handles {
                        if seen.insert(h.id) {
                            out.push(h.clone());
                        }
                    }
                }
            }
            out
        };

        for handle in targets {
            if handle.tx.try_send(event.clone()).is_err() {
                tracing::debug!(sub_id = handle.id, "subscriber channel full, dropping event");
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
