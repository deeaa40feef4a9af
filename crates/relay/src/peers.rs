// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-mostly snapshot of wings attached to other nodes.
//!
//! The sync loop replaces the whole map every cycle; the diff against the
//! previous snapshot drives `wing.online/offline/config` fan-out. Equality
//! is on `conn_id`, so a wing reconnect shows up as an add+remove pair.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::registry::WingSnapshot;

/// A wing on some other node, as carried by the sync protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerWing {
    pub conn_id: String,
    pub node_id: String,
    pub wing: WingSnapshot,
}

/// Result of one snapshot replacement.
#[derive(Debug, Default)]
pub struct PeerDiff {
    pub added: Vec<PeerWing>,
    pub removed: Vec<PeerWing>,
    /// Present in both snapshots but with a different `locked` or
    /// `allowed_count`.
    pub changed: Vec<PeerWing>,
}

impl PeerDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Directory of remote wings, replaced wholesale by the sync loop.
pub struct PeerDirectory {
    inner: Mutex<HashMap<String, PeerWing>>,
    update_tx: watch::Sender<u64>,
    /// While set, removals are suppressed from diffs. Entered when the login
    /// node restarts mid-flight and its first responses would otherwise
    /// flash every remote wing offline.
    stale_until: Mutex<Option<Instant>>,
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerDirectory {
    pub fn new() -> Self {
        let (update_tx, _) = watch::channel(0);
        Self { inner: Mutex::new(HashMap::new()), update_tx, stale_until: Mutex::new(None) }
    }

    /// Wakes whenever the directory content changes, so wait-for-wing loops
    /// need not poll blind.
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.update_tx.subscribe()
    }

    /// Atomically swap in a full snapshot and report what changed.
    pub async fn replace(&self, snapshot: Vec<PeerWing>) -> PeerDiff {
        let next: HashMap<String, PeerWing> =
            snapshot.into_iter().map(|p| (p.conn_id.clone(), p)).collect();

        let mut inner = self.inner.lock().await;
        let mut diff = PeerDiff::default();
        for (conn_id, peer) in &next {
            match inner.get(conn_id) {
                None => diff.added.push(peer.clone()),
                Some(prev) => {
                    if prev.wing.info.locked != peer.wing.info.locked
                        || prev.wing.info.allowed_count != peer.wing.info.allowed_count
                    {
                        diff.changed.push(peer.clone());
                    }
                }
            }
        }
        for (conn_id, peer) in inner.iter() {
            if !next.contains_key(conn_id) {
                diff.removed.push(peer.clone());
            }
        }
        *inner = next;
        drop(inner);

        if self.in_stale_window().await {
            diff.removed.clear();
        }

        if !diff.is_empty() {
            self.update_tx.send_modify(|gen| *gen += 1);
        }
        diff
    }

    /// Enter stale mode for `window`: removals stop producing offline events
    /// until the login node has had time to re-learn the cluster.
    pub async fn mark_stale(&self, window: Duration) {
        *self.stale_until.lock().await = Some(Instant::now() + window);
    }

    async fn in_stale_window(&self) -> bool {
        let mut stale = self.stale_until.lock().await;
        match *stale {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *stale = None;
                false
            }
            None => false,
        }
    }

    pub async fn find_by_conn_id(&self, conn_id: &str) -> Option<PeerWing> {
        self.inner.lock().await.get(conn_id).cloned()
    }

    pub async fn find_by_wing_id(&self, wing_id: &str) -> Option<PeerWing> {
        self.inner
            .lock()
            .await
            .values()
            .find(|p| p.wing.info.wing_id == wing_id)
            .cloned()
    }

    pub async fn count_for_user(&self, user_id: &str) -> usize {
        self.inner.lock().await.values().filter(|p| p.wing.info.user_id == user_id).count()
    }

    pub async fn all(&self) -> Vec<PeerWing> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
#[path = "peers_tests.rs"]
mod tests;
