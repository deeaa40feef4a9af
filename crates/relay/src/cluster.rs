// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster state synchronization.
//!
//! Every edge pushes its full wing list to the login node each tick and gets
//! back everyone else's, so each node converges on the cluster view within
//! one cycle. Nodes that stop syncing are expired after a silence window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::peers::{PeerDiff, PeerWing};
use crate::registry::{WingEvent, WingRegistry};
use crate::state::RelayState;

/// Timeout on the sync POST itself.
pub const SYNC_HTTP_TIMEOUT: Duration = Duration::from_secs(3);

/// Edge → login full-state push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub node_id: String,
    pub wings: Vec<PeerWing>,
    /// Bandwidth counters drained on the edge, absorbed by the login node.
    #[serde(default)]
    pub bandwidth: HashMap<String, u64>,
}

/// Login → edge response: the rest of the cluster plus quota state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub wings: Vec<PeerWing>,
    #[serde(default)]
    pub banned_users: Vec<String>,
    /// Monotonic per-process counter. A regression means the login node
    /// restarted and its cluster view is still warming up.
    pub seq: u64,
}

struct NodeEntry {
    wings: Vec<PeerWing>,
    last_sync: Instant,
}

/// What one sync produced, from the login node's point of view.
pub struct SyncOutcome {
    /// Union of every live node's wings.
    pub all: Vec<PeerWing>,
    /// The union minus the calling node's own wings.
    pub others: Vec<PeerWing>,
}

/// Login-side table of node → wings, expired on silence.
pub struct ClusterState {
    nodes: Mutex<HashMap<String, NodeEntry>>,
    seq: AtomicU64,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterState {
    pub fn new() -> Self {
        Self { nodes: Mutex::new(HashMap::new()), seq: AtomicU64::new(0) }
    }

    /// Replace `node_id`'s wings wholesale, expire silent nodes, and return
    /// the cluster union and its complement for the caller.
    pub async fn sync(
        &self,
        node_id: &str,
        wings: Vec<PeerWing>,
        expiry: Duration,
    ) -> SyncOutcome {
        let mut nodes = self.nodes.lock().await;
        nodes.retain(|_, entry| entry.last_sync.elapsed() < expiry);
        nodes.insert(node_id.to_owned(), NodeEntry { wings, last_sync: Instant::now() });

        let mut all = Vec::new();
        let mut others = Vec::new();
        for (id, entry) in nodes.iter() {
            all.extend(entry.wings.iter().cloned());
            if id != node_id {
                others.extend(entry.wings.iter().cloned());
            }
        }
        SyncOutcome { all, others }
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn node_count(&self, expiry: Duration) -> usize {
        self.nodes.lock().await.values().filter(|e| e.last_sync.elapsed() < expiry).count()
    }
}

/// Fan the diff from a snapshot replacement out to dashboard subscribers.
pub async fn emit_peer_diff(registry: &WingRegistry, diff: &PeerDiff) {
    for peer in &diff.added {
        let owner = peer.wing.info.user_id.clone();
        let org = peer.wing.info.org_id.clone();
        registry
            .notify_wing(&owner, org.as_deref(), WingEvent::Online { wing: peer.wing.clone() })
            .await;
    }
    for peer in &diff.removed {
        let owner = peer.wing.info.user_id.clone();
        let org = peer.wing.info.org_id.clone();
        registry
            .notify_wing(
                &owner,
                org.as_deref(),
                WingEvent::Offline {
                    conn_id: peer.conn_id.clone(),
                    wing_id: peer.wing.info.wing_id.clone(),
                },
            )
            .await;
    }
    for peer in &diff.changed {
        let owner = peer.wing.info.user_id.clone();
        let org = peer.wing.info.org_id.clone();
        registry
            .notify_wing(&owner, org.as_deref(), WingEvent::Config { wing: peer.wing.clone() })
            .await;
    }
}

/// Snapshot the local registry as sync wire entries.
pub async fn snapshot_local(state: &RelayState) -> Vec<PeerWing> {
    let node_id = state.config.replay_target().to_owned();
    let mut out = Vec::new();
    for wing in state.registry.local_wings().await {
        out.push(PeerWing {
            conn_id: wing.conn_id.clone(),
            node_id: node_id.clone(),
            wing: wing.snapshot().await,
        });
    }
    out
}

/// Edge-side loop: push full state to the login node every tick.
///
/// A sync is atomic from the edge's view: the response is applied in full or,
/// on any failure, nothing is applied and the drained bandwidth counters go
/// back into the meter.
pub fn spawn_sync_loop(state: Arc<RelayState>) {
    let Some(login_url) = state.config.login_url.clone() else {
        tracing::warn!("edge role without --login-url, cluster sync disabled");
        return;
    };

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(state.config.sync_interval());
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_seq: Option<u64> = None;

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let wings = snapshot_local(&state).await;
            let drained = state.bandwidth.drain().await;
            let req = SyncRequest {
                node_id: state.config.node_id.clone(),
                wings,
                bandwidth: drained.clone(),
            };

            let response = push_sync(&state, &login_url, &req).await;
            let resp = match response {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(err = %e, "cluster sync failed, re-enqueueing counters");
                    state.bandwidth.re_add(&drained).await;
                    continue;
                }
            };

            if last_seq.is_some_and(|prev| resp.seq < prev) {
                tracing::info!(seq = resp.seq, "login node restarted, entering stale mode");
                state.peers.mark_stale(state.config.node_expiry()).await;
            }
            last_seq = Some(resp.seq);

            let diff = state.peers.replace(resp.wings).await;
            emit_peer_diff(&state.registry, &diff).await;
            state.bandwidth.set_banned(resp.banned_users).await;
        }
    });
}

async fn push_sync(
    state: &RelayState,
    login_url: &str,
    req: &SyncRequest,
) -> anyhow::Result<SyncResponse> {
    let mut builder = state
        .http
        .post(format!("{login_url}/internal/sync"))
        .timeout(SYNC_HTTP_TIMEOUT)
        .json(req);
    if let Some(secret) = &state.config.internal_secret {
        builder = builder.header("X-Internal-Secret", secret);
    }
    let resp = builder.send().await?.error_for_status()?;
    Ok(resp.json::<SyncResponse>().await?)
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
