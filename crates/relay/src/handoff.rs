// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-node routing decision, taken before the WebSocket handshake.
//!
//! If the target wing lives on another node the response carries a
//! `fly-replay` header and no upgrade happens; the fronting proxy reissues
//! the request against the right machine.

use crate::state::RelayState;

/// Response header the host proxy interprets as "resend this request there".
pub const FLY_REPLAY_HEADER: &str = "fly-replay";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// The wing is attached to this node: proceed with the upgrade.
    Local,
    /// The wing is on the named machine: reply with `fly-replay`.
    Replay(String),
    /// Nowhere in the cluster after the full wait: 404 with `retry: true`.
    NotFound,
}

/// Locate `wing_id`, waiting out reconnects and mid-cycle syncs.
///
/// Polls the local registry and the peer directory up to the configured
/// attempt budget, waking early when a sync lands.
pub async fn decide(state: &RelayState, wing_id: &str) -> RouteDecision {
    let mut updates = state.peers.subscribe_updates();
    updates.borrow_and_update();

    let attempts = state.config.handoff_attempts.max(1);
    for attempt in 0..attempts {
        if state.registry.find_by_wing_id(wing_id).await.is_some() {
            return RouteDecision::Local;
        }
        if let Some(peer) = state.peers.find_by_wing_id(wing_id).await {
            // A peer entry for ourselves means the directory lags a local
            // registration race; treat it as local.
            if peer.node_id == state.config.replay_target() {
                return RouteDecision::Local;
            }
            return RouteDecision::Replay(peer.node_id);
        }
        if attempt + 1 < attempts {
            tokio::select! {
                _ = updates.changed() => {}
                _ = tokio::time::sleep(state.config.handoff_delay()) => {}
            }
        }
    }
    RouteDecision::NotFound
}

#[cfg(test)]
#[path = "handoff_tests.rs"]
mod tests;
