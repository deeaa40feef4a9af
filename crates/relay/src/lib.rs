// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Roost: multi-node WebSocket relay between wing agents and browser
//! dashboards.
//!
//! The relay splices PTY and chat traffic without touching payload, meters
//! relayed bytes per user, and keeps a cluster of edge nodes in sync with a
//! login node so any edge can route a browser to the right wing.

pub mod access;
pub mod bandwidth;
pub mod cluster;
pub mod config;
pub mod error;
pub mod handoff;
pub mod identity;
pub mod limiter;
pub mod peers;
pub mod registry;
pub mod routing;
pub mod state;
pub mod transport;
pub mod validate;

#[cfg(test)]
pub mod test_support;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::RelayConfig;
use crate::identity::{IdentityStore, Notifier};
use crate::state::RelayState;

/// Run the relay until shutdown.
///
/// `identity` must be wired for login and single-node roles; edges reach
/// identity through the login node instead.
pub async fn run(
    config: RelayConfig,
    identity: Option<Arc<dyn IdentityStore>>,
    notifier: Option<Arc<dyn Notifier>>,
) -> anyhow::Result<()> {
    if !config.is_edge() && identity.is_none() {
        anyhow::bail!("login and single-node roles require an identity store");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(RelayState::new(config, identity, notifier));

    limiter::spawn_sweeper(Arc::clone(&state.ip_limiter), state.shutdown.clone());
    if state.config.is_edge() {
        cluster::spawn_sync_loop(Arc::clone(&state));
    }
    if let Some(identity) = state.identity.clone() {
        bandwidth::spawn_drain_loop(
            Arc::clone(&state.bandwidth),
            identity,
            state.config.free_tier_cap,
            state.config.bandwidth_drain_interval(),
            state.shutdown.clone(),
        );
    }

    {
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    let router = transport::build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(node_id = %state.config.node_id, "roost listening on {addr}");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(state.shutdown.clone().cancelled_owned())
    .await?;

    Ok(())
}
