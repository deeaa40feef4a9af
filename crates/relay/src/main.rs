// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tracing::error;

use roost::config::RelayConfig;
use roost::identity::memory::MemoryIdentity;
use roost::identity::IdentityStore;

#[tokio::main]
async fn main() {
    let config = RelayConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Login and single-node deployments embed an identity store. The
    // in-memory store backs development runs; production wires the
    // relational store through `roost::run` instead.
    let identity: Option<Arc<dyn IdentityStore>> = if config.is_edge() {
        None
    } else {
        Some(Arc::new(MemoryIdentity::new()))
    };

    if let Err(e) = roost::run(config, identity, None).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
