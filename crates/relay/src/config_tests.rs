// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use crate::config::{NodeRole, RelayConfig};

#[test]
fn defaults_are_single_node() {
    let config = RelayConfig::parse_from(["roost"]);
    assert!(config.is_single_node());
    assert!(!config.is_login());
    assert!(!config.is_edge());
    assert_eq!(config.sync_interval(), Duration::from_secs(1));
    assert_eq!(config.node_expiry(), Duration::from_secs(10));
    assert_eq!(config.handoff_attempts, 10);
    assert_eq!(config.handoff_delay(), Duration::from_millis(500));
    assert_eq!(config.session_cache_ttl(), Duration::from_secs(300));
}

#[test]
fn role_parses_from_flag() {
    let config = RelayConfig::parse_from(["roost", "--role", "edge"]);
    assert_eq!(config.role, Some(NodeRole::Edge));
    assert!(config.is_edge());

    let config = RelayConfig::parse_from(["roost", "--role", "login"]);
    assert!(config.is_login());
}

#[test]
fn replay_target_prefers_machine_id() {
    let config = RelayConfig::parse_from(["roost", "--node-id", "edge-a"]);
    assert_eq!(config.replay_target(), "edge-a");

    let config =
        RelayConfig::parse_from(["roost", "--node-id", "edge-a", "--machine-id", "m-123"]);
    assert_eq!(config.replay_target(), "m-123");
}
