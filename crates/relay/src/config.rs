// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Which part a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum NodeRole {
    /// Authoritative node: identity, cluster union, bandwidth persistence.
    Login,
    /// Relay-only node syncing against the login node.
    Edge,
}

/// Configuration for the roost relay.
#[derive(Debug, Clone, clap::Parser)]
pub struct RelayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "ROOST_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9700, env = "ROOST_PORT")]
    pub port: u16,

    /// Cluster role. Unset means single-node mode: no sync loop, internal
    /// auth disabled, all lookups served locally.
    #[arg(long, value_enum, env = "ROOST_ROLE")]
    pub role: Option<NodeRole>,

    /// Stable identifier for this node within the cluster.
    #[arg(long, default_value = "local", env = "ROOST_NODE_ID")]
    pub node_id: String,

    /// Host-proxy machine identifier used in `fly-replay` headers. Falls back
    /// to `node_id` when the proxy does not assign one.
    #[arg(long, env = "FLY_MACHINE_ID")]
    pub machine_id: Option<String>,

    /// Base URL of the login node (edges only), e.g. `http://login.internal:9700`.
    #[arg(long, env = "ROOST_LOGIN_URL")]
    pub login_url: Option<String>,

    /// Shared secret accepted by `/internal/*` endpoints via `X-Internal-Secret`.
    #[arg(long, env = "ROOST_INTERNAL_SECRET")]
    pub internal_secret: Option<String>,

    /// HMAC secret for wing JWTs. Process-wide; generated at first boot by the
    /// identity store and shared across nodes.
    #[arg(long, env = "ROOST_JWT_SECRET", default_value = "")]
    pub jwt_secret: String,

    /// Cluster sync tick in milliseconds (edges push full state this often).
    #[arg(long, default_value_t = 1000, env = "ROOST_SYNC_INTERVAL_MS")]
    pub sync_interval_ms: u64,

    /// Silence after which the login node drops an edge's wings.
    #[arg(long, default_value_t = 10_000, env = "ROOST_NODE_EXPIRY_MS")]
    pub node_expiry_ms: u64,

    /// Attempts when waiting for a wing to appear before giving up.
    #[arg(long, default_value_t = 10, env = "ROOST_HANDOFF_ATTEMPTS")]
    pub handoff_attempts: u32,

    /// Delay between wait-for-wing attempts in milliseconds.
    #[arg(long, default_value_t = 500, env = "ROOST_HANDOFF_DELAY_MS")]
    pub handoff_delay_ms: u64,

    /// TTL for cached session-token validations in seconds.
    #[arg(long, default_value_t = 300, env = "ROOST_SESSION_CACHE_TTL_SECS")]
    pub session_cache_ttl_secs: u64,

    /// Sustained per-IP request rate at the HTTP edge.
    #[arg(long, default_value_t = 10.0, env = "ROOST_IP_RPS")]
    pub ip_rps: f64,

    /// Per-IP burst allowance.
    #[arg(long, default_value_t = 30, env = "ROOST_IP_BURST")]
    pub ip_burst: u32,

    /// Sustained per-user relayed bytes per second.
    #[arg(long, default_value_t = 1_048_576, env = "ROOST_BYTES_PER_SEC")]
    pub bytes_per_sec: u64,

    /// Per-user byte burst allowance.
    #[arg(long, default_value_t = 4_194_304, env = "ROOST_BYTES_BURST")]
    pub bytes_burst: u64,

    /// Monthly relayed-byte cap for free-tier users.
    #[arg(long, default_value_t = 10_737_418_240, env = "ROOST_FREE_TIER_CAP")]
    pub free_tier_cap: u64,

    /// Interval for draining bandwidth counters into the identity store
    /// (login node only).
    #[arg(long, default_value_t = 60_000, env = "ROOST_BANDWIDTH_DRAIN_MS")]
    pub bandwidth_drain_ms: u64,
}

impl RelayConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn node_expiry(&self) -> Duration {
        Duration::from_millis(self.node_expiry_ms)
    }

    pub fn handoff_delay(&self) -> Duration {
        Duration::from_millis(self.handoff_delay_ms)
    }

    pub fn session_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.session_cache_ttl_secs)
    }

    pub fn bandwidth_drain_interval(&self) -> Duration {
        Duration::from_millis(self.bandwidth_drain_ms)
    }

    /// Identifier the fronting proxy understands for request replay.
    pub fn replay_target(&self) -> &str {
        self.machine_id.as_deref().unwrap_or(&self.node_id)
    }

    pub fn is_login(&self) -> bool {
        matches!(self.role, Some(NodeRole::Login))
    }

    pub fn is_edge(&self) -> bool {
        matches!(self.role, Some(NodeRole::Edge))
    }

    /// Single-node deployments skip internal auth and cluster sync entirely.
    pub fn is_single_node(&self) -> bool {
        self.role.is_none()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
