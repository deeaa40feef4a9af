// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire envelope types for the wing and browser WebSocket protocols.
//!
//! The relay interprets only the control frames it must act on
//! (`wing.register`, `pty.start`, ...). Everything else is routed off a
//! light [`FrameHead`] and forwarded verbatim, payload untouched.

use serde::{Deserialize, Serialize};

/// Minimal routing view of any inbound envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameHead {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Parse just enough of a frame to route it. Malformed frames yield `None`
/// and are dropped by the caller without tearing the socket.
pub fn parse_head(text: &str) -> Option<FrameHead> {
    serde_json::from_str(text).ok()
}

/// First frame a wing must send after upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterFrame {
    pub wing_id: String,
    #[serde(default)]
    pub org_slug: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub allowed_count: u32,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub allow_emails: Vec<String>,
}

/// Partial update carried by `wing.config`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFrame {
    #[serde(default)]
    pub locked: Option<bool>,
    #[serde(default)]
    pub allowed_count: Option<u32>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub projects: Option<Vec<String>>,
    #[serde(default)]
    pub allow_emails: Option<Vec<String>>,
}

/// `pty.start` from a browser.
#[derive(Debug, Clone, Deserialize)]
pub struct PtyStartFrame {
    #[serde(default)]
    pub wing_id: Option<String>,
    pub agent: String,
    #[serde(default)]
    pub cwd: Option<String>,
}

/// `pty.attach` from a browser.
#[derive(Debug, Clone, Deserialize)]
pub struct PtyAttachFrame {
    pub session_id: String,
    #[serde(default)]
    pub wing_id: Option<String>,
}

/// `chat.start` from a browser. Chat sessions have no working directory.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStartFrame {
    #[serde(default)]
    pub wing_id: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

/// Relay-originated frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "wing.registered")]
    Registered { wing_id: String },
    #[serde(rename = "wing.offline")]
    WingOffline { wing_id: String },
    #[serde(rename = "bandwidth.exceeded")]
    BandwidthExceeded { message: String },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn error(code: crate::error::RelayError, message: impl Into<String>) -> Self {
        Self::Error { code: code.as_str().to_owned(), message: message.into() }
    }
}

/// Inject the caller's verified identity into a tunnel envelope. Clients
/// never get to self-assert these fields; whatever they sent is overwritten.
pub fn inject_tunnel_identity(
    mut frame: serde_json::Value,
    user_id: &str,
    email: &str,
    org_role: &str,
) -> serde_json::Value {
    if let Some(obj) = frame.as_object_mut() {
        obj.insert("sender_user_id".to_owned(), user_id.into());
        obj.insert("sender_email".to_owned(), email.into());
        obj.insert("sender_org_role".to_owned(), org_role.into());
    }
    frame
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
