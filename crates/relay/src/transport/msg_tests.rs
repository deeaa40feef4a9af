// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::transport::msg::{
    inject_tunnel_identity, parse_head, RegisterFrame, ServerFrame,
};

#[test]
fn head_routes_on_type_and_ids() -> anyhow::Result<()> {
    let head = parse_head(r#"{"type":"pty.input","session_id":"abc12345","data":"eA=="}"#)
        .ok_or_else(|| anyhow::anyhow!("no head"))?;
    assert_eq!(head.kind, "pty.input");
    assert_eq!(head.session_id.as_deref(), Some("abc12345"));
    assert_eq!(head.request_id, None);
    Ok(())
}

#[test]
fn malformed_frames_yield_none() {
    assert!(parse_head("not json").is_none());
    assert!(parse_head(r#"{"no_type":true}"#).is_none());
    assert!(parse_head("").is_none());
}

#[test]
fn register_frame_tolerates_missing_fields() -> anyhow::Result<()> {
    let reg: RegisterFrame =
        serde_json::from_str(r#"{"type":"wing.register","wing_id":"w-1"}"#)?;
    assert_eq!(reg.wing_id, "w-1");
    assert_eq!(reg.org_slug, None);
    assert!(!reg.locked);
    assert_eq!(reg.allowed_count, 0);
    assert!(reg.agents.is_empty());
    Ok(())
}

#[test]
fn server_frames_use_dotted_type_tags() {
    let json = ServerFrame::Registered { wing_id: "conn-1".to_owned() }.to_json();
    assert!(json.contains(r#""type":"wing.registered""#), "got: {json}");

    let json =
        ServerFrame::BandwidthExceeded { message: "over quota".to_owned() }.to_json();
    assert!(json.contains(r#""type":"bandwidth.exceeded""#), "got: {json}");

    let json = ServerFrame::WingOffline { wing_id: "w-1".to_owned() }.to_json();
    assert!(json.contains(r#""type":"wing.offline""#), "got: {json}");
}

#[test]
fn tunnel_identity_overrides_client_assertions() -> anyhow::Result<()> {
    // A client trying to spoof its identity gets overwritten.
    let spoofed: serde_json::Value = serde_json::from_str(
        r#"{"type":"tunnel.request","request_id":"r1","wing_id":"w1",
            "sender_user_id":"admin","sender_email":"admin@root","sender_org_role":"owner"}"#,
    )?;
    let injected = inject_tunnel_identity(spoofed, "u-real", "real@x.dev", "member");
    assert_eq!(injected["sender_user_id"], "u-real");
    assert_eq!(injected["sender_email"], "real@x.dev");
    assert_eq!(injected["sender_org_role"], "member");
    // Payload fields survive untouched.
    assert_eq!(injected["request_id"], "r1");
    Ok(())
}
