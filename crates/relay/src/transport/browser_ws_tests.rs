// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::identity::Tier;
use crate::state::RelayState;
use crate::test_support::{browser_handle, test_state, test_user, test_wing};
use super::dispatch_browser_frame;

async fn state_with_wing(
    wing_id: &str,
    owner: &str,
    org: Option<&str>,
) -> (Arc<RelayState>, mpsc::Receiver<String>) {
    let state = test_state();
    let (wing, rx) = test_wing(wing_id, owner, org);
    state.registry.add(wing).await;
    (state, rx)
}

fn session_id_of(frame: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(frame)
        .ok()?
        .get("session_id")?
        .as_str()
        .map(str::to_owned)
}

#[tokio::test]
async fn pty_start_installs_route_and_stamps_session_id() {
    let (state, mut wing_rx) = state_with_wing("wing-1", "owner-1", None).await;
    let owner = test_user("owner-1", "owner@acme.dev", Tier::Pro, &["org-1"]);
    let (handle, _browser_rx) = browser_handle();

    let raw = r#"{"type":"pty.start","wing_id":"wing-1","agent":"shell","cwd":"/src"}"#;
    let reply = dispatch_browser_frame(&state, &owner, &None, &handle, raw).await;
    assert!(reply.is_none(), "start must not error: {reply:?}");

    let forwarded = wing_rx.recv().await.unwrap_or_default();
    let session_id = session_id_of(&forwarded).unwrap_or_default();
    assert_eq!(session_id.len(), 8, "forwarded frame carries the allocated id");

    let route = state.routes.get(&session_id).await;
    assert!(route.is_some());
    if let Some(route) = route {
        assert_eq!(route.wing_id, "wing-1");
        assert_eq!(route.user_id, "owner-1");
        assert_eq!(route.agent, "shell");
        assert_eq!(route.cwd.as_deref(), Some("/src"));
    }
}

#[tokio::test]
async fn pty_start_denied_for_outsider() {
    let (state, mut wing_rx) = state_with_wing("wing-1", "owner-1", Some("org-1")).await;
    let outsider = test_user("outsider-1", "out@else.dev", Tier::Free, &[]);
    let (handle, _browser_rx) = browser_handle();

    let raw = r#"{"type":"pty.start","wing_id":"wing-1","agent":"shell"}"#;
    let reply = dispatch_browser_frame(&state, &outsider, &None, &handle, raw).await;
    let json = reply.map(|r| r.to_json()).unwrap_or_default();
    assert!(json.contains("FORBIDDEN"), "got: {json}");
    assert!(wing_rx.try_recv().is_err(), "nothing reached the wing");
    assert_eq!(state.routes.len().await, 0);
}

#[tokio::test]
async fn attach_rebinds_session_to_reconnected_wing() {
    // Scenario: session survives its browser closing and its wing
    // reconnecting under the same stable wing_id.
    let (state, mut wing_rx) = state_with_wing("wing-1", "owner-1", None).await;
    let owner = test_user("owner-1", "owner@acme.dev", Tier::Pro, &[]);
    let (first_browser, _rx1) = browser_handle();

    let raw = r#"{"type":"pty.start","wing_id":"wing-1","agent":"shell"}"#;
    dispatch_browser_frame(&state, &owner, &None, &first_browser, raw).await;
    let started = wing_rx.recv().await.unwrap_or_default();
    let session_id = session_id_of(&started).unwrap_or_default();

    // Browser goes away: session detaches.
    state.routes.detach_all(&first_browser.tx).await;

    // Wing reconnects: fresh conn_id, same wing_id.
    let old = state.registry.find_by_wing_id("wing-1").await;
    if let Some(old) = old {
        state.registry.remove(&old.conn_id).await;
    }
    let (new_wing, mut new_wing_rx) = test_wing("wing-1", "owner-1", None);
    state.registry.add(new_wing).await;

    let (second_browser, _rx2) = browser_handle();
    let attach = format!(
        r#"{{"type":"pty.attach","session_id":"{session_id}","wing_id":"wing-1"}}"#
    );
    let reply =
        dispatch_browser_frame(&state, &owner, &None, &second_browser, &attach).await;
    assert!(reply.is_none(), "attach must succeed: {reply:?}");

    // The attach frame reached the *new* wing socket for replay.
    let forwarded = new_wing_rx.recv().await.unwrap_or_default();
    assert!(forwarded.contains(&session_id));

    // And the route is bound to the second browser again.
    let route = state.routes.get(&session_id).await;
    assert!(route.is_some());
    if let Some(route) = route {
        let bound = route.browser().await;
        assert!(bound.is_some_and(|h| h.tx.same_channel(&second_browser.tx)));
    }
}

#[tokio::test]
async fn attach_to_unknown_session_errors() {
    let (state, _wing_rx) = state_with_wing("wing-1", "owner-1", None).await;
    let owner = test_user("owner-1", "owner@acme.dev", Tier::Pro, &[]);
    let (handle, _rx) = browser_handle();

    let raw = r#"{"type":"pty.attach","session_id":"missing1"}"#;
    let reply = dispatch_browser_frame(&state, &owner, &None, &handle, raw).await;
    let json = reply.map(|r| r.to_json()).unwrap_or_default();
    assert!(json.contains("SESSION_NOT_FOUND"), "got: {json}");
}

#[tokio::test]
async fn input_from_stranger_is_dropped() {
    let (state, mut wing_rx) = state_with_wing("wing-1", "owner-1", None).await;
    let owner = test_user("owner-1", "owner@acme.dev", Tier::Pro, &[]);
    let (owner_browser, _rx1) = browser_handle();

    dispatch_browser_frame(
        &state,
        &owner,
        &None,
        &owner_browser,
        r#"{"type":"pty.start","wing_id":"wing-1","agent":"shell"}"#,
    )
    .await;
    let started = wing_rx.recv().await.unwrap_or_default();
    let session_id = session_id_of(&started).unwrap_or_default();

    let stranger = test_user("outsider-1", "out@else.dev", Tier::Free, &[]);
    let (stranger_browser, _rx2) = browser_handle();
    let input =
        format!(r#"{{"type":"pty.input","session_id":"{session_id}","data":"cm0="}}"#);
    dispatch_browser_frame(&state, &stranger, &None, &stranger_browser, &input).await;
    assert!(wing_rx.try_recv().is_err(), "stranger input must not reach the wing");

    // The owner's own socket still works.
    let input =
        format!(r#"{{"type":"pty.input","session_id":"{session_id}","data":"bHM="}}"#);
    dispatch_browser_frame(&state, &owner, &None, &owner_browser, &input).await;
    assert!(wing_rx.recv().await.is_some());
}

#[tokio::test]
async fn tunnel_request_carries_verified_identity() {
    let (state, mut wing_rx) = state_with_wing("wing-1", "owner-1", Some("org-1")).await;
    let member = test_user("member-1", "member@acme.dev", Tier::Free, &["org-1"]);
    let (handle, _rx) = browser_handle();

    // The client lies about who it is; the relay overwrites.
    let raw = r#"{"type":"tunnel.request","request_id":"req-1","wing_id":"wing-1",
                  "sender_user_id":"admin","payload":{"op":"ls"}}"#;
    let reply = dispatch_browser_frame(&state, &member, &None, &handle, raw).await;
    assert!(reply.is_none(), "tunnel must forward: {reply:?}");

    let forwarded = wing_rx.recv().await.unwrap_or_default();
    let value: serde_json::Value = serde_json::from_str(&forwarded).unwrap_or_default();
    assert_eq!(value["sender_user_id"], "member-1");
    assert_eq!(value["sender_email"], "member@acme.dev");
    assert_eq!(value["sender_org_role"], "member");
    assert_eq!(value["payload"]["op"], "ls");

    // The reply path is registered for this request.
    assert!(state.tunnels.peek("req-1").await.is_some());
}

#[tokio::test]
async fn kill_with_wing_gone_removes_route() {
    let (state, mut wing_rx) = state_with_wing("wing-1", "owner-1", None).await;
    let owner = test_user("owner-1", "owner@acme.dev", Tier::Pro, &[]);
    let (handle, _rx) = browser_handle();

    dispatch_browser_frame(
        &state,
        &owner,
        &None,
        &handle,
        r#"{"type":"pty.start","wing_id":"wing-1","agent":"shell"}"#,
    )
    .await;
    let started = wing_rx.recv().await.unwrap_or_default();
    let session_id = session_id_of(&started).unwrap_or_default();

    // Wing vanishes entirely; an explicit kill reaps the orphan route.
    let wing = state.registry.find_by_wing_id("wing-1").await;
    if let Some(wing) = wing {
        state.registry.remove(&wing.conn_id).await;
    }
    let kill = format!(r#"{{"type":"pty.kill","session_id":"{session_id}"}}"#);
    dispatch_browser_frame(&state, &owner, &None, &handle, &kill).await;
    assert!(state.routes.get(&session_id).await.is_none());
}
