// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bandwidth::BandwidthMeter;
use crate::registry::WingRegistry;
use crate::routing::{
    alloc_session_id, forward_to_wing, splice_to_browser, BrowserHandle, Route, RouteTable,
    SessionKind, SessionStatus, TunnelTable,
};
use crate::test_support::{browser_handle, test_wing};
use crate::transport::msg::parse_head;

fn pty_route(session_id: &str, wing_id: &str, user_id: &str, browser: BrowserHandle) -> Arc<Route> {
    Arc::new(Route::new(
        session_id,
        SessionKind::Pty,
        wing_id,
        user_id,
        "shell",
        Some("/home".to_owned()),
        browser,
    ))
}

#[test]
fn session_ids_are_short_and_unique() {
    let a = alloc_session_id();
    let b = alloc_session_id();
    assert_eq!(a.len(), 8);
    assert_ne!(a, b);
}

#[tokio::test]
async fn detach_only_when_socket_matches() {
    let (handle, _rx) = browser_handle();
    let route = pty_route("s1", "w1", "u1", handle.clone());

    // A different socket cannot detach the session.
    let (stranger, _rx2) = browser_handle();
    assert!(!route.detach_if(&stranger.tx).await);
    assert_eq!(route.status().await, SessionStatus::Active);

    assert!(route.detach_if(&handle.tx).await);
    assert_eq!(route.status().await, SessionStatus::Detached);
    assert!(route.browser().await.is_none());
}

#[tokio::test]
async fn attach_rebinds_and_reactivates() {
    let (old, _rx) = browser_handle();
    let route = pty_route("s1", "w1", "u1", old.clone());
    route.detach_if(&old.tx).await;

    let (new, mut new_rx) = browser_handle();
    route.bind_browser(new.clone()).await;
    assert_eq!(route.status().await, SessionStatus::Active);

    let routes = RouteTable::new();
    routes.insert(Arc::clone(&route)).await;
    let meter = BandwidthMeter::new(u64::MAX / 2, u64::MAX / 2);
    let raw = r#"{"type":"pty.output","session_id":"s1","data":"aGk="}"#;
    if let Some(head) = parse_head(raw) {
        splice_to_browser(&routes, &meter, None, &head, raw).await;
    }
    assert_eq!(new_rx.recv().await.as_deref(), Some(raw));
}

#[tokio::test]
async fn detached_session_drops_frames() {
    let (handle, mut rx) = browser_handle();
    let route = pty_route("s1", "w1", "u1", handle.clone());
    route.detach_if(&handle.tx).await;

    let routes = RouteTable::new();
    routes.insert(route).await;
    let meter = BandwidthMeter::new(u64::MAX / 2, u64::MAX / 2);
    let raw = r#"{"type":"pty.output","session_id":"s1","data":"eA=="}"#;
    if let Some(head) = parse_head(raw) {
        splice_to_browser(&routes, &meter, None, &head, raw).await;
    }
    assert!(rx.try_recv().is_err());
    // Nothing was metered for a dropped frame.
    assert_eq!(meter.month_total("u1").await, 0);
}

#[tokio::test]
async fn exited_frame_cleans_route() {
    let (handle, mut rx) = browser_handle();
    let route = pty_route("s1", "w1", "u1", handle);
    let routes = RouteTable::new();
    routes.insert(route).await;
    let meter = BandwidthMeter::new(u64::MAX / 2, u64::MAX / 2);

    let raw = r#"{"type":"pty.exited","session_id":"s1","code":0}"#;
    if let Some(head) = parse_head(raw) {
        splice_to_browser(&routes, &meter, None, &head, raw).await;
    }
    // The exit frame still reached the browser, then the route vanished.
    assert_eq!(rx.recv().await.as_deref(), Some(raw));
    assert!(routes.get("s1").await.is_none());
}

#[tokio::test]
async fn banned_user_gets_notice_then_close() {
    let (handle, mut rx) = browser_handle();
    let route = pty_route("s1", "w1", "u1", handle.clone());
    let routes = RouteTable::new();
    routes.insert(Arc::clone(&route)).await;
    let meter = BandwidthMeter::new(u64::MAX / 2, u64::MAX / 2);
    meter.set_banned(vec!["u1".to_owned()]).await;

    let raw = r#"{"type":"pty.output","session_id":"s1","data":"eA=="}"#;
    if let Some(head) = parse_head(raw) {
        splice_to_browser(&routes, &meter, None, &head, raw).await;
    }
    let notice = rx.recv().await.unwrap_or_default();
    assert!(notice.contains("bandwidth.exceeded"), "got: {notice}");
    assert!(handle.cancel.is_cancelled());

    // Subsequent frames are dropped at the routing table.
    if let Some(head) = parse_head(raw) {
        splice_to_browser(&routes, &meter, None, &head, raw).await;
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn forward_resolves_wing_per_call() -> anyhow::Result<()> {
    let registry = WingRegistry::new();
    let (old, _old_rx) = test_wing("wing-1", "u1", None);
    registry.add(Arc::clone(&old)).await;

    forward_to_wing(&registry, "wing-1", "first".to_owned()).await.map_err(|e| anyhow::anyhow!("{e}"))?;

    // Wing reconnects under the same stable id; forwards reach the new socket.
    registry.remove(&old.conn_id).await;
    let (new, mut new_rx) = test_wing("wing-1", "u1", None);
    registry.add(new).await;
    forward_to_wing(&registry, "wing-1", "second".to_owned()).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(new_rx.recv().await.as_deref(), Some("second"));
    Ok(())
}

#[tokio::test]
async fn forward_to_absent_wing_is_not_found() {
    let registry = WingRegistry::new();
    let err = forward_to_wing(&registry, "nope", "x".to_owned()).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn tunnels_track_browser_ownership() {
    let tunnels = TunnelTable::new();
    let (handle, _rx) = browser_handle();
    tunnels.register("req-1", handle.clone()).await;
    assert!(tunnels.peek("req-1").await.is_some());

    // Browser leaves: its pending requests disappear.
    tunnels.drop_for(&handle.tx).await;
    assert!(tunnels.peek("req-1").await.is_none());
}

#[tokio::test]
async fn detach_all_sweeps_only_matching_routes() {
    let (a, _arx) = browser_handle();
    let (b, _brx) = browser_handle();
    let routes = RouteTable::new();
    routes.insert(pty_route("s1", "w1", "u1", a.clone())).await;
    routes.insert(pty_route("s2", "w1", "u1", b.clone())).await;

    let detached = routes.detach_all(&a.tx).await;
    assert_eq!(detached, vec!["s1".to_owned()]);
    let s2 = routes.get("s2").await;
    assert!(s2.is_some());
    if let Some(s2) = s2 {
        assert_eq!(s2.status().await, SessionStatus::Active);
    }
}
