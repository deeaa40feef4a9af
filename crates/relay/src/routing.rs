// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session routing table and splice engine.
//!
//! A route ties a session id to its wing (by stable `wing_id`, never by
//! pointer) and the currently attached browser, if any. The wing side is
//! reached through the registry on every forward so a reconnected wing picks
//! up its old sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::bandwidth::BandwidthMeter;
use crate::error::RelayError;
use crate::identity::Notifier;
use crate::registry::WingRegistry;
use crate::transport::msg::{FrameHead, ServerFrame};

/// Per-write bound toward a browser socket.
pub const BROWSER_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-write bound toward a wing socket.
pub const WING_WRITE_TIMEOUT: Duration = Duration::from_secs(2);
/// Cap on a single bandwidth wait inside the splice path.
pub const SPLICE_WAIT_CAP: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Pty,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Detached,
    Exited,
}

/// Write half of a browser connection, shared with routes and tunnels.
#[derive(Clone)]
pub struct BrowserHandle {
    pub tx: mpsc::Sender<String>,
    pub cancel: CancellationToken,
}

/// One live session. `browser` is nil while detached.
pub struct Route {
    pub session_id: String,
    pub kind: SessionKind,
    pub wing_id: String,
    pub user_id: String,
    pub agent: String,
    pub cwd: Option<String>,
    browser: Mutex<Option<BrowserHandle>>,
    status: Mutex<SessionStatus>,
}

impl Route {
    pub fn new(
        session_id: impl Into<String>,
        kind: SessionKind,
        wing_id: impl Into<String>,
        user_id: impl Into<String>,
        agent: impl Into<String>,
        cwd: Option<String>,
        browser: BrowserHandle,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            wing_id: wing_id.into(),
            user_id: user_id.into(),
            agent: agent.into(),
            cwd,
            browser: Mutex::new(Some(browser)),
            status: Mutex::new(SessionStatus::Active),
        }
    }

    pub async fn browser(&self) -> Option<BrowserHandle> {
        self.browser.lock().await.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        *self.status.lock().await
    }

    /// Re-bind to a (possibly new) browser socket on `pty.attach`.
    pub async fn bind_browser(&self, handle: BrowserHandle) {
        *self.browser.lock().await = Some(handle);
        let mut status = self.status.lock().await;
        if *status == SessionStatus::Detached {
            *status = SessionStatus::Active;
        }
    }

    /// Transition to detached, but only when `tx` is the currently bound
    /// socket. A stale detach from an already-replaced browser is a no-op.
    pub async fn detach_if(&self, tx: &mpsc::Sender<String>) -> bool {
        let mut browser = self.browser.lock().await;
        let matches = browser.as_ref().is_some_and(|h| h.tx.same_channel(tx));
        if matches {
            *browser = None;
            *self.status.lock().await = SessionStatus::Detached;
        }
        matches
    }

    async fn take_browser(&self) -> Option<BrowserHandle> {
        self.browser.lock().await.take()
    }

    async fn mark_exited(&self) {
        *self.status.lock().await = SessionStatus::Exited;
    }
}

/// Thread-safe `session_id -> Route` map.
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<HashMap<String, Arc<Route>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, route: Arc<Route>) {
        self.routes.write().await.insert(route.session_id.clone(), route);
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Route>> {
        self.routes.read().await.get(session_id).map(Arc::clone)
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<Route>> {
        self.routes.write().await.remove(session_id)
    }

    pub async fn for_wing(&self, wing_id: &str) -> Vec<Arc<Route>> {
        self.routes
            .read()
            .await
            .values()
            .filter(|r| r.wing_id == wing_id)
            .map(Arc::clone)
            .collect()
    }

    /// Detach every route bound to `tx` (browser socket closed).
    pub async fn detach_all(&self, tx: &mpsc::Sender<String>) -> Vec<String> {
        let routes: Vec<Arc<Route>> =
            self.routes.read().await.values().map(Arc::clone).collect();
        let mut detached = Vec::new();
        for route in routes {
            if route.detach_if(tx).await {
                detached.push(route.session_id.clone());
            }
        }
        detached
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }
}

/// Allocate a short, url-safe session id.
pub fn alloc_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

/// Forward a browser-origin frame to the wing currently registered under
/// `wing_id`. Resolution happens per-call so a reconnected wing is found.
pub async fn forward_to_wing(
    registry: &WingRegistry,
    wing_id: &str,
    raw: String,
) -> Result<(), RelayError> {
    let wing = registry.find_by_wing_id(wing_id).await.ok_or(RelayError::WingNotFound)?;
    tokio::time::timeout(WING_WRITE_TIMEOUT, wing.outbound.send(raw))
        .await
        .map_err(|_| RelayError::Upstream)?
        .map_err(|_| RelayError::Upstream)
}

/// Splice a wing-origin, session-tagged frame to its browser.
///
/// Detached sessions drop the frame. Banned users get one typed notice and
/// a closed socket. `pty.exited` cleans the route and fires the exit hook.
pub async fn splice_to_browser(
    routes: &RouteTable,
    meter: &BandwidthMeter,
    notifier: Option<&Arc<dyn Notifier>>,
    head: &FrameHead,
    raw: &str,
) {
    let Some(session_id) = head.session_id.as_deref() else {
        return;
    };
    let Some(route) = routes.get(session_id).await else {
        return;
    };
    let exited = head.kind == "pty.exited";

    if meter.is_banned(&route.user_id).await {
        if let Some(handle) = route.take_browser().await {
            let notice = ServerFrame::BandwidthExceeded {
                message: "monthly bandwidth quota exceeded".to_owned(),
            }
            .to_json();
            let _ = tokio::time::timeout(BROWSER_WRITE_TIMEOUT, handle.tx.send(notice)).await;
            handle.cancel.cancel();
        }
        if exited {
            finish_route(routes, notifier, &route).await;
        }
        return;
    }

    if let Some(handle) = route.browser().await {
        meter_frame(meter, &route.user_id, raw.len()).await;
        let send = tokio::time::timeout(BROWSER_WRITE_TIMEOUT, handle.tx.send(raw.to_owned()));
        if send.await.map(|r| r.is_err()).unwrap_or(true) {
            // Write failed or timed out: the socket is gone, detach.
            route.detach_if(&handle.tx).await;
        }
    }

    if exited {
        finish_route(routes, notifier, &route).await;
    }
}

/// Bandwidth wait with the splice-path cap. On cap overrun the frame is
/// dropped by the caller's write path, not the connection.
async fn meter_frame(meter: &BandwidthMeter, user_id: &str, n: usize) {
    let _ = tokio::time::timeout(SPLICE_WAIT_CAP, meter.wait(user_id, n as u64)).await;
}

async fn finish_route(
    routes: &RouteTable,
    notifier: Option<&Arc<dyn Notifier>>,
    route: &Arc<Route>,
) {
    route.mark_exited().await;
    routes.remove(&route.session_id).await;
    if let Some(n) = notifier {
        n.session_exited(&route.user_id, &route.wing_id, &route.session_id);
    }
}

/// Pending tunnel requests: `request_id -> browser`. Entries live until the
/// wing answers with a terminal `tunnel.response` or `tunnel.stream{done}`.
#[derive(Default)]
pub struct TunnelTable {
    pending: Mutex<HashMap<String, BrowserHandle>>,
}

impl TunnelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, request_id: impl Into<String>, handle: BrowserHandle) {
        self.pending.lock().await.insert(request_id.into(), handle);
    }

    pub async fn peek(&self, request_id: &str) -> Option<BrowserHandle> {
        self.pending.lock().await.get(request_id).cloned()
    }

    pub async fn complete(&self, request_id: &str) -> Option<BrowserHandle> {
        self.pending.lock().await.remove(request_id)
    }

    /// Drop every pending request owned by a departing browser socket.
    pub async fn drop_for(&self, tx: &mpsc::Sender<String>) {
        self.pending.lock().await.retain(|_, h| !h.tx.same_channel(tx));
    }
}

#[cfg(test)]
#[path = "routing_tests.rs"]
mod tests;
