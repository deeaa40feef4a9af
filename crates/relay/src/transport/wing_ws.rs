// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wing-side WebSocket handler.
//!
//! A wing authenticates before the upgrade, registers with its first frame,
//! then runs a single read/write loop. Outbound frames arrive through the
//! wing's channel so writes are serialized; inbound frames drive the
//! registry, routing table, and tunnel map.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::registry::{Wing, WingEvent, WingInfo};
use crate::routing::{self, BROWSER_WRITE_TIMEOUT};
use crate::state::RelayState;
use crate::transport::msg::{parse_head, ConfigFrame, RegisterFrame, ServerFrame};
use crate::transport::auth;

/// Per-frame read limit on the wing socket.
pub const WING_FRAME_LIMIT: usize = 512 * 1024;

#[derive(Debug, Deserialize)]
pub struct WingQuery {
    pub token: Option<String>,
}

struct WingAuth {
    user_id: String,
    public_key: Option<String>,
}

/// `GET /ws/wing` — authenticate, then upgrade.
pub async fn wing_handler(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<WingQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(token) = auth::extract_token(&headers, query.token.as_deref()) else {
        return RelayError::Unauthorized.to_http_response("missing token").into_response();
    };
    let Some(wing_auth) = authenticate_wing(&state, &token).await else {
        return RelayError::Unauthorized.to_http_response("invalid token").into_response();
    };

    ws.max_message_size(WING_FRAME_LIMIT)
        .on_upgrade(move |socket| handle_wing(state, wing_auth, socket))
        .into_response()
}

/// JWT first (HMAC, subject = user id), opaque DB token as fallback.
async fn authenticate_wing(state: &RelayState, token: &str) -> Option<WingAuth> {
    if let Some(claims) = auth::decode_wing_jwt(token, &state.config.jwt_secret) {
        return Some(WingAuth { user_id: claims.sub, public_key: claims.public_key });
    }
    let user = state.validate_session(token).await?;
    Some(WingAuth { user_id: user.id, public_key: None })
}

async fn handle_wing(state: Arc<RelayState>, wing_auth: WingAuth, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // The first inbound frame must be a registration.
    let reg = match read_registration(&mut ws_rx).await {
        Some(reg) => reg,
        None => {
            let err = ServerFrame::error(RelayError::BadRequest, "expected wing.register");
            let _ = ws_tx.send(Message::Text(err.to_json().into())).await;
            return;
        }
    };

    // Org claims are validated before anything is published. Only org
    // owners and admins may register an org-scoped wing.
    let mut org_id = None;
    if let Some(slug) = &reg.org_slug {
        match state.org_check(slug, &wing_auth.user_id).await {
            Some(id) => org_id = Some(id),
            None => {
                let err = ServerFrame::error(
                    RelayError::Forbidden,
                    "org registration requires owner or admin role",
                );
                let _ = ws_tx.send(Message::Text(err.to_json().into())).await;
                return;
            }
        }
    }

    let info = WingInfo {
        wing_id: reg.wing_id.clone(),
        user_id: wing_auth.user_id.clone(),
        org_id: org_id.clone(),
        org_slug: reg.org_slug.clone(),
        // A key pinned in the JWT wins over the registration frame.
        public_key: wing_auth.public_key.clone().unwrap_or(reg.public_key),
        locked: reg.locked,
        allowed_count: reg.allowed_count,
        platform: reg.platform,
        version: reg.version,
        agents: reg.agents,
        labels: reg.labels,
        projects: reg.projects,
        allow_emails: reg.allow_emails,
    };

    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    let cancel = state.shutdown.child_token();
    let wing = Arc::new(Wing::new(wing_auth.user_id.clone(), info, out_tx, cancel.clone()));
    let conn_id = wing.conn_id.clone();
    let wing_id = reg.wing_id.clone();

    state.registry.add(Arc::clone(&wing)).await;

    let registered = ServerFrame::Registered { wing_id: conn_id.clone() };
    if ws_tx.send(Message::Text(registered.to_json().into())).await.is_err() {
        state.registry.remove(&conn_id).await;
        return;
    }

    state
        .publish_wing_event(
            &wing_auth.user_id,
            org_id.as_deref(),
            WingEvent::Online { wing: wing.snapshot().await },
        )
        .await;
    tracing::info!(wing_id = %wing_id, conn_id = %conn_id, "wing registered");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_wing_frame(&state, &wing, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    // Deferred cleanup: drop from the registry, then tell whoever is watching.
    state.registry.remove(&conn_id).await;
    let info = wing.info.read().await.clone();
    state
        .publish_wing_event(
            &wing.user_id,
            info.org_id.as_deref(),
            WingEvent::Offline { conn_id: conn_id.clone(), wing_id: info.wing_id.clone() },
        )
        .await;
    push_offline_to_browsers(&state, &info.wing_id).await;
    tracing::info!(wing_id = %info.wing_id, conn_id = %conn_id, "wing disconnected");
}

async fn read_registration(
    ws_rx: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<RegisterFrame> {
    loop {
        match ws_rx.next().await? {
            Ok(Message::Text(text)) => {
                let head = parse_head(&text)?;
                if head.kind != "wing.register" {
                    return None;
                }
                return serde_json::from_str::<RegisterFrame>(&text).ok();
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            _ => return None,
        }
    }
}

async fn dispatch_wing_frame(state: &Arc<RelayState>, wing: &Arc<Wing>, text: &str) {
    // Malformed envelopes are dropped; they never tear the socket.
    let Some(head) = parse_head(text) else {
        return;
    };

    match head.kind.as_str() {
        "wing.heartbeat" => wing.touch().await,

        "wing.config" => {
            let Ok(config) = serde_json::from_str::<ConfigFrame>(text) else {
                return;
            };
            {
                let mut info = wing.info.write().await;
                if let Some(locked) = config.locked {
                    info.locked = locked;
                }
                if let Some(count) = config.allowed_count {
                    info.allowed_count = count;
                }
                if let Some(labels) = config.labels {
                    info.labels = labels;
                }
                if let Some(projects) = config.projects {
                    info.projects = projects;
                }
                if let Some(allow) = config.allow_emails {
                    info.allow_emails = allow;
                }
            }
            let snapshot = wing.snapshot().await;
            let org = snapshot.info.org_id.clone();
            state
                .publish_wing_event(
                    &wing.user_id,
                    org.as_deref(),
                    WingEvent::Config { wing: snapshot },
                )
                .await;
        }

        "session.attention" => {
            let Some(session_id) = head.session_id else {
                return;
            };
            let (wing_id, org) = {
                let info = wing.info.read().await;
                (info.wing_id.clone(), info.org_id.clone())
            };
            state
                .publish_wing_event(
                    &wing.user_id,
                    org.as_deref(),
                    WingEvent::Attention { session_id, wing_id },
                )
                .await;
        }

        "tunnel.response" | "tunnel.stream" | "passkey.challenge" => {
            forward_tunnel_frame(state, &head.kind, head.request_id.as_deref(), text).await;
        }

        _ if head.session_id.is_some() => {
            routing::splice_to_browser(
                &state.routes,
                &state.bandwidth,
                state.notifier.as_ref(),
                &head,
                text,
            )
            .await;
        }

        _ => {}
    }
}

/// Route a request-tagged frame back to the browser that opened it.
async fn forward_tunnel_frame(
    state: &RelayState,
    kind: &str,
    request_id: Option<&str>,
    text: &str,
) {
    let Some(request_id) = request_id else {
        return;
    };
    let done = match kind {
        "tunnel.response" => true,
        "tunnel.stream" => stream_is_done(text),
        _ => false,
    };
    let handle = if done {
        state.tunnels.complete(request_id).await
    } else {
        state.tunnels.peek(request_id).await
    };
    if let Some(handle) = handle {
        let _ =
            tokio::time::timeout(BROWSER_WRITE_TIMEOUT, handle.tx.send(text.to_owned())).await;
    }
}

fn stream_is_done(text: &str) -> bool {
    #[derive(Deserialize)]
    struct StreamHead {
        #[serde(default)]
        done: bool,
    }
    serde_json::from_str::<StreamHead>(text).map(|s| s.done).unwrap_or(false)
}

/// Best-effort `wing.offline` push to browsers attached to this wing's
/// sessions. Reconnects make this a transient blip on their end.
async fn push_offline_to_browsers(state: &RelayState, wing_id: &str) {
    let frame = ServerFrame::WingOffline { wing_id: wing_id.to_owned() }.to_json();
    for route in state.routes.for_wing(wing_id).await {
        if let Some(handle) = route.browser().await {
            let _ = handle.tx.try_send(frame.clone());
        }
    }
}

#[cfg(test)]
#[path = "wing_ws_tests.rs"]
mod tests;
