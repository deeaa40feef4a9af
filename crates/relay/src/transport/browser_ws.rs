// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser-side WebSocket handler for PTY, chat, and tunnel traffic.
//!
//! The cross-node decision happens before the handshake: a request for a
//! wing on another machine is answered with `fly-replay` and no upgrade.
//! After upgrade, every envelope is routed by type; access control gates
//! session creation and attachment.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::access;
use crate::error::RelayError;
use crate::handoff::{self, RouteDecision, FLY_REPLAY_HEADER};
use crate::identity::User;
use crate::routing::{
    alloc_session_id, forward_to_wing, BrowserHandle, Route, SessionKind,
};
use crate::state::RelayState;
use crate::transport::auth;
use crate::transport::msg::{
    inject_tunnel_identity, parse_head, ChatStartFrame, PtyAttachFrame, PtyStartFrame,
    ServerFrame,
};

#[derive(Debug, Deserialize)]
pub struct PtyQuery {
    pub token: Option<String>,
    pub wing_id: Option<String>,
}

/// Pre-upgrade cross-node routing for `/ws/pty`. Runs before the WebSocket
/// handshake, so a request for a wing on another machine is answered with a
/// `fly-replay` header and never upgraded here.
pub async fn replay_layer(
    State(state): State<Arc<RelayState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    let wing_id = req.uri().query().and_then(|q| query_param(q, "wing_id"));
    let Some(wing_id) = wing_id else {
        return next.run(req).await;
    };
    match handoff::decide(&state, &wing_id).await {
        RouteDecision::Local => next.run(req).await,
        RouteDecision::Replay(machine_id) => {
            ([(FLY_REPLAY_HEADER, format!("instance={machine_id}"))], "").into_response()
        }
        RouteDecision::NotFound => RelayError::WingNotFound
            .to_retryable_response("wing not found, retry")
            .into_response(),
    }
}

fn query_param(query: &str, key: &str) -> Option<String> {
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        if kv.next() == Some(key) {
            return kv.next().map(str::to_owned);
        }
    }
    None
}

/// `GET /ws/pty` — authenticate, gate access to the target wing, upgrade.
/// The cross-node decision already happened in [`replay_layer`].
pub async fn pty_handler(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<PtyQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = auth::extract_token(&headers, query.token.as_deref()) else {
        return RelayError::Unauthorized.to_http_response("missing credentials").into_response();
    };
    let Some(user) = state.validate_session(&token).await else {
        return RelayError::Unauthorized.to_http_response("invalid session").into_response();
    };

    if let Some(wing_id) = &query.wing_id {
        // Access control runs only once the wing is known to be local.
        match state.registry.find_by_wing_id(wing_id).await {
            Some(wing) => {
                let info = wing.info.read().await.clone();
                if !access::can_access_wing(&user, &info) {
                    return RelayError::Forbidden
                        .to_http_response("not allowed on this wing")
                        .into_response();
                }
            }
            // Raced away between the routing decision and here.
            None => {
                return RelayError::WingNotFound
                    .to_retryable_response("wing not found, retry")
                    .into_response();
            }
        }
    }

    let default_wing = query.wing_id.clone();
    ws.on_upgrade(move |socket| handle_browser(state, user, default_wing, socket))
        .into_response()
}

async fn handle_browser(
    state: Arc<RelayState>,
    user: User,
    default_wing: Option<String>,
    socket: WebSocket,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    let cancel = state.shutdown.child_token();
    let handle = BrowserHandle { tx: out_tx.clone(), cancel: cancel.clone() };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Flush whatever is already queued (e.g. the bandwidth
                // notice), then close normally.
                while let Ok(frame) = out_rx.try_recv() {
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame { code: 1000, reason: "".into() })))
                    .await;
                break;
            }
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) =
                            dispatch_browser_frame(&state, &user, &default_wing, &handle, &text)
                                .await
                        {
                            if ws_tx.send(Message::Text(reply.to_json().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    // Browser gone: sessions become detached, pending tunnels die with it.
    state.routes.detach_all(&out_tx).await;
    state.tunnels.drop_for(&out_tx).await;
}

/// Handle one browser envelope; `Some` replies with a typed error frame.
/// Malformed input is silently dropped.
async fn dispatch_browser_frame(
    state: &Arc<RelayState>,
    user: &User,
    default_wing: &Option<String>,
    handle: &BrowserHandle,
    text: &str,
) -> Option<ServerFrame> {
    let head = parse_head(text)?;

    match head.kind.as_str() {
        "pty.start" => {
            let frame = serde_json::from_str::<PtyStartFrame>(text).ok()?;
            let wing_id = frame.wing_id.or_else(|| default_wing.clone())?;
            start_session(
                state,
                user,
                handle,
                SessionKind::Pty,
                &wing_id,
                &frame.agent,
                frame.cwd,
                text,
            )
            .await
        }

        "chat.start" => {
            let frame = serde_json::from_str::<ChatStartFrame>(text).ok()?;
            let wing_id = frame.wing_id.or_else(|| default_wing.clone())?;
            let agent = frame.agent.unwrap_or_else(|| "chat".to_owned());
            start_session(state, user, handle, SessionKind::Chat, &wing_id, &agent, None, text)
                .await
        }

        "pty.attach" => {
            let frame = serde_json::from_str::<PtyAttachFrame>(text).ok()?;
            let route = match state.routes.get(&frame.session_id).await {
                Some(r) => r,
                None => {
                    return Some(ServerFrame::error(
                        RelayError::SessionNotFound,
                        "unknown session",
                    ))
                }
            };
            let wing_info = match state.registry.find_by_wing_id(&route.wing_id).await {
                Some(w) => Some(w.info.read().await.clone()),
                None => None,
            };
            if !access::can_access_session(user, &route.user_id, wing_info.as_ref()) {
                return Some(ServerFrame::error(RelayError::Forbidden, "not your session"));
            }
            route.bind_browser(handle.clone()).await;
            // Forward so the wing replays scrollback to the new socket.
            match forward_to_wing(&state.registry, &route.wing_id, text.to_owned()).await {
                Ok(()) => None,
                Err(code) => Some(ServerFrame::error(code, "wing unreachable")),
            }
        }

        "pty.detach" => {
            let session_id = head.session_id?;
            if let Some(route) = state.routes.get(&session_id).await {
                // Only the currently bound socket may detach.
                if route.detach_if(&handle.tx).await {
                    let _ =
                        forward_to_wing(&state.registry, &route.wing_id, text.to_owned()).await;
                }
            }
            None
        }

        "pty.kill" => {
            let session_id = head.session_id?;
            let route = state.routes.get(&session_id).await?;
            let wing_info = match state.registry.find_by_wing_id(&route.wing_id).await {
                Some(w) => Some(w.info.read().await.clone()),
                None => None,
            };
            if !access::can_access_session(user, &route.user_id, wing_info.as_ref()) {
                return Some(ServerFrame::error(RelayError::Forbidden, "not your session"));
            }
            match forward_to_wing(&state.registry, &route.wing_id, text.to_owned()).await {
                Ok(()) => None,
                Err(_) => {
                    // The wing is gone; an explicit kill removes the route.
                    state.routes.remove(&session_id).await;
                    None
                }
            }
        }

        "pty.input" | "pty.resize" | "pty.attention_ack" | "chat.message" | "chat.delete" => {
            let session_id = head.session_id?;
            let route = state.routes.get(&session_id).await?;
            // Fast path: frames from the socket the session is bound to.
            let attached =
                route.browser().await.is_some_and(|h| h.tx.same_channel(&handle.tx));
            if !attached && user.id != route.user_id {
                return None;
            }
            let _ = forward_to_wing(&state.registry, &route.wing_id, text.to_owned()).await;
            None
        }

        "tunnel.request" => {
            let request_id = head.request_id?;
            let mut value = serde_json::from_str::<serde_json::Value>(text).ok()?;
            let wing_id = value
                .get("wing_id")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .or_else(|| default_wing.clone())?;
            let wing = match state.registry.find_by_wing_id(&wing_id).await {
                Some(w) => w,
                None => {
                    return Some(ServerFrame::error(RelayError::WingNotFound, "wing not found"))
                }
            };
            let info = wing.info.read().await.clone();
            if !access::can_access_wing(user, &info) {
                return Some(ServerFrame::error(RelayError::Forbidden, "not allowed"));
            }
            // The relay, not the client, asserts who is calling.
            value = inject_tunnel_identity(
                value,
                &user.id,
                &user.email,
                access::org_role_label(user, &info),
            );
            let raw = serde_json::to_string(&value).ok()?;
            state.tunnels.register(request_id, handle.clone()).await;
            match forward_to_wing(&state.registry, &wing_id, raw).await {
                Ok(()) => None,
                Err(code) => Some(ServerFrame::error(code, "wing unreachable")),
            }
        }

        "passkey.response" => {
            let wing_id = default_wing.clone()?;
            let _ = forward_to_wing(&state.registry, &wing_id, text.to_owned()).await;
            None
        }

        _ => None,
    }
}

/// Install a route for a fresh session and hand the start frame to the wing,
/// with the allocated session id stamped in.
#[allow(clippy::too_many_arguments)]
async fn start_session(
    state: &Arc<RelayState>,
    user: &User,
    handle: &BrowserHandle,
    kind: SessionKind,
    wing_id: &str,
    agent: &str,
    cwd: Option<String>,
    raw: &str,
) -> Option<ServerFrame> {
    let wing = match state.registry.find_by_wing_id(wing_id).await {
        Some(w) => w,
        None => {
            return Some(ServerFrame::error(RelayError::WingNotFound, "wing not found, retry"))
        }
    };
    let info = wing.info.read().await.clone();
    if !access::can_access_wing(user, &info) {
        return Some(ServerFrame::error(RelayError::Forbidden, "not allowed on this wing"));
    }

    let session_id = alloc_session_id();
    let route = Arc::new(Route::new(
        session_id.clone(),
        kind,
        wing_id,
        user.id.as_str(),
        agent,
        cwd,
        handle.clone(),
    ));
    state.routes.insert(route).await;

    let mut value = serde_json::from_str::<serde_json::Value>(raw).ok()?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("session_id".to_owned(), session_id.clone().into());
    }
    let stamped = serde_json::to_string(&value).ok()?;
    match forward_to_wing(&state.registry, wing_id, stamped).await {
        Ok(()) => None,
        Err(code) => {
            state.routes.remove(&session_id).await;
            Some(ServerFrame::error(code, "wing unreachable"))
        }
    }
}

#[cfg(test)]
#[path = "browser_ws_tests.rs"]
mod tests;
