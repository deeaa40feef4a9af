// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dashboard event socket: `wing.online/offline/config` and
//! `session.attention`, scoped to the viewer's own wings and orgs.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::identity::User;
use crate::registry::{WingEvent, SUBSCRIBER_DEPTH};
use crate::state::RelayState;
use crate::transport::auth;

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub token: Option<String>,
}

/// `GET /ws/dashboard` — subscribe the caller to lifecycle events.
pub async fn dashboard_handler(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<DashboardQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(token) = auth::extract_token(&headers, query.token.as_deref()) else {
        return RelayError::Unauthorized.to_http_response("missing credentials").into_response();
    };
    let Some(user) = state.validate_session(&token).await else {
        return RelayError::Unauthorized.to_http_response("invalid session").into_response();
    };

    ws.on_upgrade(move |socket| handle_dashboard(state, user, socket)).into_response()
}

async fn handle_dashboard(state: Arc<RelayState>, user: User, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WingEvent>(SUBSCRIBER_DEPTH);
    let sub_id = state.registry.subscribe(user.id.clone(), user.org_ids.clone(), tx).await;

    // Backfill: one wing.online per wing the viewer can currently see,
    // before live events start streaming.
    for entry in state.accessible_wings(&user).await {
        let event = WingEvent::Online { wing: entry.wing };
        let Ok(json) = serde_json::to_string(&event) else { continue };
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            state.registry.unsubscribe(sub_id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Dashboards only listen; anything else is ignored.
                    _ => {}
                }
            }
        }
    }

    state.registry.unsubscribe(sub_id).await;
}
