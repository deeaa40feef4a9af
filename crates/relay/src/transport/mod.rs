// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP and WebSocket transport: router assembly and edge middleware.

pub mod app;
pub mod auth;
pub mod browser_ws;
pub mod dashboard_ws;
pub mod internal;
pub mod msg;
pub mod wing_ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::error::RelayError;
use crate::state::RelayState;

/// Per-IP admission control in front of every public endpoint.
pub async fn rate_limit_layer(
    State(state): State<Arc<RelayState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    if let Some(ip) = auth::client_ip(req.headers(), remote) {
        if !state.ip_limiter.check(ip).await {
            return RelayError::RateLimited.to_http_response("rate limited").into_response();
        }
    }
    next.run(req).await
}

/// `GET /healthz`
async fn healthz(State(state): State<Arc<RelayState>>) -> Json<serde_json::Value> {
    let role = match state.config.role {
        Some(crate::config::NodeRole::Login) => "login",
        Some(crate::config::NodeRole::Edge) => "edge",
        None => "single",
    };
    Json(serde_json::json!({
        "status": "ok",
        "role": role,
        "node_id": state.config.node_id,
        "wings": state.registry.local_wings().await.len(),
        "peers": state.peers.len().await,
        "sessions": state.routes.len().await,
    }))
}

/// Build the axum `Router` with all public and internal routes.
pub fn build_router(state: Arc<RelayState>) -> Router {
    let public = Router::new()
        .route("/ws/wing", get(wing_ws::wing_handler))
        .route(
            "/ws/pty",
            get(browser_ws::pty_handler).route_layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                browser_ws::replay_layer,
            )),
        )
        .route("/ws/dashboard", get(dashboard_ws::dashboard_handler))
        .route("/api/app/me", get(app::me))
        .route("/api/app/wings", get(app::wings))
        .route("/api/app/usage", get(app::usage))
        .route("/api/app/upgrade", post(app::upgrade))
        .route("/api/app/downgrade", post(app::downgrade))
        .route(
            "/api/app/wings/{wing_id}/label",
            put(app::put_label).delete(app::delete_label),
        )
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), rate_limit_layer));

    let internal = Router::new()
        .route("/internal/sync", post(internal::sync))
        .route("/internal/sessions/{token}", get(internal::session))
        .route("/internal/org-check/{slug}/{user_id}", get(internal::org_check))
        .route("/internal/entitlements", get(internal::entitlements))
        .route("/internal/wing-event", post(internal::wing_event))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::internal_auth_layer,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(public)
        .merge(internal)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
