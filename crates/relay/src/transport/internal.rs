// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node-to-node endpoints, guarded by the internal auth layer.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::cluster::{emit_peer_diff, snapshot_local, SyncRequest, SyncResponse};
use crate::error::RelayError;
use crate::state::{ForwardedWingEvent, OrgCheckResponse, RelayState, SessionUser};

/// `POST /internal/sync` — an edge pushes its full state; the login node
/// answers with everyone else's wings and the current quota state.
pub async fn sync(
    State(state): State<Arc<RelayState>>,
    Json(req): Json<SyncRequest>,
) -> Response {
    if !state.config.is_login() && !state.config.is_single_node() {
        return RelayError::BadRequest
            .to_http_response("sync is served by the login node")
            .into_response();
    }

    state.bandwidth.absorb(&req.bandwidth).await;

    let outcome = state
        .cluster
        .sync(&req.node_id, req.wings, state.config.node_expiry())
        .await;

    // The login node's own peer view is the cluster union; diff it so its
    // dashboards hear about remote changes too.
    let diff = state.peers.replace(outcome.all).await;
    emit_peer_diff(&state.registry, &diff).await;

    let mut wings = outcome.others;
    wings.extend(snapshot_local(&state).await);

    let resp = SyncResponse {
        wings,
        banned_users: state.bandwidth.banned_list().await,
        seq: state.cluster.next_seq(),
    };
    Json(resp).into_response()
}

/// `GET /internal/sessions/{token}` — resolve a session for an edge.
pub async fn session(
    State(state): State<Arc<RelayState>>,
    Path(token): Path<String>,
) -> Response {
    let Some(identity) = &state.identity else {
        return RelayError::Internal.to_http_response("no identity store").into_response();
    };
    match identity.validate_token(&token).await {
        Ok(Some(user)) => Json(SessionUser::from(user)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "unknown session").into_response(),
        Err(e) => {
            tracing::warn!(err = %e, "session validation failed");
            RelayError::Internal.to_http_response("identity store error").into_response()
        }
    }
}

/// `GET /internal/org-check/{slug}/{user_id}` — may this user register
/// org-scoped wings? `ok` implies owner or admin.
pub async fn org_check(
    State(state): State<Arc<RelayState>>,
    Path((slug, user_id)): Path<(String, String)>,
) -> Json<OrgCheckResponse> {
    let org_id = state.org_check(&slug, &user_id).await;
    Json(OrgCheckResponse { ok: org_id.is_some(), org_id })
}

#[derive(Debug, Deserialize)]
pub struct EntitlementsQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct EntitlementsResponse {
    pub user_id: String,
    pub tier: crate::identity::Tier,
}

/// `GET /internal/entitlements?user_id=` — tier lookup for peers.
pub async fn entitlements(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<EntitlementsQuery>,
) -> Response {
    let Some(identity) = &state.identity else {
        return RelayError::Internal.to_http_response("no identity store").into_response();
    };
    match identity.user_tier(&query.user_id).await {
        Ok(tier) => Json(EntitlementsResponse { user_id: query.user_id, tier }).into_response(),
        Err(e) => {
            tracing::warn!(err = %e, "entitlement lookup failed");
            RelayError::Internal.to_http_response("identity store error").into_response()
        }
    }
}

/// `POST /internal/wing-event` — an edge mirrors a lifecycle event so login
/// dashboards see it without waiting a sync cycle.
pub async fn wing_event(
    State(state): State<Arc<RelayState>>,
    Json(fwd): Json<ForwardedWingEvent>,
) -> StatusCode {
    state
        .registry
        .notify_wing(&fwd.owner_id, fwd.org_id.as_deref(), fwd.event)
        .await;
    StatusCode::NO_CONTENT
}
