// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cookie-authenticated app endpoints: thin pass-throughs between the SPA,
//! the identity store, and the relay core.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::access;
use crate::error::RelayError;
use crate::identity::{month_utc, LabelScope, Tier, User};
use crate::registry::WingInfo;
use crate::state::RelayState;
use crate::transport::auth;

async fn require_user(state: &RelayState, headers: &HeaderMap) -> Result<User, Response> {
    let token = auth::extract_token(headers, None)
        .ok_or_else(|| RelayError::Unauthorized.to_http_response("missing session").into_response())?;
    state
        .validate_session(&token)
        .await
        .ok_or_else(|| RelayError::Unauthorized.to_http_response("invalid session").into_response())
}

/// `GET /api/app/me`
pub async fn me(State(state): State<Arc<RelayState>>, headers: HeaderMap) -> Response {
    match require_user(&state, &headers).await {
        Ok(user) => Json(user).into_response(),
        Err(resp) => resp,
    }
}

/// `GET /api/app/wings` — wings the caller can see, cluster-wide.
pub async fn wings(State(state): State<Arc<RelayState>>, headers: HeaderMap) -> Response {
    match require_user(&state, &headers).await {
        Ok(user) => Json(state.accessible_wings(&user).await).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub user_id: String,
    pub month: String,
    pub bytes: u64,
    pub cap: u64,
    pub tier: Tier,
}

/// `GET /api/app/usage` — month-to-date relayed bytes against the cap.
pub async fn usage(State(state): State<Arc<RelayState>>, headers: HeaderMap) -> Response {
    let user = match require_user(&state, &headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let bytes = state.bandwidth.month_total(&user.id).await;
    Json(UsageResponse {
        user_id: user.id,
        month: month_utc(),
        bytes,
        cap: state.config.free_tier_cap,
        tier: user.tier,
    })
    .into_response()
}

/// `POST /api/app/upgrade`
pub async fn upgrade(State(state): State<Arc<RelayState>>, headers: HeaderMap) -> Response {
    set_tier(&state, &headers, Tier::Pro).await
}

/// `POST /api/app/downgrade`
pub async fn downgrade(State(state): State<Arc<RelayState>>, headers: HeaderMap) -> Response {
    set_tier(&state, &headers, Tier::Free).await
}

async fn set_tier(state: &RelayState, headers: &HeaderMap, tier: Tier) -> Response {
    let user = match require_user(state, headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let Some(identity) = &state.identity else {
        return RelayError::Upstream
            .to_http_response("billing is handled by the login node")
            .into_response();
    };
    match identity.set_tier(&user.id, tier).await {
        Ok(()) => Json(serde_json::json!({ "tier": tier })).into_response(),
        Err(e) => {
            RelayError::Internal.to_http_response(format!("{e}")).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LabelBody {
    pub label: String,
    #[serde(default = "default_scope")]
    pub scope: LabelScope,
}

fn default_scope() -> LabelScope {
    LabelScope::User
}

/// `PUT /api/app/wings/{wing_id}/label`
pub async fn put_label(
    State(state): State<Arc<RelayState>>,
    Path(wing_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<LabelBody>,
) -> Response {
    label_op(&state, &headers, &wing_id, Some(body)).await
}

/// `DELETE /api/app/wings/{wing_id}/label`
pub async fn delete_label(
    State(state): State<Arc<RelayState>>,
    Path(wing_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    label_op(&state, &headers, &wing_id, None).await
}

/// Shared gate for label mutations: wing owner or org owner/admin.
async fn label_op(
    state: &RelayState,
    headers: &HeaderMap,
    wing_id: &str,
    body: Option<LabelBody>,
) -> Response {
    let user = match require_user(state, headers).await {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let Some(info) = lookup_wing_info(state, wing_id).await else {
        return RelayError::WingNotFound.to_http_response("wing not found").into_response();
    };

    let may_manage = if access::is_owner(&user.id, &info) {
        true
    } else if let Some(slug) = &info.org_slug {
        // Owner/admin check; edges delegate this to the login node.
        state.org_check(slug, &user.id).await.is_some()
    } else {
        false
    };
    if !may_manage {
        return RelayError::Forbidden
            .to_http_response("label ops require wing owner or org admin")
            .into_response();
    }

    let Some(identity) = &state.identity else {
        return RelayError::Upstream
            .to_http_response("labels are persisted by the login node")
            .into_response();
    };
    let result = match &body {
        Some(body) => identity.put_label(wing_id, &user.id, body.scope, &body.label).await,
        None => identity.delete_label(wing_id, &user.id, LabelScope::User).await,
    };
    match result {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(e) => RelayError::Internal.to_http_response(format!("{e}")).into_response(),
    }
}

async fn lookup_wing_info(state: &RelayState, wing_id: &str) -> Option<WingInfo> {
    if let Some(wing) = state.registry.find_by_wing_id(wing_id).await {
        return Some(wing.info.read().await.clone());
    }
    state.peers.find_by_wing_id(wing_id).await.map(|p| p.wing.info)
}
