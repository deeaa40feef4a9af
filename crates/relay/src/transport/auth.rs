// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token extraction, wing JWTs, and the internal-endpoint auth layer.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::state::RelayState;

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Claims carried by a wing JWT. `sub` is the user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WingClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub exp: u64,
}

/// Verify a wing JWT against the process-shared secret.
pub fn decode_wing_jwt(token: &str, secret: &str) -> Option<WingClaims> {
    if secret.is_empty() {
        return None;
    }
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<WingClaims>(token, &key, &validation)
        .ok()
        .map(|data| data.claims)
}

/// Mint a wing JWT. Used by provisioning flows and tests.
pub fn encode_wing_jwt(
    user_id: &str,
    public_key: Option<&str>,
    secret: &str,
    ttl_secs: u64,
) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let claims = WingClaims {
        sub: user_id.to_owned(),
        public_key: public_key.map(str::to_owned),
        exp: now + ttl_secs,
    };
    let key = EncodingKey::from_secret(secret.as_bytes());
    Ok(jsonwebtoken::encode(&jsonwebtoken::Header::default(), &claims, &key)?)
}

/// Bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

/// Session token from the `session` cookie.
pub fn cookie_session(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get("cookie")?.to_str().ok()?;
    for pair in cookies.split(';') {
        if let Some(value) = pair.trim().strip_prefix("session=") {
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }
    None
}

/// Credential lookup order: explicit query param, bearer header, cookie.
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(token) = query_token {
        if !token.is_empty() {
            return Some(token.to_owned());
        }
    }
    bearer_token(headers).or_else(|| cookie_session(headers))
}

const PRIVATE_RANGES: &[&str] = &[
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "127.0.0.0/8",
    "::1/128",
    "fc00::/7",
    "fdaa::/16",
];

/// Is `ip` inside one of the trusted private ranges?
pub fn is_private_ip(ip: IpAddr) -> bool {
    PRIVATE_RANGES
        .iter()
        .filter_map(|range| range.parse::<ipnet::IpNet>().ok())
        .any(|net| net.contains(&ip))
}

/// Only same-origin absolute paths are safe redirect targets. A leading
/// `//` or `/\` is scheme-relative and escapes the origin.
pub fn is_safe_redirect(path: &str) -> bool {
    let mut chars = path.chars();
    chars.next() == Some('/') && !matches!(chars.next(), Some('/') | Some('\\'))
}

/// First-hop client address: `X-Forwarded-For` head, else the socket peer.
pub fn client_ip(headers: &HeaderMap, remote: Option<IpAddr>) -> Option<IpAddr> {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    remote
}

/// Auth layer for `/internal/*`. Accepts the host-proxy marker header, the
/// shared secret, or a caller inside a private range. Single-node mode has
/// no peers, so the whole check is a no-op there.
pub async fn internal_auth_layer(
    State(state): State<Arc<RelayState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if state.config.is_single_node() {
        return next.run(req).await;
    }

    if req.headers().contains_key("fly-forwarded-port") {
        return next.run(req).await;
    }

    if let Some(expected) = &state.config.internal_secret {
        let presented = req
            .headers()
            .get("x-internal-secret")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if constant_time_eq(presented, expected) {
            return next.run(req).await;
        }
    }

    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    if let Some(ip) = client_ip(req.headers(), remote) {
        if is_private_ip(ip) {
            return next.run(req).await;
        }
    }

    let (status, body) = RelayError::Unauthorized.to_http_response("internal endpoint");
    (status, body).into_response()
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
