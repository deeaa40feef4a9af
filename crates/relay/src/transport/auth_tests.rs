// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderMap;

use crate::test_support::AnyhowExt;
use crate::transport::auth::{
    bearer_token, client_ip, constant_time_eq, cookie_session, decode_wing_jwt, encode_wing_jwt,
    extract_token, is_private_ip, is_safe_redirect,
};

#[yare::parameterized(
    ten_slash_8        = { "10.1.2.3", true },
    min_172_range      = { "172.16.0.1", true },
    max_172_range      = { "172.31.255.255", true },
    just_past_172      = { "172.32.0.1", false },
    just_before_172    = { "172.15.255.255", false },
    rfc1918_192        = { "192.168.0.1", true },
    loopback           = { "127.0.0.1", true },
    public_v4          = { "8.8.8.8", false },
    v6_loopback        = { "::1", true },
    unique_local       = { "fc00::1", true },
    fly_private        = { "fdaa:0:1::2", true },
    public_v6          = { "2001:4860:4860::8888", false },
)]
fn private_ip_ranges(addr: &str, expected: bool) -> anyhow::Result<()> {
    let ip = addr.parse().anyhow()?;
    assert_eq!(is_private_ip(ip), expected, "{addr}");
    Ok(())
}

#[yare::parameterized(
    plain_path       = { "/dashboard", true },
    root             = { "/", true },
    scheme_relative  = { "//evil.example", false },
    backslash_trick  = { "/\\evil.example", false },
    absolute_url     = { "https://evil.example", false },
    empty            = { "", false },
    relative         = { "dashboard", false },
)]
fn safe_redirects(path: &str, expected: bool) {
    assert_eq!(is_safe_redirect(path), expected, "{path:?}");
}

#[test]
fn jwt_round_trips_with_claims() -> anyhow::Result<()> {
    let token = encode_wing_jwt("user-7", Some("pk-abc"), "s3cret", 3600)?;
    let claims = decode_wing_jwt(&token, "s3cret")
        .ok_or_else(|| anyhow::anyhow!("decode failed"))?;
    assert_eq!(claims.sub, "user-7");
    assert_eq!(claims.public_key.as_deref(), Some("pk-abc"));
    Ok(())
}

#[test]
fn jwt_rejects_wrong_secret() -> anyhow::Result<()> {
    let token = encode_wing_jwt("user-7", None, "s3cret", 3600)?;
    assert!(decode_wing_jwt(&token, "other").is_none());
    // No secret configured means the JWT path is disabled entirely.
    assert!(decode_wing_jwt(&token, "").is_none());
    Ok(())
}

#[test]
fn jwt_rejects_expired() -> anyhow::Result<()> {
    use crate::transport::auth::WingClaims;
    let past = (chrono::Utc::now().timestamp() - 86_400).max(0) as u64;
    let claims = WingClaims { sub: "user-7".to_owned(), public_key: None, exp: past };
    let key = jsonwebtoken::EncodingKey::from_secret(b"s3cret");
    let token = jsonwebtoken::encode(&jsonwebtoken::Header::default(), &claims, &key)?;
    assert!(decode_wing_jwt(&token, "s3cret").is_none());
    Ok(())
}

#[test]
fn token_extraction_precedence() -> anyhow::Result<()> {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer from-bearer".parse().anyhow()?);
    headers.insert("cookie", "theme=dark; session=from-cookie".parse().anyhow()?);

    assert_eq!(
        extract_token(&headers, Some("from-query")).as_deref(),
        Some("from-query")
    );
    assert_eq!(extract_token(&headers, None).as_deref(), Some("from-bearer"));

    let mut cookie_only = HeaderMap::new();
    cookie_only.insert("cookie", "session=from-cookie".parse().anyhow()?);
    assert_eq!(extract_token(&cookie_only, None).as_deref(), Some("from-cookie"));
    assert_eq!(bearer_token(&cookie_only), None);
    assert_eq!(cookie_session(&cookie_only).as_deref(), Some("from-cookie"));

    assert_eq!(extract_token(&HeaderMap::new(), None), None);
    Ok(())
}

#[test]
fn forwarded_for_takes_first_hop() -> anyhow::Result<()> {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().anyhow()?);
    let remote = Some("10.0.0.2".parse().anyhow()?);
    assert_eq!(client_ip(&headers, remote), Some("203.0.113.9".parse().anyhow()?));

    // No header: fall back to the socket peer.
    assert_eq!(client_ip(&HeaderMap::new(), remote), remote);
    Ok(())
}

#[test]
fn constant_time_compare() {
    assert!(constant_time_eq("abc", "abc"));
    assert!(!constant_time_eq("abc", "abd"));
    assert!(!constant_time_eq("abc", "abcd"));
    assert!(constant_time_eq("", ""));
}
