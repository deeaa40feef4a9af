// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Edge-side cache of session-token validations.
//!
//! Positive and negative results are both cached for the TTL so a storm of
//! requests with an invalid cookie cannot hammer the login node. Transient
//! fetch errors are not cached at all.

use std::future::Future;
use std::time::Duration;

use moka::future::Cache;

use crate::identity::User;

pub struct SessionCache {
    cache: Cache<String, Option<User>>,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self { cache: Cache::builder().time_to_live(ttl).max_capacity(10_000).build() }
    }

    /// Look up `token`, calling `fetch` on a miss. `Ok(None)` (token invalid)
    /// is cached; `Err` is returned to exactly one caller and never cached.
    pub async fn get_or_fetch<F, Fut>(&self, token: &str, fetch: F) -> Option<User>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<User>>>,
    {
        self.cache
            .try_get_with(token.to_owned(), fetch())
            .await
            .ok()
            .flatten()
    }

    pub async fn invalidate(&self, token: &str) {
        self.cache.invalidate(token).await;
    }
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
