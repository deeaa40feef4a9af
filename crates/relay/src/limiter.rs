// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-IP token-bucket admission control at the HTTP edge.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Idle entries older than this are dropped by the sweeper.
const IDLE_EVICTION: Duration = Duration::from_secs(600);
/// How often the sweeper runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// A single refilling bucket. Also reused by the bandwidth meter, which
/// counts bytes instead of requests.
#[derive(Debug, Clone)]
pub struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self { capacity, tokens: capacity, refill_rate, last_refill: Instant::now() }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Consume `n` tokens if available.
    pub fn try_consume(&mut self, n: f64) -> bool {
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Time until `n` tokens will be available, `None` when already there.
    /// `n` is clamped to capacity; callers wanting more must chunk.
    pub fn wait_hint(&mut self, n: f64) -> Option<Duration> {
        self.refill();
        let n = n.min(self.capacity);
        if self.tokens >= n {
            return None;
        }
        let missing = n - self.tokens;
        Some(Duration::from_secs_f64(missing / self.refill_rate))
    }

    pub fn idle_for(&self) -> Duration {
        self.last_refill.elapsed()
    }
}

/// Token-bucket limiter keyed by client IP.
pub struct IpRateLimiter {
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
    rps: f64,
    burst: u32,
}

impl IpRateLimiter {
    pub fn new(rps: f64, burst: u32) -> Self {
        Self { buckets: Mutex::new(HashMap::new()), rps, burst }
    }

    /// Admit or reject one request from `ip`.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket =
            buckets.entry(ip).or_insert_with(|| Bucket::new(f64::from(self.burst), self.rps));
        bucket.try_consume(1.0)
    }

    /// Drop buckets idle past the eviction horizon.
    pub async fn sweep(&self, idle_horizon: Duration) {
        let mut buckets = self.buckets.lock().await;
        buckets.retain(|_, b| b.idle_for() < idle_horizon);
    }

    pub async fn len(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

/// Spawn the background eviction sweep for an IP limiter.
pub fn spawn_sweeper(
    limiter: Arc<IpRateLimiter>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(SWEEP_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            limiter.sweep(IDLE_EVICTION).await;
        }
    });
}

#[cfg(test)]
#[path = "limiter_tests.rs"]
mod tests;
