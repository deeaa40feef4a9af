// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-user bandwidth metering on relayed bytes.
//!
//! Each user gets a refilling byte bucket plus a monthly counter. The splice
//! path calls [`BandwidthMeter::wait`] before every browser-bound write, so a
//! slow dashboard applies backpressure to its own wing without stalling
//! anyone else. Counters drain losslessly into the identity store's
//! `bandwidth_log` roll-up.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::identity::{month_utc, IdentityStore, Tier};
use crate::limiter::Bucket;

struct UserMeter {
    bucket: Bucket,
    /// Bytes counted since the last drain.
    pending: u64,
    /// Bytes counted this month, never zeroed by drain.
    month_total: u64,
}

struct Inner {
    month: String,
    users: HashMap<String, UserMeter>,
}

/// Cluster-wide byte meter. On edges the monthly totals are per-node partial
/// sums; the login node holds the absorbed aggregate.
pub struct BandwidthMeter {
    inner: Mutex<Inner>,
    banned: RwLock<HashSet<String>>,
    bytes_per_sec: f64,
    burst: f64,
}

impl BandwidthMeter {
    pub fn new(bytes_per_sec: u64, burst: u64) -> Self {
        Self {
            inner: Mutex::new(Inner { month: month_utc(), users: HashMap::new() }),
            banned: RwLock::new(HashSet::new()),
            bytes_per_sec: bytes_per_sec as f64,
            burst: (burst as f64).max(1.0),
        }
    }

    fn meter_entry<'a>(&self, inner: &'a mut Inner, user_id: &str) -> &'a mut UserMeter {
        let month = month_utc();
        if inner.month != month {
            inner.month = month;
            for m in inner.users.values_mut() {
                m.month_total = 0;
            }
        }
        inner.users.entry(user_id.to_owned()).or_insert_with(|| UserMeter {
            bucket: Bucket::new(self.burst, self.bytes_per_sec),
            pending: 0,
            month_total: 0,
        })
    }

    /// Block until `n` bytes of budget are available, chunking where `n`
    /// exceeds the burst size. Oversized requests never fail on size alone;
    /// callers bound the whole wait with a timeout.
    pub async fn wait(&self, user_id: &str, n: u64) {
        {
            let mut inner = self.inner.lock().await;
            let meter = self.meter_entry(&mut inner, user_id);
            meter.pending += n;
            meter.month_total += n;
        }

        let mut remaining = n as f64;
        while remaining > 0.0 {
            let take = remaining.min(self.burst);
            loop {
                let hint = {
                    let mut inner = self.inner.lock().await;
                    let meter = self.meter_entry(&mut inner, user_id);
                    match meter.bucket.wait_hint(take) {
                        None => {
                            meter.bucket.try_consume(take);
                            None
                        }
                        Some(d) => Some(d),
                    }
                };
                match hint {
                    None => break,
                    Some(d) => tokio::time::sleep(d).await,
                }
            }
            remaining -= take;
        }
    }

    /// Snapshot-and-zero the pending counters.
    pub async fn drain(&self) -> HashMap<String, u64> {
        let mut inner = self.inner.lock().await;
        let mut out = HashMap::new();
        for (user, meter) in inner.users.iter_mut() {
            if meter.pending > 0 {
                out.insert(user.clone(), meter.pending);
                meter.pending = 0;
            }
        }
        out
    }

    /// Undo a drain whose downstream persistence failed. The monthly totals
    /// already include these bytes, so only the pending side is restored.
    pub async fn re_add(&self, drained: &HashMap<String, u64>) {
        let mut inner = self.inner.lock().await;
        for (user, bytes) in drained {
            let meter = self.meter_entry(&mut inner, user);
            meter.pending += bytes;
        }
    }

    /// Fold a peer node's drained counters into this meter (login side).
    pub async fn absorb(&self, counters: &HashMap<String, u64>) {
        let mut inner = self.inner.lock().await;
        for (user, bytes) in counters {
            let meter = self.meter_entry(&mut inner, user);
            meter.pending += bytes;
            meter.month_total += bytes;
        }
    }

    /// Month-to-date bytes for one user.
    pub async fn month_total(&self, user_id: &str) -> u64 {
        let mut inner = self.inner.lock().await;
        self.meter_entry(&mut inner, user_id).month_total
    }

    /// Users over `cap` this month who are not entitled past it.
    /// `is_entitled` is the tier lookup supplied by the caller.
    pub async fn exceeded_users<F, Fut>(&self, cap: u64, is_entitled: F) -> Vec<String>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = bool>,
    {
        let over: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .users
                .iter()
                .filter(|(_, m)| m.month_total > cap)
                .map(|(u, _)| u.clone())
                .collect()
        };
        let mut out = Vec::new();
        for user in over {
            if !is_entitled(user.clone()).await {
                out.push(user);
            }
        }
        out
    }

    /// Replace the banned-user set (applied from sync responses on edges,
    /// computed from quotas on the login node).
    pub async fn set_banned(&self, users: Vec<String>) {
        *self.banned.write().await = users.into_iter().collect();
    }

    pub async fn is_banned(&self, user_id: &str) -> bool {
        self.banned.read().await.contains(user_id)
    }

    pub async fn banned_list(&self) -> Vec<String> {
        self.banned.read().await.iter().cloned().collect()
    }
}

/// Login-node loop: persist drained counters and refresh the banned set.
pub fn spawn_drain_loop(
    meter: Arc<BandwidthMeter>,
    identity: Arc<dyn IdentityStore>,
    cap: u64,
    interval: std::time::Duration,
    shutdown: tokio_util::sync::CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let drained = meter.drain().await;
            let month = month_utc();
            for (user, bytes) in &drained {
                if let Err(e) = identity.record_bandwidth(user, &month, *bytes).await {
                    tracing::warn!(user_id = %user, err = %e, "bandwidth persist failed, re-adding");
                    let mut one = HashMap::new();
                    one.insert(user.clone(), *bytes);
                    meter.re_add(&one).await;
                }
            }

            let identity = Arc::clone(&identity);
            let exceeded = meter
                .exceeded_users(cap, |user| {
                    let identity = Arc::clone(&identity);
                    async move {
                        matches!(identity.user_tier(&user).await, Ok(Tier::Pro))
                    }
                })
                .await;
            meter.set_banned(exceeded).await;
        }
    });
}

#[cfg(test)]
#[path = "bandwidth_tests.rs"]
mod tests;
