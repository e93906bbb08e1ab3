// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory token bucket for per-connection command rate limiting, plus a
//! durable-backed quota check for admission (IP/identity). The durable side
//! lives in `crate::persistence::ratelimit` — this module is the hot path.

use std::time::{Duration, Instant};

use sqlx::SqlitePool;

/// A simple token bucket: refills continuously at `rate_hz`, capped at
/// `rate_hz` tokens (a one-second burst). Over-limit callers get `false` and
/// the caller is expected to silently drop the frame, per §4.4/§7.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_hz: u32) -> Self {
        let rate = rate_hz.max(1) as f64;
        Self { capacity: rate, tokens: rate, refill_per_sec: rate, last_refill: Instant::now() }
    }

    /// Attempt to consume one token. Returns `true` if allowed.
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Durable admission quota: at most `limit` joins per `window` for a given
/// qualified key (`ip:...`, `email:...`). A DB count is fine here because
/// admission is low-frequency relative to control commands; the in-memory
/// token bucket above is what keeps the control channel off the DB.
pub async fn admission_quota_ok(
    pool: &SqlitePool,
    key: &str,
    limit: i64,
    window: Duration,
) -> anyhow::Result<bool> {
    let since = crate::persistence::models::epoch_secs() - window.as_secs() as i64;
    let count = crate::persistence::ratelimit::count_since(pool, key, since).await?;
    Ok(count < limit)
}

pub async fn record_admission(pool: &SqlitePool, key: &str) -> anyhow::Result<()> {
    crate::persistence::ratelimit::record(pool, key).await
}
