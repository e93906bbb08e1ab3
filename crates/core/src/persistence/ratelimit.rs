// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable side of rate limiting. The in-memory token bucket
//! (`crate::ratelimit::RateLimiter`) is the hot path; this module only
//! records observations for quota windows that must survive a restart
//! (per-IP/per-identity admission quotas) and prunes them by age.

use sqlx::SqlitePool;

use super::models::epoch_secs;

/// Record one observation under `key` (e.g. `ip:1.2.3.4`, `email:a@x.com`).
pub async fn record(pool: &SqlitePool, key: &str) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO rate_limit_observations (key, timestamp) VALUES (?, ?)")
        .bind(key)
        .bind(epoch_secs())
        .execute(pool)
        .await?;
    Ok(())
}

/// Count observations for `key` with timestamp >= `since`.
pub async fn count_since(pool: &SqlitePool, key: &str, since: i64) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM rate_limit_observations WHERE key = ? AND timestamp >= ?",
    )
    .bind(key)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn prune_older_than(pool: &SqlitePool, cutoff: i64) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM rate_limit_observations WHERE timestamp < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(())
}
