// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable store for queue entries, events, contacts, and rate-limit
//! buckets. WAL-journaled SQLite with schema-versioned migrations.

pub mod contacts;
pub mod entries;
pub mod events;
pub mod models;
pub mod ratelimit;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Open the database, enable WAL journaling, and run pending migrations.
pub async fn open(db_path: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        // A single writer connection avoids SQLITE_BUSY under WAL; readers
        // fan out fine but every mutating path in this crate serializes
        // through the same pool.
        .max_connections(8)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Prune events, terminal queue entries, and rate-limit observations older
/// than `retention_hours`. Contacts are never pruned by age (per spec), and
/// a queue entry is only eligible once it has actually completed — a live
/// `waiting`/`ready`/`active` row is never touched regardless of age.
pub async fn prune_retention(pool: &SqlitePool, retention_hours: u64) -> anyhow::Result<()> {
    let cutoff = models::epoch_secs() - (retention_hours as i64 * 3600);

    sqlx::query("DELETE FROM game_events WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;

    entries::prune_terminal_older_than(pool, cutoff).await?;
    ratelimit::prune_older_than(pool, cutoff).await?;

    Ok(())
}

/// In-memory pool for tests. Gated behind `test-util` (rather than bare
/// `#[cfg(test)]`) so it's also reachable from this crate's `tests/`
/// integration binaries, which link the lib compiled outside `--cfg test`.
#[cfg(any(test, feature = "test-util"))]
pub async fn open_in_memory() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
