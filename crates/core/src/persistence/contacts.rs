// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sqlx::SqlitePool;

use super::models::epoch_secs;

/// Upsert a contact by email: create on first admission, bump `last_seen`
/// and `visits` on re-admission. Never deleted by retention.
pub async fn upsert(pool: &SqlitePool, email: &str, name: &str) -> anyhow::Result<()> {
    let now = epoch_secs();
    sqlx::query(
        "INSERT INTO contacts (email, name, first_seen, last_seen, visits)
         VALUES (?, ?, ?, ?, 1)
         ON CONFLICT(email) DO UPDATE SET
            name = excluded.name,
            last_seen = excluded.last_seen,
            visits = visits + 1",
    )
    .bind(email)
    .bind(name)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}
