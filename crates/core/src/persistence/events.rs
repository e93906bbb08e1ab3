// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sqlx::SqlitePool;

use super::models::{epoch_secs, GameEvent, GameEventType};

/// Append a game event. Never mutated after insertion.
pub async fn append(
    pool: &SqlitePool,
    entry_id: &str,
    event_type: GameEventType,
    detail: serde_json::Value,
) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO game_events (entry_id, type, detail_json, created_at) VALUES (?, ?, ?, ?)")
        .bind(entry_id)
        .bind(event_type.as_str())
        .bind(detail.to_string())
        .bind(epoch_secs())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn for_entry(pool: &SqlitePool, entry_id: &str) -> anyhow::Result<Vec<GameEvent>> {
    let rows = sqlx::query_as::<_, GameEvent>(
        "SELECT id, entry_id, type, detail_json, created_at FROM game_events
         WHERE entry_id = ? ORDER BY created_at ASC",
    )
    .bind(entry_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
