// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sqlx::SqlitePool;

use super::models::{epoch_secs, EntryResult, EntryState, QueueEntry, QueueEntryRow};

/// Insert a new `waiting` entry with the next available position.
/// Position assignment and insertion happen in one transaction so two
/// concurrent joins can never be handed the same position.
pub async fn insert_waiting(
    pool: &SqlitePool,
    id: &str,
    name: &str,
    email: &str,
    ip: &str,
    token_hash: &str,
) -> anyhow::Result<i64> {
    let mut tx = pool.begin().await?;

    let next_position: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) + 1 FROM queue_entries WHERE state = 'waiting'")
            .fetch_one(&mut *tx)
            .await?;

    sqlx::query(
        "INSERT INTO queue_entries (id, name, email, ip, state, position, token_hash, created_at, tries_used)
         VALUES (?, ?, ?, ?, 'waiting', ?, ?, ?, 0)",
    )
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(ip)
    .bind(next_position)
    .bind(token_hash)
    .bind(epoch_secs())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(next_position)
}

pub async fn get_by_id(pool: &SqlitePool, id: &str) -> anyhow::Result<Option<QueueEntry>> {
    let row = sqlx::query_as::<_, QueueEntryRow>("SELECT * FROM queue_entries WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(QueueEntry::try_from).transpose()
}

pub async fn get_by_token_hash(
    pool: &SqlitePool,
    token_hash: &str,
) -> anyhow::Result<Option<QueueEntry>> {
    let row = sqlx::query_as::<_, QueueEntryRow>("SELECT * FROM queue_entries WHERE token_hash = ?")
        .bind(token_hash)
        .fetch_optional(pool)
        .await?;
    row.map(QueueEntry::try_from).transpose()
}

/// The single entry (if any) in `ready` or `active`.
pub async fn get_live(pool: &SqlitePool) -> anyhow::Result<Option<QueueEntry>> {
    let row = sqlx::query_as::<_, QueueEntryRow>(
        "SELECT * FROM queue_entries WHERE state IN ('ready', 'active') LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    row.map(QueueEntry::try_from).transpose()
}

/// The next `waiting` entry by position, if any.
pub async fn peek_next_waiting(pool: &SqlitePool) -> anyhow::Result<Option<QueueEntry>> {
    let row = sqlx::query_as::<_, QueueEntryRow>(
        "SELECT * FROM queue_entries WHERE state = 'waiting' ORDER BY position ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    row.map(QueueEntry::try_from).transpose()
}

/// Promote a `waiting` entry to `ready`. Relies on the partial unique index
/// to reject this if another row is already `ready`/`active`.
pub async fn promote_to_ready(pool: &SqlitePool, id: &str) -> anyhow::Result<()> {
    let result = sqlx::query(
        "UPDATE queue_entries SET state = 'ready', position = NULL WHERE id = ? AND state = 'waiting'",
    )
    .bind(id)
    .execute(pool)
    .await?;
    anyhow::ensure!(result.rows_affected() == 1, "entry {id} was not in waiting state");
    Ok(())
}

/// Promote a `ready` entry to `active`, stamping `activated_at`.
pub async fn promote_to_active(pool: &SqlitePool, id: &str) -> anyhow::Result<()> {
    let result = sqlx::query(
        "UPDATE queue_entries SET state = 'active', activated_at = ? WHERE id = ? AND state = 'ready'",
    )
    .bind(epoch_secs())
    .bind(id)
    .execute(pool)
    .await?;
    anyhow::ensure!(result.rows_affected() == 1, "entry {id} was not in ready state");
    Ok(())
}

/// Materialize the two TSM deadlines onto the entry row, on entry to `moving`.
pub async fn set_deadlines(
    pool: &SqlitePool,
    id: &str,
    try_move_end_at: Option<i64>,
    turn_end_at: Option<i64>,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE queue_entries SET try_move_end_at = ?, turn_end_at = ? WHERE id = ?")
        .bind(try_move_end_at)
        .bind(turn_end_at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_tries_used(pool: &SqlitePool, id: &str, tries_used: i64) -> anyhow::Result<()> {
    sqlx::query("UPDATE queue_entries SET tries_used = ? WHERE id = ?")
        .bind(tries_used)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Finalize an entry to a terminal state (`done` or `cancelled`) with its
/// result. Set exactly once, enforced by only matching non-terminal rows.
pub async fn complete(
    pool: &SqlitePool,
    id: &str,
    terminal_state: EntryState,
    result: EntryResult,
    tries_used: i64,
) -> anyhow::Result<()> {
    let row = sqlx::query(
        "UPDATE queue_entries
         SET state = ?, result = ?, completed_at = ?, tries_used = ?
         WHERE id = ? AND state NOT IN ('done', 'cancelled')",
    )
    .bind(terminal_state.as_str())
    .bind(result.as_str())
    .bind(epoch_secs())
    .bind(tries_used)
    .bind(id)
    .execute(pool)
    .await?;
    anyhow::ensure!(row.rows_affected() == 1, "entry {id} was already terminal");
    Ok(())
}

/// Voluntary leave from any non-terminal state.
pub async fn leave(pool: &SqlitePool, token_hash: &str) -> anyhow::Result<Option<QueueEntry>> {
    let entry = get_by_token_hash(pool, token_hash).await?;
    let Some(entry) = entry else { return Ok(None) };
    if entry.state.is_terminal() {
        return Ok(Some(entry));
    }
    // Active/ready leaves are handled by the caller (TSM converts them into
    // a turn_end); waiting leaves are finalized directly here.
    if entry.state == EntryState::Waiting {
        complete(pool, &entry.id, EntryState::Cancelled, EntryResult::Cancelled, 0).await?;
    }
    get_by_id(pool, &entry.id).await
}

/// Count of entries per state, for the operator dashboard / queue status.
pub async fn status_counts(pool: &SqlitePool) -> anyhow::Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT state, COUNT(*) FROM queue_entries GROUP BY state")
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

/// On startup, finalize any row still in `{ready, active}` as `expired`
/// (or `error` if it never even reached `active`). Recovery never resumes a
/// turn — every interrupted turn finalizes here.
pub async fn cleanup_stale(pool: &SqlitePool) -> anyhow::Result<usize> {
    let stale = sqlx::query_as::<_, QueueEntryRow>(
        "SELECT * FROM queue_entries WHERE state IN ('ready', 'active')",
    )
    .fetch_all(pool)
    .await?;

    let count = stale.len();
    for row in stale {
        let entry = QueueEntry::try_from(row)?;
        let result = if entry.activated_at.is_some() { EntryResult::Expired } else { EntryResult::Error };
        complete(pool, &entry.id, EntryState::Done, result, entry.tries_used).await?;
    }
    Ok(count)
}

/// Prune terminal (`done`/`cancelled`) entries completed before `cutoff`.
/// Live (`waiting`/`ready`/`active`) rows are never matched — only a
/// terminal `completed_at` makes a row eligible.
pub async fn prune_terminal_older_than(pool: &SqlitePool, cutoff: i64) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM queue_entries WHERE state IN ('done', 'cancelled') AND completed_at < ?",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
