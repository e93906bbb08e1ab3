// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Queue Manager: a thin domain wrapper over `persistence::entries`,
//! responsible for credential minting at admission and for the state-name
//! vocabulary the TSM and transport layers call by (`join`, `leave`,
//! `peek_next_waiting`, `set_state`, `complete`, `get_by_token`, `status`,
//! `cleanup_stale`) rather than raw SQL verbs.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::ClawError;
use crate::persistence::entries;
use crate::persistence::models::{EntryResult, EntryState, QueueEntry};
use crate::token;

/// Result of a successful admission.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Admission {
    pub entry_id: String,
    pub raw_token: String,
    pub position: i64,
}

/// Snapshot counts plus the current live (ready/active) entry, if any.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStatus {
    pub counts: Vec<(String, i64)>,
    pub live: Option<QueueEntry>,
}

#[derive(Clone)]
pub struct QueueManager {
    pool: SqlitePool,
}

impl QueueManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Admit a new player: mint a bearer credential, hash it, and insert a
    /// `waiting` row at the next position. The raw token is never stored.
    pub async fn join(&self, name: &str, email: &str, ip: &str) -> Result<Admission, ClawError> {
        let entry_id = Uuid::new_v4().to_string();
        let raw_token = token::mint().map_err(|_| ClawError::Internal)?;
        let token_hash = token::hash(&raw_token);

        let position = entries::insert_waiting(&self.pool, &entry_id, name, email, ip, &token_hash)
            .await
            .map_err(|_| ClawError::Persistence)?;

        Ok(Admission { entry_id, raw_token, position })
    }

    /// Leave the queue from any non-terminal state. Returns the entry's
    /// post-leave state so the caller (TSM, if it was live) can react.
    pub async fn leave(&self, token_hash: &str) -> Result<Option<QueueEntry>, ClawError> {
        entries::leave(&self.pool, token_hash).await.map_err(|_| ClawError::Persistence)
    }

    pub async fn peek_next_waiting(&self) -> Result<Option<QueueEntry>, ClawError> {
        entries::peek_next_waiting(&self.pool).await.map_err(|_| ClawError::Persistence)
    }

    pub async fn get_live(&self) -> Result<Option<QueueEntry>, ClawError> {
        entries::get_live(&self.pool).await.map_err(|_| ClawError::Persistence)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<QueueEntry>, ClawError> {
        entries::get_by_id(&self.pool, id).await.map_err(|_| ClawError::Persistence)
    }

    pub async fn get_by_token(&self, raw_token: &str) -> Result<Option<QueueEntry>, ClawError> {
        let hash = token::hash(raw_token);
        entries::get_by_token_hash(&self.pool, &hash).await.map_err(|_| ClawError::Persistence)
    }

    /// Promote an entry to `ready` or `active`. Other target states are
    /// reached through `complete`/`leave` instead, which also record a
    /// result.
    pub async fn set_state(&self, entry_id: &str, state: EntryState) -> Result<(), ClawError> {
        match state {
            EntryState::Ready => entries::promote_to_ready(&self.pool, entry_id).await,
            EntryState::Active => entries::promote_to_active(&self.pool, entry_id).await,
            EntryState::Waiting | EntryState::Done | EntryState::Cancelled => {
                return Err(ClawError::Validation);
            }
        }
        .map_err(|_| ClawError::Conflict)
    }

    pub async fn set_deadlines(
        &self,
        entry_id: &str,
        try_move_end_at: Option<i64>,
        turn_end_at: Option<i64>,
    ) -> Result<(), ClawError> {
        entries::set_deadlines(&self.pool, entry_id, try_move_end_at, turn_end_at)
            .await
            .map_err(|_| ClawError::Persistence)
    }

    pub async fn set_tries_used(&self, entry_id: &str, tries_used: i64) -> Result<(), ClawError> {
        entries::set_tries_used(&self.pool, entry_id, tries_used).await.map_err(|_| ClawError::Persistence)
    }

    /// Finalize an entry with a terminal result. `Cancelled` results land in
    /// the `cancelled` state; every other result lands in `done`.
    pub async fn complete(
        &self,
        entry_id: &str,
        result: EntryResult,
        tries_used: i64,
    ) -> Result<(), ClawError> {
        let terminal_state =
            if result == EntryResult::Cancelled { EntryState::Cancelled } else { EntryState::Done };
        entries::complete(&self.pool, entry_id, terminal_state, result, tries_used)
            .await
            .map_err(|_| ClawError::Persistence)
    }

    pub async fn status(&self) -> Result<QueueStatus, ClawError> {
        let counts = entries::status_counts(&self.pool).await.map_err(|_| ClawError::Persistence)?;
        let live = entries::get_live(&self.pool).await.map_err(|_| ClawError::Persistence)?;
        Ok(QueueStatus { counts, live })
    }

    /// Reconcile any `{ready, active}` row left over from an unclean restart
    /// to a terminal state. Called once at startup before the TSM is spawned.
    pub async fn cleanup_stale(&self) -> Result<usize, ClawError> {
        entries::cleanup_stale(&self.pool).await.map_err(|_| ClawError::Persistence)
    }
}
