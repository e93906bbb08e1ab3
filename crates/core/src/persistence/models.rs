// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of queue entry states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Waiting,
    Ready,
    Active,
    Done,
    Cancelled,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    /// Entries in this set are the (at most one) active entry per spec.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Ready | Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

impl FromStr for EntryState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "ready" => Ok(Self::Ready),
            "active" => Ok(Self::Active),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            other => anyhow::bail!("unknown entry state: {other}"),
        }
    }
}

/// Closed set of terminal results, recorded only alongside a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryResult {
    Win,
    Loss,
    Expired,
    Skipped,
    AdminSkipped,
    Cancelled,
    Error,
}

impl EntryResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
            Self::Expired => "expired",
            Self::Skipped => "skipped",
            Self::AdminSkipped => "admin_skipped",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl FromStr for EntryResult {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" => Ok(Self::Win),
            "loss" => Ok(Self::Loss),
            "expired" => Ok(Self::Expired),
            "skipped" => Ok(Self::Skipped),
            "admin_skipped" => Ok(Self::AdminSkipped),
            "cancelled" => Ok(Self::Cancelled),
            "error" => Ok(Self::Error),
            other => anyhow::bail!("unknown entry result: {other}"),
        }
    }
}

/// Raw row shape as stored (state/result as TEXT columns) — sqlx decodes
/// directly into this, then [`QueueEntry::try_from`] parses the closed sets.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueEntryRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub ip: String,
    pub state: String,
    pub position: Option<i64>,
    pub token_hash: String,
    pub created_at: i64,
    pub activated_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result: Option<String>,
    pub tries_used: i64,
    pub try_move_end_at: Option<i64>,
    pub turn_end_at: Option<i64>,
}

/// A queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub name: String,
    pub email: String,
    pub ip: String,
    pub state: EntryState,
    pub position: Option<i64>,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub created_at: i64,
    pub activated_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result: Option<EntryResult>,
    pub tries_used: i64,
    pub try_move_end_at: Option<i64>,
    pub turn_end_at: Option<i64>,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = anyhow::Error;

    fn try_from(row: QueueEntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            email: row.email,
            ip: row.ip,
            state: row.state.parse()?,
            position: row.position,
            token_hash: row.token_hash,
            created_at: row.created_at,
            activated_at: row.activated_at,
            completed_at: row.completed_at,
            result: row.result.as_deref().map(str::parse).transpose()?,
            tries_used: row.tries_used,
            try_move_end_at: row.try_move_end_at,
            turn_end_at: row.turn_end_at,
        })
    }
}

/// Closed set of game event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventType {
    Join,
    Leave,
    Activate,
    ReadyPrompt,
    MoveStart,
    Direction,
    Drop,
    Win,
    TryEnd,
    TurnEnd,
    Disconnect,
    Reconnect,
    EmergencyStop,
    AdminAction,
    Error,
}

impl GameEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Activate => "activate",
            Self::ReadyPrompt => "ready_prompt",
            Self::MoveStart => "move_start",
            Self::Direction => "direction",
            Self::Drop => "drop",
            Self::Win => "win",
            Self::TryEnd => "try_end",
            Self::TurnEnd => "turn_end",
            Self::Disconnect => "disconnect",
            Self::Reconnect => "reconnect",
            Self::EmergencyStop => "emergency_stop",
            Self::AdminAction => "admin_action",
            Self::Error => "error",
        }
    }
}

/// A row in `game_events`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameEvent {
    pub id: i64,
    pub entry_id: String,
    #[sqlx(rename = "type")]
    pub event_type: String,
    pub detail_json: String,
    pub created_at: i64,
}

/// A row in `contacts`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contact {
    pub email: String,
    pub name: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub visits: i64,
}

/// Current epoch seconds.
pub fn epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
