// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of live Control Session channels, keyed by entry id. The TSM
//! sends per-player outbound messages here without knowing anything about
//! WebSockets; `transport::control_ws` is the only thing that ever reads
//! these receivers.
//!
//! Registering a new sender for an entry id that already has one replaces
//! it and drops the old sender — the old connection's forwarder loop
//! observes its channel close and tears down the socket, giving "a new
//! authed connection for an entry id closes the previous one" for free.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

/// The closed set of outbound Control Session message types, per
/// `transport::auth`-style bearer sessions but scoped to one entry id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    AuthOk { entry_id: String },
    Error { code: String, message: String },
    StateUpdate {
        state: String,
        state_seconds_left: Option<u64>,
        turn_seconds_left: Option<u64>,
        current_try: i64,
        max_tries: u32,
    },
    ReadyPrompt { deadline_seconds: u64 },
    TurnEnd { result: String },
    ControlAck,
    LatencyPing,
}

const SESSION_QUEUE_DEPTH: usize = 16;

#[derive(Default)]
pub struct ControlRegistry {
    senders: RwLock<HashMap<String, mpsc::Sender<ControlMessage>>>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel for `entry_id`, returning the sender (so the
    /// caller can later prove ownership to `unregister_if_current`) and the
    /// receiver it should forward onto the socket. Replaces (and implicitly
    /// closes) any prior registration for the same entry id — a reconnect
    /// never counts against `max_control_sessions` since it does not grow
    /// the session count. Rejects a genuinely new entry id once the
    /// registry already holds `max_sessions` distinct entries.
    pub async fn register(
        &self,
        entry_id: &str,
        max_sessions: usize,
    ) -> Result<(mpsc::Sender<ControlMessage>, mpsc::Receiver<ControlMessage>), ()> {
        let mut senders = self.senders.write().await;
        if !senders.contains_key(entry_id) && senders.len() >= max_sessions {
            return Err(());
        }
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        senders.insert(entry_id.to_owned(), tx.clone());
        Ok((tx, rx))
    }

    /// Remove the registration for `entry_id` if it still points at the
    /// caller's own sender (avoids a reconnect race unregistering the new
    /// connection rather than the one that is actually closing). Returns
    /// whether this call actually removed the registration — the caller
    /// uses that to decide whether it was superseded by a reconnect.
    pub async fn unregister_if_current(
        &self,
        entry_id: &str,
        tx: &mpsc::Sender<ControlMessage>,
    ) -> bool {
        let mut senders = self.senders.write().await;
        if let Some(current) = senders.get(entry_id) {
            if current.same_channel(tx) {
                senders.remove(entry_id);
                return true;
            }
        }
        false
    }

    /// Best-effort send to `entry_id`'s current session, if any. Never
    /// blocks the TSM: a full or closed queue is simply a miss.
    pub async fn send(&self, entry_id: &str, message: ControlMessage) -> bool {
        let sender = self.senders.read().await.get(entry_id).cloned();
        match sender {
            Some(tx) => tx.try_send(message).is_ok(),
            None => false,
        }
    }

    pub async fn is_connected(&self, entry_id: &str) -> bool {
        self.senders.read().await.contains_key(entry_id)
    }

    pub async fn count(&self) -> usize {
        self.senders.read().await.len()
    }
}
