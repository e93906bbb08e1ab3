// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Broadcast Hub: fans out spectator-facing messages to every connected
//! spectator session, capped at `max_status_viewers`, with a per-session
//! send timeout so one stalled socket can never delay the others.
//!
//! Grounded on this workspace's `state::Aggregator` (a `broadcast::Sender`
//! plus a cached-state map), but a plain `broadcast` channel only degrades a
//! slow subscriber by lagging it — it never evicts. Here each session gets
//! its own bounded `mpsc` channel, and `publish` dispatches a
//! `tokio::time::timeout`-bounded send per session as its own task, evicting
//! on timeout or on a closed receiver, the same way `upstream/health.rs`
//! evicts a session after consecutive failures without blocking the health
//! loop for others — and without blocking the publisher itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::config::LiveConfig;
use crate::error::ClawError;

/// The closed set of spectator-facing broadcast message types.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    QueueUpdate { counts: Vec<(String, i64)>, live_entry_id: Option<String> },
    StateUpdate {
        state: String,
        state_seconds_left: Option<u64>,
        turn_seconds_left: Option<u64>,
        current_try: i64,
        max_tries: u32,
        active_entry_id: Option<String>,
    },
    TurnEnd { entry_id: String, result: String },
    Keepalive,
}

/// Depth of each per-session outbound queue. A session lagging this far
/// behind will fail its next timed send and be evicted.
const SESSION_QUEUE_DEPTH: usize = 32;

/// Interval between synthetic keepalive broadcasts.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub struct BroadcastHub {
    sessions: RwLock<HashMap<Uuid, mpsc::Sender<BroadcastMessage>>>,
    live: Arc<ArcSwap<LiveConfig>>,
}

impl BroadcastHub {
    pub fn new(live: Arc<ArcSwap<LiveConfig>>) -> Arc<Self> {
        Arc::new(Self { sessions: RwLock::new(HashMap::new()), live })
    }

    /// Register a new spectator session, subject to `max_status_viewers`.
    pub async fn subscribe(&self) -> Result<(Uuid, mpsc::Receiver<BroadcastMessage>), ClawError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.live.load().max_status_viewers {
            return Err(ClawError::Conflict);
        }
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        sessions.insert(id, tx);
        Ok((id, rx))
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        self.sessions.write().await.remove(&id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Fan `message` out to every registered session with a bounded timeout
    /// per session. Each session's send is dispatched as its own task, so
    /// one stalled socket can neither delay another session's delivery nor
    /// keep the caller (the TSM actor) waiting on it — `publish` returns as
    /// soon as the fan-out is dispatched, never once a send actually lands.
    /// Sessions that time out or whose receiver has closed are evicted.
    pub async fn publish(self: &Arc<Self>, message: BroadcastMessage) {
        let send_timeout = self.live.load().status_send_timeout();
        let snapshot: Vec<(Uuid, mpsc::Sender<BroadcastMessage>)> =
            self.sessions.read().await.iter().map(|(id, tx)| (*id, tx.clone())).collect();

        for (id, tx) in snapshot {
            let hub = Arc::clone(self);
            let message = message.clone();
            tokio::spawn(async move {
                match timeout(send_timeout, tx.send(message)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        hub.unsubscribe(id).await;
                    }
                    Err(_) => {
                        warn!(session = %id, "broadcast send timed out, evicting");
                        hub.unsubscribe(id).await;
                    }
                }
            });
        }
    }

    /// Spawn the periodic keepalive publisher. Runs until the hub is dropped
    /// (the task holds only a weak-equivalent `Arc` clone, so it ends when
    /// the caller also drops its handles and the process shuts down).
    pub fn spawn_keepalive(self: &Arc<Self>) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            loop {
                ticker.tick().await;
                hub.publish(BroadcastMessage::Keepalive).await;
            }
        });
    }
}
