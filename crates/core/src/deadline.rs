// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named, individually-cancellable deadline timers. Every timer the TSM or
//! Actuator Controller arms is keyed so it can be cancelled atomically in the
//! same match arm that performs the transition it would otherwise race —
//! never via a detached sleep-then-check fiber.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A scheduler of named timers. `K` identifies a timer slot (e.g. `Phase`,
/// `HardTurn`, `DisconnectGrace`, or `Direction(dir)`); arming a key that is
/// already armed cancels the previous timer first, so callers never need to
/// cancel-then-arm themselves.
pub struct DeadlineScheduler<K> {
    handles: Mutex<HashMap<K, JoinHandle<()>>>,
    fired_tx: mpsc::UnboundedSender<K>,
}

impl<K> DeadlineScheduler<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Build a scheduler and the receiver its owner selects on for fired
    /// deadlines.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<K>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        (Self { handles: Mutex::new(HashMap::new()), fired_tx }, fired_rx)
    }

    /// Arm `key` to fire after `after`. Replaces and cancels any existing
    /// timer under the same key.
    pub fn arm(&self, key: K, after: Duration) {
        self.cancel(&key);
        let tx = self.fired_tx.clone();
        let fired_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(fired_key);
        });
        self.handles.lock().unwrap_or_else(|poison| poison.into_inner()).insert(key, handle);
    }

    /// Cancel `key` if armed. Returns whether a timer was actually cancelled.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = self.handles.lock().unwrap_or_else(|poison| poison.into_inner()).remove(key);
        match removed {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every armed timer. Used on shutdown and on `turn_end`.
    pub fn cancel_all(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(|poison| poison.into_inner());
        for (_, handle) in handles.drain() {
            handle.abort();
        }
    }

    /// Whether `key` currently has a live timer.
    pub fn is_armed(&self, key: &K) -> bool {
        self.handles.lock().unwrap_or_else(|poison| poison.into_inner()).contains_key(key)
    }
}
