// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Turn State Machine: the central subsystem. A single `tokio::spawn`ed
//! actor consumes a `mpsc::Receiver<TsmEvent>` — the same "one serialized
//! actor with a command channel" shape as the Actuator Controller — so every
//! event for the live entry is totally ordered. Deadlines are armed on a
//! [`DeadlineScheduler`] keyed by [`TimerKey`]; a losing timer is always
//! cancelled in the same match arm that performs the winning transition.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::actuator::{ActuatorController, Direction, PulseName};
use crate::broadcast::{BroadcastHub, BroadcastMessage};
use crate::config::LiveConfig;
use crate::control::{ControlMessage, ControlRegistry};
use crate::deadline::DeadlineScheduler;
use crate::error::ClawError;
use crate::persistence::models::{epoch_secs, EntryResult, GameEventType};
use crate::queue::QueueManager;

/// Settle time after a coin pulse before the actuator is considered ready
/// to receive direction commands. Not separately configurable — it is a
/// fixed hardware settle window, not a tuneable per spec's configuration
/// table.
const TRY_START_SETTLE: Duration = Duration::from_millis(500);

/// Closed set of TSM states. `TurnEnd` is transient: the actor passes
/// through it and returns to `Idle` within the same match arm, never
/// yielding control in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TsmState {
    Idle,
    ReadyPrompt,
    Moving,
    Dropping,
    PostDrop,
}

impl TsmState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ReadyPrompt => "ready_prompt",
            Self::Moving => "moving",
            Self::Dropping => "dropping",
            Self::PostDrop => "post_drop",
        }
    }
}

/// Named TSM timer slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKey {
    Phase,
    HardTurn,
    DisconnectGrace,
}

/// Inbound events accepted by the TSM actor.
#[derive(Debug, Clone)]
pub enum TsmEvent {
    Advance,
    ReadyConfirm { entry_id: String },
    DropPress { entry_id: String },
    DropRelease { entry_id: String },
    DirectionPress { entry_id: String, dir: Direction },
    DirectionRelease { entry_id: String, dir: Direction },
    WinTriggered,
    Disconnect { entry_id: String },
    Reconnect { entry_id: String },
    /// A player voluntarily left while their entry was ready/active.
    VoluntaryLeave { entry_id: String },
    AdminForceEnd { result: EntryResult },
    Pause,
    Resume,
}

/// A cloneable handle to the running TSM actor.
#[derive(Clone)]
pub struct TurnStateMachine {
    tx: mpsc::Sender<TsmEvent>,
}

impl TurnStateMachine {
    pub fn spawn(
        queue: QueueManager,
        actuator: ActuatorController,
        broadcast: Arc<BroadcastHub>,
        control: Arc<ControlRegistry>,
        pool: SqlitePool,
        live: Arc<ArcSwap<LiveConfig>>,
    ) -> TurnStateMachine {
        let (tx, rx) = mpsc::channel(128);
        let (timers, fired) = DeadlineScheduler::new();
        let actor = Tsm {
            state: TsmState::Idle,
            entry_id: None,
            current_try: 0,
            paused: false,
            drop_triggered: false,
            turn_end_at_epoch: None,
            phase_deadline_epoch: None,
            hard_deadline_epoch: None,
            queue,
            actuator,
            broadcast,
            control,
            pool,
            live,
            timers,
            self_tx: tx.clone(),
        };
        tokio::spawn(run(actor, rx, fired));

        TurnStateMachine { tx }
    }

    /// Submit an event. Best-effort: if the actor has somehow gone away the
    /// event is silently dropped, matching the "malformed/irrelevant input
    /// is ignored" posture used throughout the transition table.
    pub async fn submit(&self, event: TsmEvent) {
        let _ = self.tx.send(event).await;
    }
}

struct Tsm {
    state: TsmState,
    entry_id: Option<String>,
    current_try: u32,
    paused: bool,
    drop_triggered: bool,
    turn_end_at_epoch: Option<i64>,
    phase_deadline_epoch: Option<i64>,
    hard_deadline_epoch: Option<i64>,
    queue: QueueManager,
    actuator: ActuatorController,
    broadcast: Arc<BroadcastHub>,
    control: Arc<ControlRegistry>,
    pool: SqlitePool,
    live: Arc<ArcSwap<LiveConfig>>,
    timers: DeadlineScheduler<TimerKey>,
    self_tx: mpsc::Sender<TsmEvent>,
}

async fn run(
    mut tsm: Tsm,
    mut events: mpsc::Receiver<TsmEvent>,
    mut fired: mpsc::UnboundedReceiver<TimerKey>,
) {
    loop {
        tokio::select! {
            Some(event) = events.recv() => tsm.handle_event(event).await,
            Some(key) = fired.recv() => tsm.handle_timer(key).await,
            else => break,
        }
    }
}

impl Tsm {
    async fn handle_event(&mut self, event: TsmEvent) {
        match event {
            TsmEvent::Advance => self.try_advance().await,
            TsmEvent::ReadyConfirm { entry_id } => self.on_ready_confirm(entry_id).await,
            TsmEvent::DropPress { entry_id } => self.on_drop(entry_id).await,
            TsmEvent::DropRelease { .. } => {}
            TsmEvent::DirectionPress { entry_id, dir } => self.on_direction(entry_id, dir, true).await,
            TsmEvent::DirectionRelease { entry_id, dir } => self.on_direction(entry_id, dir, false).await,
            TsmEvent::WinTriggered => self.on_win_triggered().await,
            TsmEvent::Disconnect { entry_id } => self.on_disconnect(entry_id).await,
            TsmEvent::Reconnect { entry_id } => self.on_reconnect(entry_id).await,
            TsmEvent::VoluntaryLeave { entry_id } => self.on_admin_or_voluntary_end(entry_id, EntryResult::Cancelled).await,
            TsmEvent::AdminForceEnd { result } => {
                if let Some(entry_id) = self.entry_id.clone() {
                    self.on_admin_or_voluntary_end(entry_id, result).await;
                }
            }
            TsmEvent::Pause => self.paused = true,
            TsmEvent::Resume => self.paused = false,
        }
    }

    async fn handle_timer(&mut self, key: TimerKey) {
        match key {
            TimerKey::Phase => self.on_phase_deadline().await,
            TimerKey::HardTurn => self.on_hard_deadline().await,
            TimerKey::DisconnectGrace => self.on_disconnect_grace_expired().await,
        }
    }

    fn is_live_state(&self) -> bool {
        !matches!(self.state, TsmState::Idle)
    }

    async fn try_advance(&mut self) {
        if self.state != TsmState::Idle || self.paused {
            return;
        }
        let Ok(Some(entry)) = self.queue.peek_next_waiting().await else { return };
        if self.queue.set_state(&entry.id, crate::persistence::models::EntryState::Ready).await.is_err() {
            // Lost a race (shouldn't happen with a single actor, but the
            // partial unique index is the real guarantor) — stay idle.
            return;
        }

        self.entry_id = Some(entry.id.clone());
        self.current_try = 0;
        self.drop_triggered = false;

        let ready_prompt_time = self.live.load().ready_prompt_time();
        self.timers.arm(TimerKey::Phase, ready_prompt_time);
        self.phase_deadline_epoch = Some(epoch_secs() + ready_prompt_time.as_secs() as i64);
        self.state = TsmState::ReadyPrompt;

        self.control
            .send(
                &entry.id,
                ControlMessage::ReadyPrompt { deadline_seconds: ready_prompt_time.as_secs() },
            )
            .await;
        self.append_event(&entry.id, GameEventType::ReadyPrompt, serde_json::json!({})).await;
        self.broadcast_queue_and_state().await;
    }

    async fn on_ready_confirm(&mut self, entry_id: String) {
        if self.state != TsmState::ReadyPrompt || self.entry_id.as_deref() != Some(entry_id.as_str()) {
            return;
        }
        self.timers.cancel(&TimerKey::Phase);

        if self.queue.set_state(&entry_id, crate::persistence::models::EntryState::Active).await.is_err() {
            self.finalize(EntryResult::Error).await;
            return;
        }

        let live = self.live.load_full();
        let turn_end_at = epoch_secs() + live.turn_time_seconds as i64;
        self.turn_end_at_epoch = Some(turn_end_at);
        self.hard_deadline_epoch = Some(turn_end_at);
        self.timers.arm(TimerKey::HardTurn, live.turn_time());
        self.current_try = 0;

        self.append_event(&entry_id, GameEventType::Activate, serde_json::json!({})).await;
        self.start_try().await;
    }

    /// Shared by the initial try-start and every post-drop retry.
    async fn start_try(&mut self) {
        let Some(entry_id) = self.entry_id.clone() else { return };
        self.current_try += 1;
        self.drop_triggered = false;

        let live = self.live.load_full();
        if live.coin_each_try {
            if let Err(err) = self.actuator.pulse(PulseName::Coin).await {
                warn!(?err, "coin pulse failed at try-start");
                self.finalize(EntryResult::Error).await;
                return;
            }
            tokio::time::sleep(TRY_START_SETTLE).await;
        }

        let _ = self.queue.set_tries_used(&entry_id, self.current_try as i64).await;

        let try_move_end_at = epoch_secs() + live.try_move_seconds as i64;
        self.phase_deadline_epoch = Some(try_move_end_at);
        self.timers.arm(TimerKey::Phase, live.try_move_time());
        let _ = self
            .queue
            .set_deadlines(&entry_id, Some(try_move_end_at), self.turn_end_at_epoch)
            .await;

        self.state = TsmState::Moving;
        self.append_event(&entry_id, GameEventType::MoveStart, serde_json::json!({ "try": self.current_try })).await;
        self.broadcast_queue_and_state().await;
    }

    async fn on_direction(&mut self, entry_id: String, dir: Direction, press: bool) {
        if self.state != TsmState::Moving || self.entry_id.as_deref() != Some(entry_id.as_str()) {
            return;
        }
        let result = if press { self.actuator.direction_on(dir).await } else { self.actuator.direction_off(dir).await };
        match result {
            Ok(()) => {
                self.append_event(
                    &entry_id,
                    GameEventType::Direction,
                    serde_json::json!({ "dir": format!("{dir:?}"), "press": press }),
                )
                .await;
            }
            Err(ClawError::FatalHardware) => self.finalize(EntryResult::Error).await,
            Err(_) => {} // transient rejection (locked/conflicting/cooldown): no-op per spec
        }
    }

    async fn on_drop(&mut self, entry_id: String) {
        if self.state != TsmState::Moving || self.entry_id.as_deref() != Some(entry_id.as_str()) {
            return;
        }
        self.trigger_drop().await;
    }

    async fn on_phase_deadline(&mut self) {
        match self.state {
            TsmState::ReadyPrompt => self.finalize(EntryResult::Skipped).await,
            TsmState::Moving => {
                if !self.drop_triggered {
                    self.trigger_drop().await;
                }
            }
            TsmState::PostDrop => self.on_post_drop_deadline().await,
            TsmState::Idle | TsmState::Dropping => {}
        }
    }

    async fn trigger_drop(&mut self) {
        if self.drop_triggered {
            return;
        }
        self.drop_triggered = true;
        self.timers.cancel(&TimerKey::Phase);
        self.state = TsmState::Dropping;

        let Some(entry_id) = self.entry_id.clone() else { return };
        if let Err(err) = self.actuator.all_directions_off().await {
            warn!(?err, "all_directions_off failed entering dropping");
        }

        match self.actuator.pulse(PulseName::Drop).await {
            Ok(()) => {
                self.append_event(&entry_id, GameEventType::Drop, serde_json::json!({ "try": self.current_try })).await;
                let tx = self.self_tx.clone();
                if let Err(err) =
                    self.actuator.register_win_callback(move || { let _ = tx.try_send(TsmEvent::WinTriggered); }).await
                {
                    warn!(?err, "failed to register win callback entering post_drop");
                }
                let live = self.live.load();
                let post_drop_end = epoch_secs() + live.post_drop_wait_seconds as i64;
                self.phase_deadline_epoch = Some(post_drop_end);
                self.timers.arm(TimerKey::Phase, live.post_drop_wait());
                self.state = TsmState::PostDrop;
                self.broadcast_queue_and_state().await;
            }
            Err(err) => {
                warn!(?err, "drop pulse failed");
                self.finalize(EntryResult::Error).await;
            }
        }
    }

    async fn on_win_triggered(&mut self) {
        if self.state != TsmState::PostDrop {
            info!(state = ?self.state, "win sensor fired outside post_drop, ignoring");
            return;
        }
        self.timers.cancel(&TimerKey::Phase);
        let _ = self.actuator.unregister_win_callback().await;
        if let Some(entry_id) = self.entry_id.clone() {
            self.append_event(&entry_id, GameEventType::Win, serde_json::json!({})).await;
        }
        self.finalize(EntryResult::Win).await;
    }

    async fn on_post_drop_deadline(&mut self) {
        let _ = self.actuator.unregister_win_callback().await;
        let max_tries = self.live.load().tries_per_player;
        if let Some(entry_id) = self.entry_id.clone() {
            self.append_event(&entry_id, GameEventType::TryEnd, serde_json::json!({ "try": self.current_try })).await;
        }
        if self.current_try < max_tries {
            self.start_try().await;
        } else {
            self.finalize(EntryResult::Loss).await;
        }
    }

    async fn on_hard_deadline(&mut self) {
        if self.is_live_state() {
            self.finalize(EntryResult::Expired).await;
        }
    }

    async fn on_disconnect(&mut self, entry_id: String) {
        if !self.is_live_state() || self.entry_id.as_deref() != Some(entry_id.as_str()) {
            return;
        }
        if let Err(err) = self.actuator.all_directions_off().await {
            warn!(?err, "all_directions_off failed on disconnect");
        }
        let grace = self.live.load().queue_grace_period();
        self.timers.arm(TimerKey::DisconnectGrace, grace);
        self.append_event(&entry_id, GameEventType::Disconnect, serde_json::json!({})).await;
    }

    async fn on_reconnect(&mut self, entry_id: String) {
        if self.entry_id.as_deref() != Some(entry_id.as_str()) {
            return;
        }
        if self.timers.cancel(&TimerKey::DisconnectGrace) {
            self.append_event(&entry_id, GameEventType::Reconnect, serde_json::json!({})).await;
        }
    }

    async fn on_disconnect_grace_expired(&mut self) {
        match self.state {
            TsmState::ReadyPrompt => self.finalize(EntryResult::Skipped).await,
            TsmState::Idle => {}
            _ => self.finalize(EntryResult::Expired).await,
        }
    }

    async fn on_admin_or_voluntary_end(&mut self, entry_id: String, result: EntryResult) {
        if self.entry_id.as_deref() != Some(entry_id.as_str()) {
            return;
        }
        self.append_event(&entry_id, GameEventType::AdminAction, serde_json::json!({ "result": result.as_str() })).await;
        self.finalize(result).await;
    }

    /// Common `turn_end` side effects: clear every timer and hold, persist
    /// the terminal row, notify the player and spectators, reset the Turn
    /// Context, and immediately attempt to start the next turn.
    async fn finalize(&mut self, result: EntryResult) {
        self.timers.cancel_all();
        let _ = self.actuator.unregister_win_callback().await;

        if let Err(err) = self.actuator.emergency_stop().await {
            warn!(?err, "emergency_stop during turn_end failed");
        }
        // A fatal-hardware/persistence turn_end (§7) must stay locked for an
        // operator to explicitly `unlock` — every other terminal result
        // clears outputs and returns the actuator to normal service.
        if result != EntryResult::Error {
            if let Err(err) = self.actuator.unlock().await {
                warn!(?err, "unlock after turn_end failed");
            }
        } else {
            warn!("turn finalized as error; actuator left locked pending operator unlock");
        }

        if let Some(entry_id) = self.entry_id.take() {
            if let Err(err) = self.queue.complete(&entry_id, result, self.current_try as i64).await {
                warn!(?err, entry_id, "failed to persist terminal turn state");
            }
            self.append_event(&entry_id, GameEventType::TurnEnd, serde_json::json!({ "result": result.as_str() })).await;
            self.control.send(&entry_id, ControlMessage::TurnEnd { result: result.as_str().to_owned() }).await;
            self.broadcast
                .publish(BroadcastMessage::TurnEnd { entry_id, result: result.as_str().to_owned() })
                .await;
        }

        self.current_try = 0;
        self.drop_triggered = false;
        self.turn_end_at_epoch = None;
        self.phase_deadline_epoch = None;
        self.hard_deadline_epoch = None;
        self.state = TsmState::Idle;

        self.try_advance().await;
    }

    async fn broadcast_queue_and_state(&self) {
        let now = epoch_secs();
        let state_seconds_left = self.phase_deadline_epoch.map(|d| (d - now).max(0) as u64);
        let turn_seconds_left = self.hard_deadline_epoch.map(|d| (d - now).max(0) as u64);
        let max_tries = self.live.load().tries_per_player;

        if let Some(entry_id) = self.entry_id.clone() {
            self.control
                .send(
                    &entry_id,
                    ControlMessage::StateUpdate {
                        state: self.state.as_str().to_owned(),
                        state_seconds_left,
                        turn_seconds_left,
                        current_try: self.current_try as i64,
                        max_tries,
                    },
                )
                .await;
        }

        self.broadcast
            .publish(BroadcastMessage::StateUpdate {
                state: self.state.as_str().to_owned(),
                state_seconds_left,
                turn_seconds_left,
                current_try: self.current_try as i64,
                max_tries,
                active_entry_id: self.entry_id.clone(),
            })
            .await;

        if let Ok(status) = self.queue.status().await {
            self.broadcast
                .publish(BroadcastMessage::QueueUpdate {
                    counts: status.counts,
                    live_entry_id: self.entry_id.clone(),
                })
                .await;
        }
    }

    async fn append_event(&self, entry_id: &str, kind: GameEventType, detail: serde_json::Value) {
        if let Err(err) = crate::persistence::events::append(&self.pool, entry_id, kind, detail).await {
            warn!(?err, entry_id, "failed to append game event");
        }
    }
}
