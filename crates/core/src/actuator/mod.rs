// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Actuator Controller: the single mutator of physical output lines.
//!
//! A dedicated single-worker executor task owns all hardware state and is
//! reached only through [`ActuatorController`]'s channel — the same shape as
//! this workspace's credential-broker refresh loop, adapted from "one task
//! per account" to "one task for all actuator I/O". Every public method
//! sends a command and awaits a oneshot reply, which gives per-actuator
//! total ordering for free: concurrent callers queue behind the executor.

pub mod backend;

pub use backend::{HardwareBackend, Line, SimBackend};
#[cfg(feature = "hardware")]
pub use backend::RppalBackend;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::config::{DirectionConflictMode, LiveConfig};
use crate::deadline::DeadlineScheduler;
use crate::error::ClawError;

/// The two pulse-only outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PulseName {
    Coin,
    Drop,
}

impl PulseName {
    fn line(self) -> Line {
        match self {
            PulseName::Coin => Line::Coin,
            PulseName::Drop => Line::Drop,
        }
    }
}

/// The four held-while-pressed directional outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    fn line(self) -> Line {
        match self {
            Direction::North => Line::North,
            Direction::South => Line::South,
            Direction::East => Line::East,
            Direction::West => Line::West,
        }
    }

    fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }
}

type WinCallback = Box<dyn Fn() + Send + 'static>;

enum Command {
    Pulse { name: PulseName, reply: oneshot::Sender<Result<(), ClawError>> },
    DirectionOn { dir: Direction, reply: oneshot::Sender<Result<(), ClawError>> },
    DirectionOff { dir: Direction, reply: oneshot::Sender<Result<(), ClawError>> },
    AllDirectionsOff { reply: oneshot::Sender<Result<(), ClawError>> },
    EmergencyStop { reply: oneshot::Sender<Result<(), ClawError>> },
    Unlock { reply: oneshot::Sender<Result<(), ClawError>> },
    RegisterWinCallback { callback: WinCallback, reply: oneshot::Sender<Result<(), ClawError>> },
    UnregisterWinCallback { reply: oneshot::Sender<Result<(), ClawError>> },
    IsLocked { reply: oneshot::Sender<bool> },
    ActiveDirections { reply: oneshot::Sender<Vec<Direction>> },
}

/// A cloneable handle to the running executor. Cheap to clone (one
/// `mpsc::Sender`); shared by the TSM actor and, indirectly, by transport
/// handlers that need `is_locked`/`active_directions` for a dashboard.
#[derive(Clone)]
pub struct ActuatorController {
    tx: mpsc::Sender<Command>,
}

impl ActuatorController {
    /// Spawn the executor task and return a handle to it.
    pub fn spawn(
        backend: Arc<dyn HardwareBackend>,
        live: Arc<ArcSwap<LiveConfig>>,
    ) -> ActuatorController {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_executor(backend, live, rx));
        ActuatorController { tx }
    }

    async fn call<R: Send + 'static>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ClawError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = make(reply_tx);
        self.tx.send(command).await.map_err(|_| ClawError::Internal)?;
        reply_rx.await.map_err(|_| ClawError::Internal)
    }

    pub async fn pulse(&self, name: PulseName) -> Result<(), ClawError> {
        self.call(|reply| Command::Pulse { name, reply }).await?
    }

    pub async fn direction_on(&self, dir: Direction) -> Result<(), ClawError> {
        self.call(|reply| Command::DirectionOn { dir, reply }).await?
    }

    pub async fn direction_off(&self, dir: Direction) -> Result<(), ClawError> {
        self.call(|reply| Command::DirectionOff { dir, reply }).await?
    }

    pub async fn all_directions_off(&self) -> Result<(), ClawError> {
        self.call(|reply| Command::AllDirectionsOff { reply }).await?
    }

    pub async fn emergency_stop(&self) -> Result<(), ClawError> {
        self.call(|reply| Command::EmergencyStop { reply }).await?
    }

    pub async fn unlock(&self) -> Result<(), ClawError> {
        self.call(|reply| Command::Unlock { reply }).await?
    }

    /// Register the win callback, invoked exactly once per rising edge on
    /// the debounced win sensor while moving toward assertion while
    /// registered. Replaces any previously registered callback.
    pub async fn register_win_callback(
        &self,
        callback: impl Fn() + Send + 'static,
    ) -> Result<(), ClawError> {
        self.call(|reply| Command::RegisterWinCallback { callback: Box::new(callback), reply })
            .await?
    }

    pub async fn unregister_win_callback(&self) -> Result<(), ClawError> {
        self.call(|reply| Command::UnregisterWinCallback { reply }).await?
    }

    pub async fn is_locked(&self) -> Result<bool, ClawError> {
        self.call(|reply| Command::IsLocked { reply }).await
    }

    pub async fn active_directions(&self) -> Result<Vec<Direction>, ClawError> {
        self.call(|reply| Command::ActiveDirections { reply }).await
    }
}

/// Win-sensor poll cadence. Faster than any debounce window the hardware
/// backend itself applies, so the edge is caught promptly without busy-waiting.
const WIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

async fn run_executor(
    backend: Arc<dyn HardwareBackend>,
    live: Arc<ArcSwap<LiveConfig>>,
    mut rx: mpsc::Receiver<Command>,
) {
    let mut locked = false;
    let mut last_pulse: HashMap<PulseName, Instant> = HashMap::new();
    let mut active_directions: HashSet<Direction> = HashSet::new();
    let mut win_callback: Option<WinCallback> = None;
    let mut win_was_asserted = false;
    let (timers, mut fired): (DeadlineScheduler<Direction>, _) = DeadlineScheduler::new();
    let mut win_poll = tokio::time::interval(WIN_POLL_INTERVAL);

    loop {
        tokio::select! {
            Some(command) = rx.recv() => {
                match command {
                    Command::Pulse { name, reply } => {
                        let result = do_pulse(&backend, &live, &mut last_pulse, locked, name).await;
                        let _ = reply.send(result);
                    }
                    Command::DirectionOn { dir, reply } => {
                        let result = do_direction_on(
                            &backend, &live, &timers, &mut active_directions, locked, dir,
                        );
                        let _ = reply.send(result);
                    }
                    Command::DirectionOff { dir, reply } => {
                        let result = do_direction_off(&backend, &timers, &mut active_directions, dir);
                        let _ = reply.send(result);
                    }
                    Command::AllDirectionsOff { reply } => {
                        let result = do_all_directions_off(&backend, &timers, &mut active_directions);
                        let _ = reply.send(result);
                    }
                    Command::EmergencyStop { reply } => {
                        timers.cancel_all();
                        active_directions.clear();
                        let result = backend.all_off().map_err(|_| ClawError::FatalHardware);
                        locked = true;
                        if result.is_err() {
                            warn!("emergency_stop: hardware failed to lower all lines");
                        }
                        let _ = reply.send(Ok(()));
                    }
                    Command::Unlock { reply } => {
                        locked = false;
                        let _ = reply.send(Ok(()));
                    }
                    Command::RegisterWinCallback { callback, reply } => {
                        win_callback = Some(callback);
                        win_was_asserted = backend.read_win_sensor().unwrap_or(false);
                        let _ = reply.send(Ok(()));
                    }
                    Command::UnregisterWinCallback { reply } => {
                        win_callback = None;
                        let _ = reply.send(Ok(()));
                    }
                    Command::IsLocked { reply } => {
                        let _ = reply.send(locked);
                    }
                    Command::ActiveDirections { reply } => {
                        let _ = reply.send(active_directions.iter().copied().collect());
                    }
                }
            }
            Some(dir) = fired.recv() => {
                info!(?dir, "direction safety timer expired, force-releasing");
                active_directions.remove(&dir);
                if backend.set(dir.line(), false).is_err() {
                    warn!(?dir, "force-release failed to lower line");
                }
            }
            _ = win_poll.tick() => {
                if let Some(callback) = win_callback.as_ref() {
                    let asserted = backend.read_win_sensor().unwrap_or(false);
                    if asserted && !win_was_asserted {
                        callback();
                    }
                    win_was_asserted = asserted;
                }
            }
            else => break,
        }
    }
}

async fn do_pulse(
    backend: &Arc<dyn HardwareBackend>,
    live: &Arc<ArcSwap<LiveConfig>>,
    last_pulse: &mut HashMap<PulseName, Instant>,
    locked: bool,
    name: PulseName,
) -> Result<(), ClawError> {
    if locked {
        return Err(ClawError::Conflict);
    }
    let snapshot = live.load();
    let cooldown = snapshot.min_inter_pulse();
    if let Some(last) = last_pulse.get(&name) {
        if last.elapsed() < cooldown {
            return Err(ClawError::Conflict);
        }
    }

    let duration = match name {
        PulseName::Coin => snapshot.coin_pulse(),
        PulseName::Drop => snapshot.drop_pulse(),
    };

    backend.set(name.line(), true).map_err(|_| ClawError::TransientHardware)?;
    tokio::time::sleep(duration).await;
    backend.set(name.line(), false).map_err(|_| ClawError::FatalHardware)?;
    last_pulse.insert(name, Instant::now());
    Ok(())
}

fn do_direction_on(
    backend: &Arc<dyn HardwareBackend>,
    live: &Arc<ArcSwap<LiveConfig>>,
    timers: &DeadlineScheduler<Direction>,
    active: &mut HashSet<Direction>,
    locked: bool,
    dir: Direction,
) -> Result<(), ClawError> {
    if locked {
        return Err(ClawError::Conflict);
    }
    if active.contains(&dir) {
        return Ok(());
    }

    let opposite = dir.opposite();
    if active.contains(&opposite) {
        let snapshot = live.load();
        match snapshot.direction_conflict_mode {
            DirectionConflictMode::IgnoreNew => return Err(ClawError::Conflict),
            DirectionConflictMode::Replace => {
                timers.cancel(&opposite);
                active.remove(&opposite);
                backend.set(opposite.line(), false).map_err(|_| ClawError::FatalHardware)?;
            }
        }
    }

    backend.set(dir.line(), true).map_err(|_| ClawError::TransientHardware)?;
    active.insert(dir);
    let hold_max = live.load().direction_hold_max();
    timers.arm(dir, hold_max);
    Ok(())
}

fn do_direction_off(
    backend: &Arc<dyn HardwareBackend>,
    timers: &DeadlineScheduler<Direction>,
    active: &mut HashSet<Direction>,
    dir: Direction,
) -> Result<(), ClawError> {
    timers.cancel(&dir);
    active.remove(&dir);
    backend.set(dir.line(), false).map_err(|_| ClawError::FatalHardware)
}

fn do_all_directions_off(
    backend: &Arc<dyn HardwareBackend>,
    timers: &DeadlineScheduler<Direction>,
    active: &mut HashSet<Direction>,
) -> Result<(), ClawError> {
    let held: Vec<Direction> = active.iter().copied().collect();
    for dir in held {
        timers.cancel(&dir);
        backend.set(dir.line(), false).map_err(|_| ClawError::FatalHardware)?;
    }
    active.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn live_config(hold_max_ms: u64, mode: DirectionConflictMode) -> Arc<ArcSwap<LiveConfig>> {
        let cfg = crate::config::LiveConfig {
            tries_per_player: 3,
            turn_time_seconds: 60,
            try_move_seconds: 15,
            post_drop_wait_seconds: 5,
            ready_prompt_seconds: 15,
            queue_grace_period_seconds: 20,
            coin_pulse_ms: 5,
            drop_pulse_ms: 5,
            min_inter_pulse_ms: 10,
            direction_hold_max_ms: hold_max_ms,
            coin_each_try: true,
            command_rate_limit_hz: 10,
            direction_conflict_mode: mode,
            max_status_viewers: 500,
            max_control_sessions: 64,
            status_send_timeout_s: 5,
            db_retention_hours: 168,
        };
        Arc::new(ArcSwap::from_pointee(cfg))
    }

    #[tokio::test]
    async fn pulse_enforces_cooldown() {
        let backend: Arc<dyn HardwareBackend> = Arc::new(SimBackend::new());
        let live = live_config(8_000, DirectionConflictMode::IgnoreNew);
        let controller = ActuatorController::spawn(backend, live);

        controller.pulse(PulseName::Coin).await.unwrap();
        let second = controller.pulse(PulseName::Coin).await;
        assert!(matches!(second, Err(ClawError::Conflict)));
    }

    #[tokio::test]
    async fn direction_on_is_idempotent() {
        let backend: Arc<dyn HardwareBackend> = Arc::new(SimBackend::new());
        let live = live_config(8_000, DirectionConflictMode::IgnoreNew);
        let controller = ActuatorController::spawn(backend, live);

        controller.direction_on(Direction::North).await.unwrap();
        controller.direction_on(Direction::North).await.unwrap();
        assert_eq!(controller.active_directions().await.unwrap(), vec![Direction::North]);
    }

    #[tokio::test]
    async fn opposing_direction_rejected_under_ignore_new() {
        let backend: Arc<dyn HardwareBackend> = Arc::new(SimBackend::new());
        let live = live_config(8_000, DirectionConflictMode::IgnoreNew);
        let controller = ActuatorController::spawn(backend, live);

        controller.direction_on(Direction::North).await.unwrap();
        let result = controller.direction_on(Direction::South).await;
        assert!(matches!(result, Err(ClawError::Conflict)));
    }

    #[tokio::test]
    async fn opposing_direction_replaces_under_replace_mode() {
        let backend: Arc<dyn HardwareBackend> = Arc::new(SimBackend::new());
        let live = live_config(8_000, DirectionConflictMode::Replace);
        let controller = ActuatorController::spawn(backend, live);

        controller.direction_on(Direction::North).await.unwrap();
        controller.direction_on(Direction::South).await.unwrap();
        assert_eq!(controller.active_directions().await.unwrap(), vec![Direction::South]);
    }

    #[tokio::test]
    async fn safety_timer_force_releases_direction() {
        let backend: Arc<dyn HardwareBackend> = Arc::new(SimBackend::new());
        let live = live_config(10, DirectionConflictMode::IgnoreNew);
        let controller = ActuatorController::spawn(backend, live);

        controller.direction_on(Direction::East).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(controller.active_directions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn emergency_stop_locks_and_rejects_subsequent_calls() {
        let backend: Arc<dyn HardwareBackend> = Arc::new(SimBackend::new());
        let live = live_config(8_000, DirectionConflictMode::IgnoreNew);
        let controller = ActuatorController::spawn(backend, live);

        controller.direction_on(Direction::West).await.unwrap();
        controller.emergency_stop().await.unwrap();
        assert!(controller.is_locked().await.unwrap());
        assert!(controller.active_directions().await.unwrap().is_empty());

        let rejected = controller.pulse(PulseName::Coin).await;
        assert!(matches!(rejected, Err(ClawError::Conflict)));

        controller.unlock().await.unwrap();
        controller.pulse(PulseName::Coin).await.unwrap();
    }

    #[tokio::test]
    async fn win_callback_fires_on_rising_edge_only() {
        let sim = Arc::new(SimBackend::new());
        let backend: Arc<dyn HardwareBackend> = sim.clone();
        let live = live_config(8_000, DirectionConflictMode::IgnoreNew);
        let controller = ActuatorController::spawn(backend, live);

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        controller.register_win_callback(move || { hits_cb.fetch_add(1, Ordering::SeqCst); }).await.unwrap();

        tokio::time::sleep(WIN_POLL_INTERVAL * 2).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        sim.trigger_win();
        tokio::time::sleep(WIN_POLL_INTERVAL * 3).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Sensor stays asserted; no further callback invocations without a
        // new rising edge.
        tokio::time::sleep(WIN_POLL_INTERVAL * 3).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_callback_never_fires() {
        let sim = Arc::new(SimBackend::new());
        let backend: Arc<dyn HardwareBackend> = sim.clone();
        let live = live_config(8_000, DirectionConflictMode::IgnoreNew);
        let controller = ActuatorController::spawn(backend, live);

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        controller.register_win_callback(move || { hits_cb.fetch_add(1, Ordering::SeqCst); }).await.unwrap();
        controller.unregister_win_callback().await.unwrap();

        sim.trigger_win();
        tokio::time::sleep(WIN_POLL_INTERVAL * 3).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
