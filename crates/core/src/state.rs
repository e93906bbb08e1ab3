// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state: one `Arc<AppState>` built once in [`crate::run`]
//! and handed to every axum handler via `State` extraction.

use std::sync::Arc;

use arc_swap::ArcSwap;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::actuator::ActuatorController;
use crate::broadcast::BroadcastHub;
use crate::config::{ClawConfig, LiveConfig};
use crate::control::ControlRegistry;
use crate::queue::QueueManager;
use crate::tsm::TurnStateMachine;

/// Everything a handler needs to serve a request: the restart-required
/// configuration plus handles to the subsystems spawned in [`crate::run`].
/// Cheap to clone each handle out of — every field is itself an `Arc` or a
/// cloneable channel handle, never a bare lock over the whole struct.
pub struct AppState {
    pub config: ClawConfig,
    pub live: Arc<ArcSwap<LiveConfig>>,
    pub pool: SqlitePool,
    pub queue: QueueManager,
    pub actuator: ActuatorController,
    pub broadcast: Arc<BroadcastHub>,
    pub control: Arc<ControlRegistry>,
    pub tsm: TurnStateMachine,
    pub shutdown: CancellationToken,
}
