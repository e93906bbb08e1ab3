// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clawd: claw-machine remote control server.

pub mod actuator;
pub mod broadcast;
pub mod config;
pub mod control;
pub mod deadline;
pub mod error;
pub mod persistence;
pub mod queue;
pub mod ratelimit;
pub mod state;
pub mod token;
pub mod transport;
pub mod tsm;

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actuator::{ActuatorController, HardwareBackend, SimBackend};
use crate::broadcast::BroadcastHub;
use crate::config::ClawConfig;
use crate::control::ControlRegistry;
use crate::persistence;
use crate::queue::QueueManager;
use crate::state::AppState;
use crate::transport::build_router;
use crate::tsm::{TsmEvent, TurnStateMachine};

/// Run `clawd` until shutdown.
pub async fn run(config: ClawConfig) -> anyhow::Result<()> {
    config.validate()?;

    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let pool = persistence::open(&config.db_path).await?;
    let queue = QueueManager::new(pool.clone());

    let reconciled = queue.cleanup_stale().await?;
    if reconciled > 0 {
        warn!(reconciled, "reconciled stale ready/active entries left by an unclean restart");
    }

    let live = Arc::new(ArcSwap::from_pointee(config.live.clone()));

    let backend = build_backend(&config)?;
    let actuator = ActuatorController::spawn(backend, live.clone());

    let broadcast = BroadcastHub::new(live.clone());
    broadcast.spawn_keepalive();
    spawn_retention_pruner(pool.clone(), live.clone(), shutdown.clone());

    let control = Arc::new(ControlRegistry::new());

    let tsm = TurnStateMachine::spawn(
        queue.clone(),
        actuator.clone(),
        broadcast.clone(),
        control.clone(),
        pool.clone(),
        live.clone(),
    );
    // Pick up any entry left waiting from before the restart.
    tsm.submit(TsmEvent::Advance).await;

    let state = Arc::new(AppState {
        config: config.clone(),
        live,
        pool,
        queue,
        actuator: actuator.clone(),
        broadcast,
        control,
        tsm,
        shutdown: shutdown.clone(),
    });

    let router = build_router(state.clone());
    let listener = TcpListener::bind(&addr).await?;
    info!("clawd listening on {addr}");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;

    // Shutdown order per the startup sequence, reversed: timers first (the
    // TSM actor is dropped with `state` below, cancelling its timers via
    // `DeadlineScheduler`'s `JoinHandle::abort` on drop), then the actuator
    // is forced safe, never the other way around.
    if let Err(err) = actuator.emergency_stop().await {
        warn!(?err, "emergency_stop during shutdown failed");
    }
    persistence::prune_retention(&state.pool, state.live.load().db_retention_hours).await.ok();

    Ok(())
}

/// Cadence at which the retention pruner wakes up. Independent of
/// `db_retention_hours` (the pruning *age*, not the pruning *frequency*) —
/// hourly is frequent enough that a server left running for weeks never
/// accumulates more than an hour's worth of prunable rows past the cutoff.
const RETENTION_PRUNE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

/// Periodically prune events, terminal queue entries, and rate-limit
/// observations older than the live `db_retention_hours`. Runs until
/// `shutdown` is cancelled; `run()` also prunes once more on the way out.
fn spawn_retention_pruner(
    pool: sqlx::SqlitePool,
    live: Arc<ArcSwap<config::LiveConfig>>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_PRUNE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = persistence::prune_retention(&pool, live.load().db_retention_hours).await {
                        warn!(?err, "periodic retention prune failed");
                    }
                }
            }
        }
    });
}

fn build_backend(config: &ClawConfig) -> anyhow::Result<Arc<dyn HardwareBackend>> {
    #[cfg(feature = "hardware")]
    if !config.simulate {
        return Ok(Arc::new(crate::actuator::RppalBackend::open(&config.pins)?));
    }
    #[cfg(not(feature = "hardware"))]
    anyhow::ensure!(
        config.simulate,
        "built without the `hardware` feature; pass --simulate or rebuild with --features hardware"
    );

    Ok(Arc::new(SimBackend::new()))
}
