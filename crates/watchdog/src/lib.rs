// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Independent out-of-process safety watchdog. Polls the main process's
//! health endpoint; after `fail_threshold` consecutive failures it trips the
//! safe-state primitive, a lower-level path than the Actuator Controller
//! that can coexist with an orphaned (possibly still-running) main process
//! via last-write-wins. This process touches outputs only during a trip —
//! at all other times it is a read-only health poller.

pub mod config;
pub mod safe_state;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WatchdogConfig;
use crate::safe_state::SafeStatePrimitive;

/// One poll outcome. A non-200 response and a connection error both count
/// as failure; only a successful 200 resets the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Healthy,
    Unhealthy,
}

async fn poll_once(client: &reqwest::Client, config: &WatchdogConfig) -> PollOutcome {
    let result = tokio::time::timeout(config.poll_timeout(), client.get(&config.health_url).send()).await;
    match result {
        Ok(Ok(resp)) if resp.status().is_success() => PollOutcome::Healthy,
        Ok(Ok(resp)) => {
            warn!(status = %resp.status(), "health poll returned non-success status");
            PollOutcome::Unhealthy
        }
        Ok(Err(err)) => {
            warn!(%err, "health poll request failed");
            PollOutcome::Unhealthy
        }
        Err(_) => {
            warn!(timeout_s = config.poll_timeout_s, "health poll timed out");
            PollOutcome::Unhealthy
        }
    }
}

/// Run the watchdog loop until `shutdown` is cancelled. Returns the number
/// of safe-state trips performed, mainly so tests can assert on it.
pub async fn run(
    config: WatchdogConfig,
    primitive: Box<dyn SafeStatePrimitive>,
    shutdown: CancellationToken,
) -> anyhow::Result<u64> {
    config.validate()?;

    let client = reqwest::Client::builder().build()?;
    let mut consecutive_failures: u32 = 0;
    let mut trips: u64 = 0;
    // Tracks whether we're currently logging as tripped, purely to dedup the
    // "forcing safe state" / "recovered" log lines — it says nothing about
    // the actual line state, which stays forced low until an operator
    // unlocks it through the main process.
    let mut tripped = false;

    info!(
        url = %config.health_url,
        interval_s = config.check_interval_s,
        fail_threshold = config.fail_threshold,
        "watchdog started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.check_interval()) => {}
        }

        match poll_once(&client, &config).await {
            PollOutcome::Healthy => {
                if tripped {
                    info!("health poll recovered; safe-state trip remains in force until an operator unlocks");
                }
                consecutive_failures = 0;
                tripped = false;
            }
            PollOutcome::Unhealthy => {
                consecutive_failures += 1;
                if consecutive_failures >= config.fail_threshold {
                    if !tripped {
                        error!(
                            consecutive_failures,
                            threshold = config.fail_threshold,
                            "fail threshold reached, forcing safe state"
                        );
                    }
                    if let Err(err) = primitive.force_safe() {
                        error!(%err, "failed to force safe state");
                    } else {
                        trips += 1;
                        tripped = true;
                    }
                }
            }
        }
    }

    info!(trips, "watchdog shutting down");
    Ok(trips)
}
