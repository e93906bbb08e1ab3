// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

/// Configuration for the standalone watchdog process. Deliberately separate
/// from `clawcore::config::ClawConfig`: this process must be able to start,
/// poll, and trip the safe-state primitive even if the main process (and
/// therefore its configuration store) is wedged or gone.
#[derive(Debug, Clone, Parser)]
#[command(name = "claw-watchdog", version, about = "Out-of-process safety watchdog for clawd")]
pub struct WatchdogConfig {
    /// Health endpoint to poll, e.g. `http://127.0.0.1:8900/healthz`.
    #[arg(long, env = "CLAW_WATCHDOG_HEALTH_URL")]
    pub health_url: String,

    /// Seconds between health polls.
    #[arg(long, default_value_t = 2, env = "CLAW_WATCHDOG_CHECK_INTERVAL_S")]
    pub check_interval_s: u64,

    /// Consecutive failed polls before forcing the safe state.
    #[arg(long, default_value_t = 3, env = "CLAW_WATCHDOG_FAIL_THRESHOLD")]
    pub fail_threshold: u32,

    /// Per-poll request timeout, in seconds. Must be shorter than
    /// `check_interval_s` or polls would never have a chance to time out
    /// before the next one is due.
    #[arg(long, default_value_t = 1, env = "CLAW_WATCHDOG_POLL_TIMEOUT_S")]
    pub poll_timeout_s: u64,

    #[command(flatten)]
    pub pins: WatchdogPinMap,

    /// Drive the simulated safe-state primitive (logs only) instead of real
    /// GPIO. Ignored (always simulated) unless built with the `hardware`
    /// feature.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true, env = "CLAW_WATCHDOG_SIMULATE")]
    pub simulate: bool,
}

impl WatchdogConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.health_url.is_empty(), "health_url must not be empty");
        anyhow::ensure!(self.check_interval_s >= 1, "check_interval_s must be >= 1");
        anyhow::ensure!(self.fail_threshold >= 1, "fail_threshold must be >= 1");
        anyhow::ensure!(
            self.poll_timeout_s >= 1 && self.poll_timeout_s < self.check_interval_s.max(2),
            "poll_timeout_s must be >= 1 and shorter than check_interval_s"
        );
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_s)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_s)
    }
}

/// Pin mapping for the safe-state primitive. Mirrors `clawcore::config::PinMap`'s
/// line set and polarity convention but is read independently — this process
/// must never depend on the main process's config store being reachable.
#[derive(Debug, Clone, clap::Args)]
pub struct WatchdogPinMap {
    #[arg(long, default_value_t = 17, env = "CLAW_PIN_COIN")]
    pub coin: u8,
    #[arg(long, default_value_t = 27, env = "CLAW_PIN_DROP")]
    pub drop: u8,
    #[arg(long, default_value_t = 5, env = "CLAW_PIN_NORTH")]
    pub north: u8,
    #[arg(long, default_value_t = 6, env = "CLAW_PIN_SOUTH")]
    pub south: u8,
    #[arg(long, default_value_t = 13, env = "CLAW_PIN_EAST")]
    pub east: u8,
    #[arg(long, default_value_t = 19, env = "CLAW_PIN_WEST")]
    pub west: u8,
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true, env = "CLAW_POLARITY_ACTIVE_HIGH")]
    pub active_high: bool,
}
