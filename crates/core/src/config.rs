// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the Actuator Controller resolves two opposing direction holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DirectionConflictMode {
    /// Reject the new direction while its opposite is held.
    IgnoreNew,
    /// Release the opposing direction, then honor the new one.
    Replace,
}

/// GPIO pin mapping for the cabinet's output/input lines. All restart-required.
#[derive(Debug, Clone, clap::Args)]
pub struct PinMap {
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
    #[arg(long, default_value_t = 26, env = "CLAW_PIN_WIN")]
    pub win_sensor: u8,
    /// Logical "on" is the electrically high level for every output line.
    /// Flip if the cabinet wires through an active-low relay board.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true, env = "CLAW_POLARITY_ACTIVE_HIGH")]
    pub active_high: bool,
    /// Pull-up (true) or pull-down (false) on the win sensor input.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true, env = "CLAW_WIN_PULL_UP")]
    pub win_pull_up: bool,
}

/// Full configuration surface for `clawd`, recognized options per the
/// configuration table: each field is either editable at runtime through the
/// operator `config` endpoint (see [`LiveConfig`]) or fixed at startup.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "clawd", version, about = "Claw-machine remote control server")]
pub struct ClawConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "CLAW_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8900, env = "CLAW_PORT")]
    pub port: u16,

    /// SQLite database path (WAL-journaled). Use `:memory:` for ephemeral runs.
    #[arg(long, default_value = "claw.db", env = "CLAW_DB_PATH")]
    pub db_path: String,

    /// Shared operator secret, required on the `Authorization: Bearer` header
    /// for every `/api/v1/operator/*` route.
    #[arg(long, env = "CLAW_OPERATOR_SECRET")]
    pub operator_secret: String,

    /// Comma-separated IP allowlist for the operator surface. Empty = allow any.
    #[arg(long, default_value = "", env = "CLAW_OPERATOR_ALLOWED_IPS")]
    pub operator_allowed_ips: String,

    /// Pre-auth handshake timeout for a newly opened control/spectator socket.
    ///
    /// Named `control_pre_auth_timeout_s` (not `control_auth_timeout_s`) —
    /// this is the key actually consumed at the handshake; the other name
    /// is not exposed, see DESIGN.md.
    #[arg(long, default_value_t = 10, env = "CLAW_CONTROL_PRE_AUTH_TIMEOUT_S")]
    pub control_pre_auth_timeout_s: u64,

    /// Max inbound WebSocket frame size, in bytes.
    #[arg(long, default_value_t = 16_384, env = "CLAW_WS_MAX_FRAME_BYTES")]
    pub ws_max_frame_bytes: usize,

    /// Run against the in-memory `SimBackend` instead of real GPIO. Ignored
    /// (always simulated) unless built with the `hardware` feature.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true, env = "CLAW_SIMULATE")]
    pub simulate: bool,

    #[command(flatten)]
    pub pins: PinMap,

    #[command(flatten)]
    pub live: LiveConfig,
}

impl ClawConfig {
    /// Validate every range-bound option. Called once from `run()` before any
    /// socket is bound.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.operator_secret.is_empty(), "operator secret must not be empty");
        self.live.validate()
    }

    /// Parse the operator IP allowlist into concrete addresses. Empty list
    /// means "allow any".
    pub fn operator_allowlist(&self) -> Vec<std::net::IpAddr> {
        self.operator_allowed_ips
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    pub fn control_pre_auth_timeout(&self) -> Duration {
        Duration::from_secs(self.control_pre_auth_timeout_s)
    }
}

/// The subset of configuration that the operator `config` endpoint can read
/// and update at runtime, within validated ranges, without a restart. Held
/// live in `AppState` behind an `ArcSwap` so the hot path never takes a lock
/// to read a tuneable.
#[derive(Debug, Clone, Serialize, Deserialize, clap::Args)]
pub struct LiveConfig {
    /// Max drop attempts per turn.
    #[arg(long, default_value_t = 3, env = "CLAW_TRIES_PER_PLAYER")]
    pub tries_per_player: u32,

    /// Hard ceiling on a turn, regardless of phase, in seconds.
    #[arg(long, default_value_t = 60, env = "CLAW_TURN_TIME_SECONDS")]
    pub turn_time_seconds: u64,

    /// Per-try move window, in seconds.
    #[arg(long, default_value_t = 15, env = "CLAW_TRY_MOVE_SECONDS")]
    pub try_move_seconds: u64,

    /// Win-detection window after a drop, in seconds.
    #[arg(long, default_value_t = 5, env = "CLAW_POST_DROP_WAIT_SECONDS")]
    pub post_drop_wait_seconds: u64,

    /// Ready-prompt timeout, in seconds.
    #[arg(long, default_value_t = 15, env = "CLAW_READY_PROMPT_SECONDS")]
    pub ready_prompt_seconds: u64,

    /// Disconnect grace period for the active player, in seconds.
    #[arg(long, default_value_t = 20, env = "CLAW_QUEUE_GRACE_PERIOD_SECONDS")]
    pub queue_grace_period_seconds: u64,

    /// Coin pulse duration, in milliseconds.
    #[arg(long, default_value_t = 120, env = "CLAW_COIN_PULSE_MS")]
    pub coin_pulse_ms: u64,

    /// Drop pulse duration, in milliseconds.
    #[arg(long, default_value_t = 400, env = "CLAW_DROP_PULSE_MS")]
    pub drop_pulse_ms: u64,

    /// Minimum time between two pulses of the same actuator, in milliseconds.
    #[arg(long, default_value_t = 500, env = "CLAW_MIN_INTER_PULSE_MS")]
    pub min_inter_pulse_ms: u64,

    /// Safety ceiling on a held direction, in milliseconds.
    #[arg(long, default_value_t = 8_000, env = "CLAW_DIRECTION_HOLD_MAX_MS")]
    pub direction_hold_max_ms: u64,

    /// Whether to pulse the coin actuator before every try (vs. once per turn).
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true, env = "CLAW_COIN_EACH_TRY")]
    pub coin_each_try: bool,

    /// Control-channel inbound command rate ceiling, in Hz.
    #[arg(long, default_value_t = 10, env = "CLAW_COMMAND_RATE_LIMIT_HZ")]
    pub command_rate_limit_hz: u32,

    /// How opposing direction holds are resolved.
    #[arg(long, value_enum, default_value_t = DirectionConflictMode::IgnoreNew, env = "CLAW_DIRECTION_CONFLICT_MODE")]
    pub direction_conflict_mode: DirectionConflictMode,

    /// Max concurrent spectator sessions.
    #[arg(long, default_value_t = 500, env = "CLAW_MAX_STATUS_VIEWERS")]
    pub max_status_viewers: usize,

    /// Max concurrent control (player) sessions.
    #[arg(long, default_value_t = 64, env = "CLAW_MAX_CONTROL_SESSIONS")]
    pub max_control_sessions: usize,

    /// Per-spectator-session broadcast send timeout, in seconds.
    #[arg(long, default_value_t = 5, env = "CLAW_STATUS_SEND_TIMEOUT_S")]
    pub status_send_timeout_s: u64,

    /// Event/entry retention age, in hours.
    #[arg(long, default_value_t = 168, env = "CLAW_DB_RETENTION_HOURS")]
    pub db_retention_hours: u64,
}

impl LiveConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.tries_per_player >= 1, "tries_per_player must be >= 1");
        anyhow::ensure!(self.turn_time_seconds >= 1, "turn_time_seconds must be >= 1");
        anyhow::ensure!(self.try_move_seconds >= 1, "try_move_seconds must be >= 1");
        anyhow::ensure!(self.post_drop_wait_seconds >= 1, "post_drop_wait_seconds must be >= 1");
        anyhow::ensure!(self.ready_prompt_seconds >= 1, "ready_prompt_seconds must be >= 1");
        anyhow::ensure!(self.min_inter_pulse_ms >= 1, "min_inter_pulse_ms must be >= 1");
        anyhow::ensure!(self.direction_hold_max_ms >= 1, "direction_hold_max_ms must be >= 1");
        anyhow::ensure!(self.command_rate_limit_hz >= 1, "command_rate_limit_hz must be >= 1");
        anyhow::ensure!(self.max_status_viewers >= 1, "max_status_viewers must be >= 1");
        anyhow::ensure!(self.max_control_sessions >= 1, "max_control_sessions must be >= 1");
        anyhow::ensure!(self.status_send_timeout_s >= 1, "status_send_timeout_s must be >= 1");
        Ok(())
    }

    pub fn turn_time(&self) -> Duration {
        Duration::from_secs(self.turn_time_seconds)
    }
    pub fn try_move_time(&self) -> Duration {
        Duration::from_secs(self.try_move_seconds)
    }
    pub fn post_drop_wait(&self) -> Duration {
        Duration::from_secs(self.post_drop_wait_seconds)
    }
    pub fn ready_prompt_time(&self) -> Duration {
        Duration::from_secs(self.ready_prompt_seconds)
    }
    pub fn queue_grace_period(&self) -> Duration {
        Duration::from_secs(self.queue_grace_period_seconds)
    }
    pub fn coin_pulse(&self) -> Duration {
        Duration::from_millis(self.coin_pulse_ms)
    }
    pub fn drop_pulse(&self) -> Duration {
        Duration::from_millis(self.drop_pulse_ms)
    }
    pub fn min_inter_pulse(&self) -> Duration {
        Duration::from_millis(self.min_inter_pulse_ms)
    }
    pub fn direction_hold_max(&self) -> Duration {
        Duration::from_millis(self.direction_hold_max_ms)
    }
    pub fn status_send_timeout(&self) -> Duration {
        Duration::from_secs(self.status_send_timeout_s)
    }
}
