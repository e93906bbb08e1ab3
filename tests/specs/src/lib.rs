// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `clawd` (and, where a scenario needs it, `claw-watchdog`)
//! binaries as subprocesses and exercises them over HTTP and WebSocket —
//! the actual transports a cabinet deployment uses, rather than the
//! in-process router the crate's own `tests/http.rs` drives.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn workspace_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest).to_path_buf()
}

/// Resolve the path to the compiled `clawd` binary.
pub fn clawd_binary() -> PathBuf {
    workspace_root().join("target").join("debug").join("clawd")
}

/// Resolve the path to the compiled `claw-watchdog` binary.
pub fn watchdog_binary() -> PathBuf {
    workspace_root().join("target").join("debug").join("claw-watchdog")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Builder for a [`ClawdProcess`]. Every timing knob defaults to something
/// fast enough for a test run; override individual fields on the struct
/// before calling [`ClawdBuilder::spawn`] for scenarios that need specific
/// turn timing (hard-cap expiry, ready-prompt timeout, ...).
pub struct ClawdBuilder {
    pub operator_secret: String,
    pub tries_per_player: u32,
    pub turn_time_seconds: u64,
    pub try_move_seconds: u64,
    pub post_drop_wait_seconds: u64,
    pub ready_prompt_seconds: u64,
    pub queue_grace_period_seconds: u64,
    pub coin_pulse_ms: u64,
    pub drop_pulse_ms: u64,
    pub min_inter_pulse_ms: u64,
}

impl Default for ClawdBuilder {
    fn default() -> Self {
        Self {
            operator_secret: "spec-test-secret".to_owned(),
            tries_per_player: 2,
            turn_time_seconds: 60,
            try_move_seconds: 30,
            post_drop_wait_seconds: 2,
            ready_prompt_seconds: 10,
            queue_grace_period_seconds: 10,
            coin_pulse_ms: 1,
            drop_pulse_ms: 1,
            min_inter_pulse_ms: 1,
        }
    }
}

impl ClawdBuilder {
    /// Spawn `clawd` against a fresh temp-dir SQLite database, bound to a
    /// free loopback port, running the simulated backend.
    pub fn spawn(self) -> anyhow::Result<ClawdProcess> {
        ensure_crypto();
        let binary = clawd_binary();
        anyhow::ensure!(binary.exists(), "clawd binary not found at {}; run `cargo build` first", binary.display());

        let port = free_port()?;
        let dir = tempfile::tempdir()?;
        let db_path = dir.path().join("claw.db");

        let child = Command::new(&binary)
            .args([
                "--host".to_owned(),
                "127.0.0.1".to_owned(),
                "--port".to_owned(),
                port.to_string(),
                "--db-path".to_owned(),
                db_path.to_string_lossy().into_owned(),
                "--operator-secret".to_owned(),
                self.operator_secret.clone(),
                "--simulate".to_owned(),
                "true".to_owned(),
                "--tries-per-player".to_owned(),
                self.tries_per_player.to_string(),
                "--turn-time-seconds".to_owned(),
                self.turn_time_seconds.to_string(),
                "--try-move-seconds".to_owned(),
                self.try_move_seconds.to_string(),
                "--post-drop-wait-seconds".to_owned(),
                self.post_drop_wait_seconds.to_string(),
                "--ready-prompt-seconds".to_owned(),
                self.ready_prompt_seconds.to_string(),
                "--queue-grace-period-seconds".to_owned(),
                self.queue_grace_period_seconds.to_string(),
                "--coin-pulse-ms".to_owned(),
                self.coin_pulse_ms.to_string(),
                "--drop-pulse-ms".to_owned(),
                self.drop_pulse_ms.to_string(),
                "--min-inter-pulse-ms".to_owned(),
                self.min_inter_pulse_ms.to_string(),
            ])
            .env("RUST_LOG", "info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(ClawdProcess { child, port, operator_secret: self.operator_secret, _db_dir: dir })
    }
}

/// A running `clawd` process that is killed on drop.
pub struct ClawdProcess {
    child: Child,
    port: u16,
    operator_secret: String,
    _db_dir: tempfile::TempDir,
}

impl ClawdProcess {
    /// Spawn with every default timing (see [`ClawdBuilder::default`]).
    pub fn start() -> anyhow::Result<Self> {
        ClawdBuilder::default().spawn()
    }

    pub fn builder() -> ClawdBuilder {
        ClawdBuilder::default()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn operator_secret(&self) -> &str {
        &self.operator_secret
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn health_url(&self) -> String {
        format!("{}/api/v1/health", self.base_url())
    }

    pub fn control_ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws/control", self.port)
    }

    pub fn spectate_ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws/spectate", self.port)
    }

    /// Poll `/api/v1/health` until it answers 200 or `timeout` elapses.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("clawd did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(self.health_url()).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Kill the process without running its own graceful shutdown, so a
    /// subsequent health poll starts failing immediately — used to simulate
    /// a crash for watchdog scenarios.
    pub fn kill(&mut self) -> anyhow::Result<()> {
        self.child.kill()?;
        let _ = self.child.wait();
        Ok(())
    }
}

impl Drop for ClawdProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A running `claw-watchdog` process that is killed on drop. Its combined
/// stdout+stderr is drained on dedicated threads into a channel so tests can
/// assert on the "forcing safe state" log line without ever blocking on a
/// short read.
pub struct WatchdogProcess {
    child: Child,
    lines: std::sync::mpsc::Receiver<String>,
}

impl WatchdogProcess {
    /// Spawn the watchdog against `health_url`, polling every
    /// `check_interval_s` seconds and tripping after `fail_threshold`
    /// consecutive failures.
    pub fn spawn(health_url: &str, check_interval_s: u64, fail_threshold: u32) -> anyhow::Result<Self> {
        ensure_crypto();
        let binary = watchdog_binary();
        anyhow::ensure!(
            binary.exists(),
            "claw-watchdog binary not found at {}; run `cargo build` first",
            binary.display()
        );

        let mut child = Command::new(&binary)
            .args([
                "--health-url".to_owned(),
                health_url.to_owned(),
                "--check-interval-s".to_owned(),
                check_interval_s.to_string(),
                "--fail-threshold".to_owned(),
                fail_threshold.to_string(),
                "--poll-timeout-s".to_owned(),
                "1".to_owned(),
                "--simulate".to_owned(),
                "true".to_owned(),
            ])
            .env("RUST_LOG", "info")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, rx) = std::sync::mpsc::channel();
        spawn_line_reader(child.stdout.take().expect("stdout was piped"), tx.clone());
        spawn_line_reader(child.stderr.take().expect("stderr was piped"), tx);

        Ok(Self { child, lines: rx })
    }

    /// Drain log lines until one contains `needle` or `timeout` elapses. The
    /// watchdog logs through `tracing_subscriber::fmt`'s default (stdout)
    /// writer, one line per event.
    pub fn wait_for_log(&mut self, needle: &str, timeout: Duration) -> anyhow::Result<()> {
        let deadline = std::time::Instant::now() + timeout;
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                anyhow::bail!("never saw {needle:?} in watchdog output within {timeout:?}; saw:\n{}", seen.join("\n"));
            }
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    if line.contains(needle) {
                        return Ok(());
                    }
                    seen.push(line);
                }
                Err(_) => continue,
            }
        }
    }
}

fn spawn_line_reader(stream: impl std::io::Read + Send + 'static, tx: std::sync::mpsc::Sender<String>) {
    std::thread::spawn(move || {
        use std::io::BufRead;
        for line in std::io::BufReader::new(stream).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

impl Drop for WatchdogProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
