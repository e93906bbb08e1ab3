// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;

use claw_watchdog::config::WatchdogConfig;
use claw_watchdog::safe_state;

#[tokio::main]
async fn main() {
    let config = WatchdogConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // `reqwest` is built with `rustls-no-provider`; install the process-wide
    // crypto provider once so an `https://` health URL doesn't panic on the
    // first poll.
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(err) = config.validate() {
        error!("invalid configuration: {err:#}");
        std::process::exit(1);
    }

    let primitive = match safe_state::build(&config.pins, config.simulate) {
        Ok(p) => p,
        Err(err) => {
            error!("failed to initialize safe-state primitive: {err:#}");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_signal.cancel();
    });

    if let Err(err) = claw_watchdog::run(config, primitive, shutdown).await {
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}
