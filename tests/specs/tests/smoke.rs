// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `clawd` (and, for the
//! watchdog scenario, `claw-watchdog`) binaries and exercise them over
//! their actual HTTP and WebSocket transports — black-box, across a real
//! process boundary, complementary to `claw-core`'s in-process
//! `tests/http.rs` and `tests/integration.rs`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use claw_specs::{ClawdProcess, WatchdogProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn http_health_reports_running_and_queue_depth() -> anyhow::Result<()> {
    let clawd = ClawdProcess::start()?;
    clawd.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value = reqwest::get(clawd.health_url()).await?.json().await?;
    assert_eq!(resp["status"], "running");
    assert_eq!(resp["queue_depth"], 0);

    Ok(())
}

#[tokio::test]
async fn join_then_session_me_round_trips_over_http() -> anyhow::Result<()> {
    let clawd = ClawdProcess::start()?;
    clawd.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let join: serde_json::Value = client
        .post(format!("{}/api/v1/join", clawd.base_url()))
        .json(&serde_json::json!({ "name": "Alice", "email": "alice@example.com" }))
        .send()
        .await?
        .json()
        .await?;
    let token = join["token"].as_str().expect("join response carries a token").to_owned();
    assert_eq!(join["position"], 1);

    let me: serde_json::Value = client
        .get(format!("{}/api/v1/session/me", clawd.base_url()))
        .bearer_auth(&token)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(me["entry_id"], join["entry_id"]);
    // A lone joiner is promoted off the waiting list by clawd's own internal
    // `Advance` submission, with no operator action needed.
    assert_eq!(me["state"], "ready");

    Ok(())
}

#[tokio::test]
async fn operator_routes_reject_a_missing_or_wrong_bearer_token() -> anyhow::Result<()> {
    let clawd = ClawdProcess::start()?;
    clawd.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let no_auth = client.get(format!("{}/api/v1/operator/dashboard", clawd.base_url())).send().await?;
    assert_eq!(no_auth.status(), reqwest::StatusCode::UNAUTHORIZED);

    let wrong_auth = client
        .get(format!("{}/api/v1/operator/dashboard", clawd.base_url()))
        .bearer_auth("not-the-secret")
        .send()
        .await?;
    assert_eq!(wrong_auth.status(), reqwest::StatusCode::UNAUTHORIZED);

    let ok = client
        .get(format!("{}/api/v1/operator/dashboard", clawd.base_url()))
        .bearer_auth(clawd.operator_secret())
        .send()
        .await?;
    assert_eq!(ok.status(), reqwest::StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn operator_emergency_stop_and_unlock_round_trip_via_dashboard() -> anyhow::Result<()> {
    let clawd = ClawdProcess::start()?;
    clawd.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let stop = client
        .post(format!("{}/api/v1/operator/emergency_stop", clawd.base_url()))
        .bearer_auth(clawd.operator_secret())
        .send()
        .await?;
    assert_eq!(stop.status(), reqwest::StatusCode::OK);

    let dashboard: serde_json::Value = client
        .get(format!("{}/api/v1/operator/dashboard", clawd.base_url()))
        .bearer_auth(clawd.operator_secret())
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(dashboard["actuator_locked"], true);

    let unlock = client
        .post(format!("{}/api/v1/operator/unlock", clawd.base_url()))
        .bearer_auth(clawd.operator_secret())
        .send()
        .await?;
    assert_eq!(unlock.status(), reqwest::StatusCode::OK);

    let dashboard: serde_json::Value = client
        .get(format!("{}/api/v1/operator/dashboard", clawd.base_url()))
        .bearer_auth(clawd.operator_secret())
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(dashboard["actuator_locked"], false);

    Ok(())
}

// -- WebSocket ----------------------------------------------------------------

#[tokio::test]
async fn control_socket_authenticates_then_sees_a_ready_prompt() -> anyhow::Result<()> {
    let clawd = ClawdProcess::start()?;
    clawd.wait_healthy(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let join: serde_json::Value = client
        .post(format!("{}/api/v1/join", clawd.base_url()))
        .json(&serde_json::json!({ "name": "Bea", "email": "bea@example.com" }))
        .send()
        .await?
        .json()
        .await?;
    let token = join["token"].as_str().unwrap().to_owned();

    let (mut socket, _) = tokio_tungstenite::connect_async(clawd.control_ws_url()).await?;
    socket.send(Message::Text(serde_json::json!({ "type": "auth", "token": token }).to_string().into())).await?;

    let auth_ok = tokio::time::timeout(TIMEOUT, socket.next()).await?.expect("socket closed before auth_ok")?;
    let auth_ok: serde_json::Value = serde_json::from_str(auth_ok.to_text()?)?;
    assert_eq!(auth_ok["type"], "auth_ok");

    Ok(())
}

#[tokio::test]
async fn control_socket_rejects_a_frame_that_is_not_auth() -> anyhow::Result<()> {
    let clawd = ClawdProcess::start()?;
    clawd.wait_healthy(TIMEOUT).await?;

    let (mut socket, _) = tokio_tungstenite::connect_async(clawd.control_ws_url()).await?;
    socket.send(Message::Text(serde_json::json!({ "type": "drop_press" }).to_string().into())).await?;

    let response = tokio::time::timeout(TIMEOUT, socket.next()).await?.expect("socket closed before responding")?;
    let response: serde_json::Value = serde_json::from_str(response.to_text()?)?;
    assert_eq!(response["type"], "error");
    assert_eq!(response["code"], "protocol");

    Ok(())
}

#[tokio::test]
async fn spectate_socket_receives_a_queue_update_when_a_player_joins() -> anyhow::Result<()> {
    let clawd = ClawdProcess::start()?;
    clawd.wait_healthy(TIMEOUT).await?;

    let (mut spectator, _) = tokio_tungstenite::connect_async(clawd.spectate_ws_url()).await?;

    reqwest::Client::new()
        .post(format!("{}/api/v1/join", clawd.base_url()))
        .json(&serde_json::json!({ "name": "Cora", "email": "cora@example.com" }))
        .send()
        .await?;

    loop {
        let frame = tokio::time::timeout(TIMEOUT, spectator.next())
            .await?
            .expect("spectator socket closed before any broadcast")?;
        let message: serde_json::Value = serde_json::from_str(frame.to_text()?)?;
        if message["type"] == "queue_update" {
            break;
        }
    }

    Ok(())
}

// -- Watchdog -------------------------------------------------------------------

/// Kill `clawd` out from under a running `claw-watchdog` and confirm the
/// watchdog trips its simulated safe-state primitive after the configured
/// number of consecutive failed health polls — the end-to-end shape of
/// scenario 7 (watchdog trip on an unresponsive main process).
#[tokio::test]
async fn watchdog_trips_safe_state_after_the_main_process_disappears() -> anyhow::Result<()> {
    let mut clawd = ClawdProcess::start()?;
    clawd.wait_healthy(TIMEOUT).await?;

    let mut watchdog = WatchdogProcess::spawn(&clawd.health_url(), 1, 2)?;

    clawd.kill()?;

    watchdog.wait_for_log("forcing safe state", Duration::from_secs(15))?;

    Ok(())
}
