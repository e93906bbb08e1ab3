// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-cutting integration tests that exercise more than one subsystem at
//! once — admission through to a finished turn, recovery after an unclean
//! restart, and the durable admission quota. Scenario-local invariants
//! (single-active, deadline cancellation, broadcast eviction, token-bucket
//! floor, …) already have focused unit tests alongside their modules; this
//! file only covers what only shows up when those modules run together.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::http::StatusCode;
use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use clawcore::actuator::{ActuatorController, Direction, SimBackend};
use clawcore::broadcast::{BroadcastHub, BroadcastMessage};
use clawcore::config::{ClawConfig, DirectionConflictMode, LiveConfig, PinMap};
use clawcore::control::ControlRegistry;
use clawcore::persistence::entries;
use clawcore::persistence::models::{EntryResult, EntryState};
use clawcore::persistence::open_in_memory;
use clawcore::queue::QueueManager;
use clawcore::state::AppState;
use clawcore::transport::build_router;
use clawcore::tsm::{TsmEvent, TurnStateMachine};

fn test_config() -> ClawConfig {
    ClawConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        db_path: ":memory:".to_owned(),
        operator_secret: "s3cr3t".to_owned(),
        operator_allowed_ips: String::new(),
        control_pre_auth_timeout_s: 10,
        ws_max_frame_bytes: 16_384,
        simulate: true,
        pins: PinMap {
            coin: 17,
            drop: 27,
            north: 5,
            south: 6,
            east: 13,
            west: 19,
            win_sensor: 26,
            active_high: true,
            win_pull_up: true,
        },
        live: LiveConfig {
            tries_per_player: 2,
            turn_time_seconds: 60,
            try_move_seconds: 15,
            post_drop_wait_seconds: 1,
            ready_prompt_seconds: 15,
            queue_grace_period_seconds: 20,
            coin_pulse_ms: 1,
            drop_pulse_ms: 1,
            min_inter_pulse_ms: 1,
            direction_hold_max_ms: 8_000,
            coin_each_try: false,
            command_rate_limit_hz: 50,
            direction_conflict_mode: DirectionConflictMode::IgnoreNew,
            max_status_viewers: 10,
            max_control_sessions: 10,
            status_send_timeout_s: 5,
            db_retention_hours: 168,
        },
    }
}

struct Harness {
    state: Arc<AppState>,
}

impl Harness {
    async fn new() -> Self {
        let config = test_config();
        let pool = open_in_memory().await.expect("open in-memory db");
        let queue = QueueManager::new(pool.clone());
        let live = Arc::new(ArcSwap::from_pointee(config.live.clone()));
        let backend: Arc<dyn clawcore::actuator::HardwareBackend> = Arc::new(SimBackend::new());
        let actuator = ActuatorController::spawn(backend, live.clone());
        let broadcast = BroadcastHub::new(live.clone());
        let control = Arc::new(ControlRegistry::new());
        let tsm = TurnStateMachine::spawn(
            queue.clone(),
            actuator.clone(),
            broadcast.clone(),
            control.clone(),
            pool.clone(),
            live.clone(),
        );

        let state = Arc::new(AppState {
            config,
            live,
            pool,
            queue,
            actuator,
            broadcast,
            control,
            tsm,
            shutdown: CancellationToken::new(),
        });

        Self { state }
    }

    fn server(&self) -> TestServer {
        TestServer::new(build_router(self.state.clone())).expect("failed to create test server")
    }
}

async fn wait_for_state(state: &Arc<AppState>, entry_id: &str, target: EntryState, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let entry = state.queue.get_by_id(entry_id).await.unwrap();
        if entry.as_ref().map(|e| e.state) == Some(target) {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A lone joiner is promoted to `ready` by the TSM's own `Advance`
/// submission, without any operator action, and — once confirmed, dropped
/// twice with the win sensor never asserting — loses when the second try
/// exhausts `tries_per_player`.
#[tokio::test]
async fn full_turn_lifecycle_ends_in_loss_after_exhausting_tries() {
    let harness = Harness::new().await;
    let server = harness.server();

    let join = server
        .post("/api/v1/join")
        .json(&serde_json::json!({ "name": "Alice", "email": "alice@example.com" }))
        .await;
    join.assert_status_ok();
    let entry_id = join.json::<serde_json::Value>()["entry_id"].as_str().unwrap().to_owned();

    assert!(
        wait_for_state(&harness.state, &entry_id, EntryState::Ready, Duration::from_secs(2)).await,
        "entry never reached ready"
    );

    harness.state.tsm.submit(TsmEvent::ReadyConfirm { entry_id: entry_id.clone() }).await;
    assert!(
        wait_for_state(&harness.state, &entry_id, EntryState::Active, Duration::from_secs(2)).await,
        "entry never reached active after ready_confirm"
    );

    for _ in 0..2 {
        harness.state.tsm.submit(TsmEvent::DropPress { entry_id: entry_id.clone() }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.state.tsm.submit(TsmEvent::DropRelease { entry_id: entry_id.clone() }).await;
        tokio::time::sleep(Duration::from_millis(1_200)).await;
    }

    assert!(
        wait_for_state(&harness.state, &entry_id, EntryState::Done, Duration::from_secs(3)).await,
        "entry never finalized"
    );
    let entry = harness.state.queue.get_by_id(&entry_id).await.unwrap().unwrap();
    assert_eq!(entry.result, Some(EntryResult::Loss));
}

/// Direction commands for an entry id that isn't the currently active turn
/// are silently ignored rather than moving someone else's claw.
#[tokio::test]
async fn direction_press_for_a_non_active_entry_is_a_no_op() {
    let harness = Harness::new().await;

    harness
        .state
        .tsm
        .submit(TsmEvent::DirectionPress { entry_id: "not-the-active-entry".to_owned(), dir: Direction::North })
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(harness.state.actuator.active_directions().await.unwrap().is_empty());
}

/// After an unclean restart (no `emergency_stop`/`complete` ever ran), a
/// fresh `QueueManager` opened over the same pool finalizes any row still
/// sitting in `active` via `cleanup_stale` — recovery never resumes a turn,
/// and the in-memory Turn Context (tries used mid-turn, etc.) is discarded
/// along with the dead process that held it.
#[tokio::test]
async fn cleanup_stale_finalizes_an_orphaned_active_entry_across_a_simulated_restart() {
    let pool = open_in_memory().await.unwrap();
    let position = entries::insert_waiting(&pool, "e1", "Alice", "a@x.com", "1.2.3.4", "hash1").await.unwrap();
    assert_eq!(position, 1);
    entries::promote_to_ready(&pool, "e1").await.unwrap();
    entries::promote_to_active(&pool, "e1").await.unwrap();

    // Simulate the process restarting: a brand new `QueueManager` over the
    // same durable pool, with no in-memory Turn Context surviving.
    let recovered = QueueManager::new(pool.clone());
    let reconciled = recovered.cleanup_stale().await.unwrap();
    assert_eq!(reconciled, 1);

    let entry = recovered.get_by_id("e1").await.unwrap().unwrap();
    assert_eq!(entry.state, EntryState::Done);
    assert_eq!(entry.result, Some(EntryResult::Expired));
}

/// The per-IP admission quota blocks a fourth join from the same source
/// address within the window, even though each attempt uses a distinct
/// email (so the identity quota alone would not have caught it).
#[tokio::test]
async fn ip_admission_quota_blocks_a_fourth_join_from_the_same_address() {
    let harness = Harness::new().await;
    let server = harness.server();

    for i in 0..3 {
        let resp = server
            .post("/api/v1/join")
            .json(&serde_json::json!({ "name": format!("Player{i}"), "email": format!("p{i}@example.com") }))
            .await;
        resp.assert_status_ok();
    }

    let fourth = server
        .post("/api/v1/join")
        .json(&serde_json::json!({ "name": "PlayerFour", "email": "p4@example.com" }))
        .await;
    fourth.assert_status(StatusCode::TOO_MANY_REQUESTS);
}

/// The identity admission quota blocks a second join with the same email,
/// independent of the per-IP counter.
#[tokio::test]
async fn identity_admission_quota_blocks_a_repeat_join_with_the_same_email() {
    let harness = Harness::new().await;
    let server = harness.server();

    let first = server
        .post("/api/v1/join")
        .json(&serde_json::json!({ "name": "Alice", "email": "dup@example.com" }))
        .await;
    first.assert_status_ok();

    let second = server
        .post("/api/v1/join")
        .json(&serde_json::json!({ "name": "Alice Again", "email": "dup@example.com" }))
        .await;
    second.assert_status(StatusCode::TOO_MANY_REQUESTS);
}

/// A spectator subscribed to the Broadcast Hub receives a published
/// `queue_update` — the fan-out that `/ws/spectate` rides on, exercised
/// here at the hub level rather than over a real socket (which
/// `transport::ws` already covers for framing).
#[tokio::test]
async fn broadcast_hub_reaches_a_subscriber() {
    let harness = Harness::new().await;
    let (_id, mut rx) = harness.state.broadcast.subscribe().await.unwrap();

    harness
        .state
        .broadcast
        .publish(BroadcastMessage::QueueUpdate { counts: vec![("waiting".to_owned(), 1)], live_entry_id: None })
        .await;

    let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for broadcast")
        .expect("hub closed unexpectedly");
    assert!(matches!(message, BroadcastMessage::QueueUpdate { .. }));
}
