// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for admission, session lookup, and the operator surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::LiveConfig;
use crate::error::ClawError;
use crate::persistence;
use crate::persistence::models::{epoch_secs, EntryResult, EntryState, GameEventType, QueueEntry};
use crate::queue::QueueStatus;
use crate::ratelimit;
use crate::state::AppState;
use crate::tsm::TsmEvent;

// -- Request/response types --------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub queue_depth: i64,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub entry_id: String,
    pub token: String,
    pub position: i64,
    pub estimated_wait_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct LeaveResponse {
    pub entry_id: String,
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct SessionMeResponse {
    pub entry_id: String,
    pub state: String,
    pub position: Option<i64>,
    pub result: Option<String>,
    pub tries_used: i64,
    pub state_seconds_left: Option<u64>,
    pub turn_seconds_left: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub counts: Vec<(String, i64)>,
    pub live_entry: Option<QueueEntry>,
    pub actuator_locked: bool,
    pub active_directions: Vec<String>,
    pub spectator_count: usize,
    pub control_count: usize,
}

// -- Admission quotas ---------------------------------------------------------
//
// Exact numbers aren't pinned down by name in the configuration table, so
// these are fixed constants rather than `LiveConfig` fields — see DESIGN.md.

const IP_ADMISSION_LIMIT: i64 = 3;
const IP_ADMISSION_WINDOW: Duration = Duration::from_secs(600);
const IDENTITY_ADMISSION_LIMIT: i64 = 1;
const IDENTITY_ADMISSION_WINDOW: Duration = Duration::from_secs(600);

const MAX_NAME_LEN: usize = 64;
const MAX_EMAIL_LEN: usize = 254;

fn bearer_token(headers: &HeaderMap) -> Result<&str, ClawError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ClawError::Auth)
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let queue_depth = state.queue.status().await.map(count_non_terminal).unwrap_or(0);
    Json(HealthResponse { status: "running".to_owned(), queue_depth })
}

fn count_non_terminal(status: QueueStatus) -> i64 {
    status
        .counts
        .iter()
        .filter(|(state, _)| state != "done" && state != "cancelled")
        .map(|(_, count)| count)
        .sum()
}

/// `POST /api/v1/join`
pub async fn join(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<JoinRequest>,
) -> Result<impl IntoResponse, ClawError> {
    let name = req.name.trim();
    let email = req.email.trim().to_lowercase();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(ClawError::Validation);
    }
    if !email.contains('@') || email.len() > MAX_EMAIL_LEN {
        return Err(ClawError::Validation);
    }

    let ip = addr.ip().to_string();
    let ip_key = format!("ip:{ip}");
    let identity_key = format!("email:{email}");

    let ip_ok = ratelimit::admission_quota_ok(&state.pool, &ip_key, IP_ADMISSION_LIMIT, IP_ADMISSION_WINDOW)
        .await
        .map_err(|_| ClawError::Persistence)?;
    if !ip_ok {
        return Err(ClawError::RateLimited);
    }
    let identity_ok = ratelimit::admission_quota_ok(
        &state.pool,
        &identity_key,
        IDENTITY_ADMISSION_LIMIT,
        IDENTITY_ADMISSION_WINDOW,
    )
    .await
    .map_err(|_| ClawError::Persistence)?;
    if !identity_ok {
        return Err(ClawError::RateLimited);
    }

    let admission = state.queue.join(name, &email, &ip).await?;

    ratelimit::record_admission(&state.pool, &ip_key).await.map_err(|_| ClawError::Persistence)?;
    ratelimit::record_admission(&state.pool, &identity_key).await.map_err(|_| ClawError::Persistence)?;
    persistence::contacts::upsert(&state.pool, &email, name).await.map_err(|_| ClawError::Persistence)?;
    persistence::events::append(&state.pool, &admission.entry_id, GameEventType::Join, serde_json::json!({ "ip": ip }))
        .await
        .ok();

    state.tsm.submit(TsmEvent::Advance).await;

    let estimated_wait_seconds =
        (admission.position.max(1) - 1) as u64 * state.live.load().turn_time_seconds;

    Ok(Json(JoinResponse {
        entry_id: admission.entry_id,
        token: admission.raw_token,
        position: admission.position,
        estimated_wait_seconds,
    }))
}

/// `POST /api/v1/leave`
pub async fn leave(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ClawError> {
    let token = bearer_token(&headers)?;
    let hash = crate::token::hash(token);
    let entry = state.queue.leave(&hash).await?.ok_or(ClawError::NotFound)?;

    if entry.state.is_live() {
        state.tsm.submit(TsmEvent::VoluntaryLeave { entry_id: entry.id.clone() }).await;
    }
    persistence::events::append(&state.pool, &entry.id, GameEventType::Leave, serde_json::json!({})).await.ok();

    Ok(Json(LeaveResponse { entry_id: entry.id, state: entry.state.as_str().to_owned() }))
}

/// `GET /api/v1/session/me`
pub async fn session_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ClawError> {
    let token = bearer_token(&headers)?;
    let entry = state.queue.get_by_token(token).await?.ok_or(ClawError::NotFound)?;

    let now = epoch_secs();
    let state_seconds_left = entry.try_move_end_at.map(|d| (d - now).max(0) as u64);
    let turn_seconds_left = entry.turn_end_at.map(|d| (d - now).max(0) as u64);

    Ok(Json(SessionMeResponse {
        entry_id: entry.id,
        state: entry.state.as_str().to_owned(),
        position: entry.position,
        result: entry.result.map(|r| r.as_str().to_owned()),
        tries_used: entry.tries_used,
        state_seconds_left,
        turn_seconds_left,
    }))
}

// -- Operator handlers --------------------------------------------------------

/// `POST /api/v1/operator/advance` — force-end the active turn as skipped.
pub async fn operator_advance(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.tsm.submit(TsmEvent::AdminForceEnd { result: EntryResult::AdminSkipped }).await;
    Json(OkResponse { ok: true })
}

/// `POST /api/v1/operator/pause` — stop admitting new turns.
pub async fn operator_pause(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.tsm.submit(TsmEvent::Pause).await;
    Json(OkResponse { ok: true })
}

/// `POST /api/v1/operator/resume` — resume admitting new turns.
pub async fn operator_resume(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.tsm.submit(TsmEvent::Resume).await;
    state.tsm.submit(TsmEvent::Advance).await;
    Json(OkResponse { ok: true })
}

/// `POST /api/v1/operator/emergency_stop` — lock the actuator immediately.
pub async fn operator_emergency_stop(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ClawError> {
    state.actuator.emergency_stop().await?;
    persistence::events::append(&state.pool, "_system", GameEventType::EmergencyStop, serde_json::json!({}))
        .await
        .ok();
    Ok(Json(OkResponse { ok: true }))
}

/// `POST /api/v1/operator/unlock` — release the actuator lock.
pub async fn operator_unlock(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ClawError> {
    state.actuator.unlock().await?;
    Ok(Json(OkResponse { ok: true }))
}

/// `GET /api/v1/operator/dashboard` — read-only snapshot for the operator.
pub async fn operator_dashboard(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ClawError> {
    let status = state.queue.status().await?;
    let locked = state.actuator.is_locked().await?;
    let directions = state.actuator.active_directions().await?;

    Ok(Json(DashboardResponse {
        counts: status.counts,
        live_entry: status.live,
        actuator_locked: locked,
        active_directions: directions.into_iter().map(|d| format!("{d:?}").to_lowercase()).collect(),
        spectator_count: state.broadcast.session_count().await,
        control_count: state.control.count().await,
    }))
}

/// `GET /api/v1/operator/config`
pub async fn operator_get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json((*state.live.load_full()).clone())
}

/// `POST /api/v1/operator/config` — replace the live tuneables wholesale,
/// after re-validating every range.
pub async fn operator_update_config(
    State(state): State<Arc<AppState>>,
    Json(new_live): Json<LiveConfig>,
) -> Result<impl IntoResponse, ClawError> {
    new_live.validate().map_err(|_| ClawError::Validation)?;
    state.live.store(Arc::new(new_live.clone()));
    Ok(Json(new_live))
}

/// `POST /api/v1/operator/kick/{entry_id}` — cancel an entry, ending its
/// turn first if it was ready/active.
pub async fn operator_kick(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
) -> Result<impl IntoResponse, ClawError> {
    let entry = state.queue.get_by_id(&entry_id).await?.ok_or(ClawError::NotFound)?;

    match entry.state {
        EntryState::Ready | EntryState::Active => {
            state.tsm.submit(TsmEvent::VoluntaryLeave { entry_id: entry.id.clone() }).await;
        }
        EntryState::Waiting => {
            state.queue.complete(&entry.id, EntryResult::Cancelled, entry.tries_used).await?;
        }
        EntryState::Done | EntryState::Cancelled => return Err(ClawError::Conflict),
    }

    persistence::events::append(
        &state.pool,
        &entry.id,
        GameEventType::AdminAction,
        serde_json::json!({ "action": "kick" }),
    )
    .await
    .ok();

    Ok(Json(OkResponse { ok: true }))
}
