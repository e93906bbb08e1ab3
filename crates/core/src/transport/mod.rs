// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport: admission, session lookup, operator surface,
//! and the two WebSocket feeds (Control Session, Spectator).

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router`: admission, session lookup, the two WebSocket
/// feeds, and the operator surface nested behind its own auth layer.
pub fn build_router(state: Arc<AppState>) -> Router {
    let operator = Router::new()
        .route("/advance", post(http::operator_advance))
        .route("/pause", post(http::operator_pause))
        .route("/resume", post(http::operator_resume))
        .route("/emergency_stop", post(http::operator_emergency_stop))
        .route("/unlock", post(http::operator_unlock))
        .route("/dashboard", get(http::operator_dashboard))
        .route("/config", get(http::operator_get_config).post(http::operator_update_config))
        .route("/kick/{entry_id}", post(http::operator_kick))
        .layer(middleware::from_fn_with_state(state.clone(), auth::operator_auth_layer));

    Router::new()
        // Health (no auth) — the Watchdog polls this.
        .route("/api/v1/health", get(http::health))
        // Player admission
        .route("/api/v1/join", post(http::join))
        .route("/api/v1/leave", post(http::leave))
        .route("/api/v1/session/me", get(http::session_me))
        // Player channel and spectator feed
        .route("/ws/control", get(ws::control_ws))
        .route("/ws/spectate", get(ws::spectate_ws))
        // Operator surface
        .nest("/api/v1/operator", operator)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
