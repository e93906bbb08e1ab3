// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator surface authentication: a shared bearer secret plus an optional
//! IP allowlist, applied only to `/api/v1/operator/*`. Admission and Control
//! Session auth are per-player bearer credentials validated inline by the
//! handlers/WS first-frame instead, since they carry no static shared secret
//! to check at the middleware layer.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ClawError;
use crate::state::AppState;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers against the operator secret.
fn validate_bearer(headers: &HeaderMap, expected: &str) -> Result<(), ClawError> {
    let header = headers.get("authorization").and_then(|v| v.to_str().ok()).ok_or(ClawError::Auth)?;
    let token = header.strip_prefix("Bearer ").ok_or(ClawError::Auth)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(ClawError::Auth)
    }
}

fn ip_allowed(ip: IpAddr, allowlist: &[IpAddr]) -> bool {
    allowlist.is_empty() || allowlist.contains(&ip)
}

/// Axum middleware enforcing the operator bearer secret and IP allowlist.
/// Mounted only on the `/api/v1/operator` nest, so every other route is
/// untouched by this layer.
pub async fn operator_auth_layer(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !ip_allowed(addr.ip(), &state.config.operator_allowlist()) {
        return ClawError::Auth.to_http_response("operator ip not allowed").into_response();
    }

    if let Err(code) = validate_bearer(req.headers(), &state.config.operator_secret) {
        return (
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::UNAUTHORIZED),
            axum::Json(crate::error::ErrorResponse { error: code.to_error_body("unauthorized") }),
        )
            .into_response();
    }

    next.run(req).await
}
