// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of error kinds surfaced across the admission, control, and
/// operator surfaces. Kinds that threaten safety (`FatalHardware`,
/// `Persistence`) never reach an HTTP caller directly — they drive
/// `emergency_stop` and a terminal `error` result instead; this enum exists
/// so every layer that *does* talk HTTP shares one mapping to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClawError {
    Validation,
    Auth,
    NotFound,
    Conflict,
    RateLimited,
    Protocol,
    TransientHardware,
    FatalHardware,
    Persistence,
    Internal,
}

impl ClawError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Auth => 401,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::RateLimited => 429,
            Self::Protocol => 400,
            Self::TransientHardware => 503,
            Self::FatalHardware => 503,
            Self::Persistence => 500,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::Auth => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Protocol => "PROTOCOL",
            Self::TransientHardware => "TRANSIENT_HARDWARE",
            Self::FatalHardware => "FATAL_HARDWARE",
            Self::Persistence => "PERSISTENCE",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ClawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl axum::response::IntoResponse for ClawError {
    fn into_response(self) -> axum::response::Response {
        use axum::response::IntoResponse;
        self.to_http_response(self.as_str()).into_response()
    }
}
