// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed error taxonomy shared by the store, the reservation manager, and the
//! HTTP layer. The core propagates these upward; handlers translate them to
//! HTTP exactly once, here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// One conflicting reservation, reported back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub pattern: String,
    pub held_by: String,
}

/// Service error. Variants map 1:1 onto HTTP surfaces.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    InvalidInput(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Bearer key is valid but scoped to a different project.
    #[error("{0}")]
    ForbiddenProject(String),

    /// Caller is not the owner of the resource it tried to mutate.
    #[error("{0}")]
    ForbiddenOwner(String),

    #[error("{0}")]
    NotFound(String),

    /// Optimistic-concurrency failure; caller retries with a fresh version.
    #[error("version conflict")]
    VersionConflict,

    /// New reservation overlaps active ones with at least one exclusive side.
    #[error("reservation conflict")]
    ReservationConflict(Vec<ConflictInfo>),

    /// Another live agent holds this session id.
    #[error("session id is held by an active agent")]
    ActiveSessionConflict,

    /// The agent is not a recipient of the message.
    #[error("agent is not a recipient of this message")]
    NotRecipient,

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("pattern too complex: {0}")]
    PatternTooComplex(String),

    /// Circuit breaker is open; the backing store is wedged.
    #[error("circuit open")]
    CircuitOpen,

    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::InvalidPattern(_) | Self::PatternTooComplex(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::ForbiddenProject(_) | Self::ForbiddenOwner(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::VersionConflict
            | Self::ReservationConflict(_)
            | Self::ActiveSessionConflict => StatusCode::CONFLICT,
            Self::NotRecipient => StatusCode::FORBIDDEN,
            Self::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized => "unauthorized",
            Self::ForbiddenProject(_) => "forbidden_project",
            Self::ForbiddenOwner(_) => "forbidden_owner",
            Self::NotFound(_) => "not_found",
            Self::VersionConflict => "version_conflict",
            Self::ReservationConflict(_) => "reservation_conflict",
            Self::ActiveSessionConflict => "active_session_conflict",
            Self::NotRecipient => "not_recipient",
            Self::InvalidPattern(_) => "invalid_pattern",
            Self::PatternTooComplex(_) => "pattern_too_complex",
            Self::CircuitOpen => "circuit_open",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the error is SQLite writer contention that a retry absorbs.
    pub fn is_transient_lock(&self) -> bool {
        match self {
            Self::Storage(e) => e.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

/// Wire-format error body. `conflicts` is present only on reservation
/// conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<ConflictInfo>>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let code = self.code().to_owned();
        // Internal detail stays in the log, not on the wire.
        let message = match &self {
            Self::Storage(e) => {
                tracing::error!(err = %e, "storage error surfaced to client");
                "storage error".to_owned()
            }
            other => other.to_string(),
        };
        let conflicts = match self {
            Self::ReservationConflict(conflicts) => Some(conflicts),
            _ => None,
        };
        let body = ErrorBody { code, message, conflicts };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
