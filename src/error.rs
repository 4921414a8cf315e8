// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Error types for the cache, the remote gateway, and API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Classified failure from the remote store.
///
/// None of these abort a read or a write in the reconciler; they only decide
/// whether a write is confirmed or left pending.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Not found in remote store: {0}")]
    NotFound(String),

    #[error("Remote write conflict: {0}")]
    Conflict(String),

    #[error("Remote store rejected input: {0}")]
    InvalidInput(String),

    #[error("Remote store error: {0}")]
    Unknown(String),
}

impl GatewayError {
    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Unavailable(_) => "unavailable",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::InvalidInput(_) => "invalid_input",
            GatewayError::Unknown(_) => "unknown",
        }
    }
}

/// Local cache failure.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Stored value could not be decoded. Readers treat this as a miss.
    #[error("Cache value for {key} is corrupt: {reason}")]
    Corruption { key: String, reason: String },

    /// The cache could not be written. There is no fallback below it.
    #[error("Local cache write failed for {key}: {reason}")]
    Durability { key: String, reason: String },
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Local storage failure: {0}")]
    Durability(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Durability { .. } => AppError::Durability(err.to_string()),
            CacheError::Corruption { .. } => AppError::Internal(anyhow::Error::new(err)),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Durability(msg) => {
                tracing::error!(error = %msg, "Local storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
