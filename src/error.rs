//! # Error Handling
//!
//! Custom error types for the ingest and transcription pipeline and their
//! conversion to HTTP responses.
//!
//! ## Error Categories:
//! - **Protocol**: invalid or out-of-order WebSocket frames (reported over the
//!   connection, almost never fatal)
//! - **Persistence**: chunk/manifest/queue-document I/O failures
//! - **Queue**: queue lock contention and timeouts
//! - **Engine**: external transcription process failures
//! - **NotFound**: unknown round or job (404 errors)
//! - **BadRequest**: client sent invalid or incomplete data (400 errors)
//! - **Internal**: everything else (500 errors)

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// Protocol errors carry a machine-readable code because they are echoed back
/// to streaming clients as `error{message, code}` frames rather than HTTP
/// responses.
#[derive(Debug)]
pub enum AppError {
    /// WebSocket protocol violation (invalid frame, not initialized, ...)
    Protocol { code: String, message: String },

    /// Chunk, manifest, artifact, or queue-document I/O failure
    Persistence(String),

    /// Queue lock acquisition failed (contention past the retry budget)
    Queue(String),

    /// External transcription engine failed (bad exit, malformed output)
    Engine(String),

    /// Requested round or job does not exist
    NotFound(String),

    /// Client sent invalid or incomplete data
    BadRequest(String),

    /// Internal server errors that fit no other category
    Internal(String),
}

impl AppError {
    /// Build a protocol error with its wire code.
    pub fn protocol(code: &str, message: impl Into<String>) -> Self {
        AppError::Protocol {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// The machine-readable code used in `error` frames on the stream.
    pub fn ws_code(&self) -> String {
        match self {
            AppError::Protocol { code, .. } => code.clone(),
            AppError::Persistence(_) => "PERSISTENCE_ERROR".to_string(),
            AppError::Queue(_) => "QUEUE_ERROR".to_string(),
            AppError::Engine(_) => "ENGINE_ERROR".to_string(),
            AppError::NotFound(_) => "NOT_FOUND".to_string(),
            AppError::BadRequest(_) => "BAD_REQUEST".to_string(),
            AppError::Internal(_) => "INTERNAL_ERROR".to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Protocol { code, message } => {
                write!(f, "Protocol error [{}]: {}", code, message)
            }
            AppError::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            AppError::Queue(msg) => write!(f, "Queue error: {}", msg),
            AppError::Engine(msg) => write!(f, "Engine error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Conversion of errors into JSON HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - Persistence/Queue/Engine/Internal → 500 (Internal Server Error)
/// - Protocol/BadRequest → 400 (Bad Request)
/// - NotFound → 404 (Not Found)
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Protocol { message, .. } => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "protocol_error",
                message.clone(),
            ),
            AppError::Persistence(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "persistence_error",
                msg.clone(),
            ),
            AppError::Queue(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "queue_error",
                msg.clone(),
            ),
            AppError::Engine(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "engine_error",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Persistence(err.to_string())
    }
}

/// JSON (de)serialization failures surface where we read our own persisted
/// documents, so they are persistence errors rather than client mistakes.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Persistence(format!("JSON error: {}", err))
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_codes() {
        let err = AppError::protocol("ROUND_NOT_FOUND", "round missing");
        assert_eq!(err.ws_code(), "ROUND_NOT_FOUND");

        let err = AppError::Persistence("disk full".to_string());
        assert_eq!(err.ws_code(), "PERSISTENCE_ERROR");

        let err = AppError::Queue("lock timeout".to_string());
        assert_eq!(err.ws_code(), "QUEUE_ERROR");
    }

    #[test]
    fn test_display_includes_code() {
        let err = AppError::protocol("NOT_INITIALIZED", "init required");
        let rendered = err.to_string();
        assert!(rendered.contains("NOT_INITIALIZED"));
        assert!(rendered.contains("init required"));
    }
}
