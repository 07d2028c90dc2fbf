//! Error types for the chat server
//!
//! Defines application-level errors, outbound queue send errors, and
//! repository errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers fatal errors that terminate a connection. Business failures
/// never reach this type; the hub converts them into `error_message`
/// frames instead.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Password hashing failure
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

/// Outbound queue send errors
///
/// Returned by `Session::enqueue`; both variants mean the frame was
/// dropped for that one recipient.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// Queue at capacity (slow consumer)
    #[error("outbound queue full")]
    Full,

    /// Queue already closed by the hub
    #[error("outbound queue closed")]
    Closed,
}

/// Repository errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique-constraint violation (nickname or room name taken)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend failure
    #[error("storage backend error: {0}")]
    Backend(String),
}
