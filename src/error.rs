//! Error types for the relay
//!
//! Defines application-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (relayed to the originating session).
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

    /// No active private room is bound to the given code
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room reached its member capacity
    #[error("Room is full (max {0} users)")]
    RoomFull(usize),

    /// Session has not claimed a username yet
    #[error("Username required")]
    UsernameRequired,

    /// Only the owner may change admin privileges
    #[error("Permission denied")]
    PermissionDenied,

    /// The owner's own privilege cannot be modified
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
}

/// Message send errors
///
/// Occurs when a session's outbound channel cannot take a message.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The client is not draining its queue fast enough
    #[error("Channel full")]
    ChannelFull,

    /// No channel is registered for the session
    #[error("Unknown session")]
    UnknownSession,
}
