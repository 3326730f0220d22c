//! Error types for the hub
//!
//! Almost everything in the hub is log-and-continue, so these types mostly
//! exist to give log lines a consistent shape. Only the handshake and
//! configuration errors are ever returned to a caller.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Hub-level errors
#[derive(Debug, Error)]
pub enum HubError {
    /// WebSocket upgrade failed (the connection is dropped)
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Wire envelope errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Inbound frame is not a `[type, payload]` pair
    #[error("Malformed event: {0}")]
    Decode(#[source] serde_json::Error),

    /// Outbound event or payload could not be serialized
    #[error("Event serialization error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but its value is unusable
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}
