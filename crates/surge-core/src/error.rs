//! Error types for the SURGE coordinator

use std::net::SocketAddr;

use thiserror::Error;

use crate::NodeId;

/// Core SURGE errors
#[derive(Error, Debug)]
pub enum SurgeError {
    // Protocol errors
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    // Registry errors
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    // Transport errors
    #[error("Send to {0} failed: connection closed")]
    SendFailed(NodeId),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Runtime errors
    #[error("Coordinator engine failed: {0}")]
    EngineFailed(String),

    // Startup errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // Sink errors
    #[error("Sink error: {0}")]
    Sink(String),
}

impl From<serde_json::Error> for SurgeError {
    fn from(e: serde_json::Error) -> Self {
        SurgeError::MalformedMessage(e.to_string())
    }
}

/// Result type for SURGE operations
pub type SurgeResult<T> = Result<T, SurgeError>;
