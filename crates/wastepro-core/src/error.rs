//! Error types for the agent runtime and message fabric.

use std::time::Duration;

use thiserror::Error;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the agent runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A synchronous reply did not arrive within the deadline.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The broker rejected a publish or subscribe.
    #[error("transport error: {0}")]
    Transport(String),

    /// The agent has begun terminating; no further publishes are accepted.
    #[error("agent is terminating")]
    Terminated,

    /// A parcel could not be encoded or decoded.
    #[error("parcel codec error: {0}")]
    Codec(String),

    /// The responder attached an error descriptor to its reply.
    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True when the error is the sync-reply timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// The remote error kind, when the reply carried one.
    pub fn remote_kind(&self) -> Option<&str> {
        match self {
            Error::Remote { kind, .. } => Some(kind),
            _ => None,
        }
    }
}
