//! Common error types for Holoroom.

use thiserror::Error;

/// Result type alias using Holoroom's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Holoroom operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Relay connection failed or closed
    #[error("transport error: {0}")]
    Transport(String),

    /// Audio device or peer-connection failure
    #[error("media error: {0}")]
    Media(String),
}

impl Error {
    /// Create a protocol error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a media error from any displayable type.
    pub fn media(msg: impl std::fmt::Display) -> Self {
        Self::Media(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientMessage;

    #[test]
    fn test_bad_json_is_a_serialization_error() {
        let err = ClientMessage::decode("{not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().starts_with("serialization error"));
    }
}
