//! Error types for the live session bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the live session bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone or speaker missing, or access denied
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio processing error (stream setup, resampling)
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed inbound audio payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Connect, send or receive failure on the session transport
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer or caller broke the session protocol (non-fatal)
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Tool handler failed
    #[error("tool handler error: {0}")]
    Handler(String),

    /// Operation exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Connect attempt abandoned by a disconnect
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A session is already connecting or open
    #[error("session already active ({0})")]
    SessionActive(String),

    /// Ambient scan service error
    #[error("scan error: {0}")]
    Scan(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Whether this error ends the session
    ///
    /// Decode, protocol and handler errors are absorbed by the session and only logged
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Decode(_) | Self::ProtocolViolation(_) | Self::Handler(_) | Self::Scan(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_errors_are_not_fatal() {
        assert!(!Error::Decode("odd byte count".to_string()).is_fatal());
        assert!(!Error::ProtocolViolation("unknown id".to_string()).is_fatal());
        assert!(!Error::Handler("boom".to_string()).is_fatal());
        assert!(Error::Transport("reset".to_string()).is_fatal());
        assert!(Error::DeviceUnavailable("no mic".to_string()).is_fatal());
    }
}
