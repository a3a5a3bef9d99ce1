//! Error types for the Cadence voice engine

use thiserror::Error;

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access was denied by the platform
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable capture or playback device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Transport error (socket connect/read/write)
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol error (malformed or unexpected frame)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Token issuance / authentication error
    #[error("auth error: {0}")]
    Auth(String),

    /// Unknown function name in a function-call frame
    #[error("unknown function: {0}")]
    UnknownFunction(String),

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
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
