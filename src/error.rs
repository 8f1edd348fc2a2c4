//! Error types for Beacon Live

use thiserror::Error;

/// Result type alias for Beacon Live operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a live voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone, speaker or camera could not be acquired
    #[error("device unavailable: {0}")]
    DeviceAcquisition(String),

    /// Audio stream error after the device was acquired
    #[error("audio error: {0}")]
    Audio(String),

    /// Inbound audio chunk could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Malformed or unexpected message from the remote service
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Remote session reported an error
    #[error("remote session error: {0}")]
    Remote(String),

    /// Remote session closed
    #[error("remote session closed: {0}")]
    RemoteClosed(String),

    /// Tool execution failed
    #[error("tool error: {0}")]
    Tool(String),

    /// Transcript storage error
    #[error("transcript error: {0}")]
    Transcript(String),

    /// The session engine task has exited
    #[error("session engine stopped")]
    EngineStopped,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
