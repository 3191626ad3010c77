//! Error types for the Lumen controller

use thiserror::Error;

/// Result type alias for Lumen operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Lumen controller
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Bluetooth endpoint negotiation error
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] NegotiationError),

    /// Speech recognition error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech synthesis error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// Engine subprocess error
    #[error("engine error: {0}")]
    Engine(String),

    /// Engine exchange timed out
    #[error("engine timeout: {0}")]
    EngineTimeout(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the Bluetooth endpoint negotiation pass
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// No Bluetooth card visible to the audio subsystem
    #[error("no bluetooth card found")]
    NoCard,

    /// Card refused to settle on a voice-capable profile
    #[error("profile switch failed: {0}")]
    ProfileSwitchFailed(String),

    /// Card has no capture source
    #[error("no input source for card: {0}")]
    NoInputSource(String),
}
