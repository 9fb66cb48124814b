//! Error types for the wisp avatar core.

/// Top-level error type for the avatar/synchronization system.
#[derive(Debug, thiserror::Error)]
pub enum WispError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Avatar model or motion clip error.
    #[error("model error: {0}")]
    Model(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, WispError>;
