//! Error types for the tutor mascot

use thiserror::Error;

/// Result type alias for mascot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the mascot front end
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// Audio bytes could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Analysis graph could not be built
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Scene or mesh description error
    #[error("scene error: {0}")]
    Scene(String),

    /// Tutor backend returned an error
    #[error("tutor backend error: {0}")]
    Tutor(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

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
}
