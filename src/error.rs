//! Error types for the companion avatar core

use thiserror::Error;

/// Main error type for the companion avatar core
#[derive(Error, Debug)]
pub enum CompanionError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Motion error: {0}")]
    Motion(#[from] MotionLoadError),

    #[error("Audio decode error: {0}")]
    AudioDecode(#[from] AudioDecodeError),

    #[error(transparent)]
    UnknownPreset(#[from] UnknownPresetError),

    #[error(transparent)]
    Interrupted(#[from] PlaybackInterrupted),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Avatar not ready (state: {state})")]
    NotReady { state: String },

    #[error("Controller has been disposed")]
    Disposed,

    #[error("No async runtime available for background loading")]
    NoRuntime,
}

/// Avatar bundle fetch/parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Failed to parse avatar bundle: {0}")]
    Parse(String),

    #[error("Model has no humanoid bones")]
    NoHumanoid,

    #[error("Load was cancelled")]
    Cancelled,
}

/// Motion clip fetch/parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionLoadError {
    #[error("Failed to fetch motion {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Failed to parse motion: {0}")]
    Parse(String),

    #[error("Malformed motion clip: {0}")]
    Malformed(String),

    #[error("Unknown motion file type: {0}")]
    UnknownFileType(String),

    #[error("No motion registered as '{0}'")]
    UnknownMotion(String),

    #[error("Motion request was cancelled")]
    Cancelled,
}

/// Speech buffer decode errors
#[derive(Error, Debug)]
pub enum AudioDecodeError {
    #[error("Audio buffer is empty")]
    Empty,

    #[error("Unsupported audio format: {0}")]
    Unsupported(String),

    #[error("Corrupt audio stream: {0}")]
    Corrupt(String),

    #[error("Decoder task failed: {0}")]
    Task(String),
}

/// Audio output device errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("No audio output device found")]
    NoDevice,

    #[error("Failed to build output stream: {0}")]
    StreamBuild(String),

    #[error("Audio output thread is gone")]
    Disconnected,
}

/// An expression preset name that is not registered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown expression preset: {0}")]
pub struct UnknownPresetError(pub String);

/// A speech session that ended before its audio finished
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Speech playback was interrupted")]
pub struct PlaybackInterrupted;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// Result type alias for companion operations
pub type Result<T> = std::result::Result<T, CompanionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_wrap_source() {
        let err: CompanionError = LoadError::NoHumanoid.into();
        assert!(matches!(err, CompanionError::Load(LoadError::NoHumanoid)));

        let err: CompanionError = UnknownPresetError("smug".to_string()).into();
        assert_eq!(err.to_string(), "Unknown expression preset: smug");

        let err: CompanionError = PlaybackInterrupted.into();
        assert_eq!(err.to_string(), "Speech playback was interrupted");
    }
}
