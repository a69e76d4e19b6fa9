//! Error types for voxturn.

use std::fmt;
use thiserror::Error;

/// Why the microphone could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFailure {
    /// The user (or platform policy) refused microphone access.
    PermissionDenied,
    /// No usable input device, or the device went away.
    DeviceUnavailable,
}

impl fmt::Display for CaptureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureFailure::PermissionDenied => write!(f, "permission denied"),
            CaptureFailure::DeviceUnavailable => write!(f, "device unavailable"),
        }
    }
}

#[derive(Error, Debug)]
pub enum VoxturnError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Turn pipeline errors
    #[error("Microphone unavailable ({reason}): {message}")]
    CaptureUnavailable {
        reason: CaptureFailure,
        message: String,
    },

    #[error("Exchange failed: {message}")]
    Exchange { message: String },

    #[error("Exchange timed out after {after_ms} ms without a reply")]
    ExchangeTimeout { after_ms: u64 },

    #[error("Speech synthesis failed: {message}")]
    Synthesis { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl VoxturnError {
    /// Short label for the pipeline stage the error came from.
    pub fn stage(&self) -> &'static str {
        match self {
            VoxturnError::ConfigParse { .. }
            | VoxturnError::ConfigInvalidValue { .. }
            | VoxturnError::Config(_) => "config",
            VoxturnError::CaptureUnavailable { .. } => "capture",
            VoxturnError::Exchange { .. } | VoxturnError::ExchangeTimeout { .. } => "exchange",
            VoxturnError::Synthesis { .. } => "speech",
            VoxturnError::Io(_) | VoxturnError::Other(_) => "internal",
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxturnError>;
