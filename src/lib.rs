//! voxturn - turn-based voice conversation core
//!
//! Capture an utterance, detect when the speaker has finished, stream the
//! model's reply and speak it sentence by sentence.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod exchange;
pub mod speech;
pub mod turn;

// Collaborator traits (capture → exchange → speech)
pub use audio::capture::{CaptureProvider, CaptureStream};
pub use exchange::{ExchangeClient, ExchangeRequest, ReplyStream};
pub use speech::synth::SpeechSynthesizer;

// Mocks for tests and simulation
pub use audio::capture::MockCaptureProvider;
pub use exchange::MockExchangeClient;
pub use speech::synth::MockSynthesizer;

// Turn orchestration
pub use turn::controller::{TurnAction, TurnConfig, TurnController, TurnHandle};
pub use turn::status::{StatusLine, StatusSnapshot, TurnId, TurnStatus};

// Error handling
pub use error::{CaptureFailure, Result, VoxturnError};

// Config
pub use config::Config;
pub use speech::synth::VoicePreference;

// Error reporting
pub use turn::report::{ErrorReporter, LogReporter};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
