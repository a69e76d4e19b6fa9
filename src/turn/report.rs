//! Error reporting for failed turns.

use crate::error::VoxturnError;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Trait for reporting turn failures.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a pipeline stage.
    fn report(&self, stage: &str, error: &VoxturnError);
}

/// Reporter that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, stage: &str, error: &VoxturnError) {
        warn!(stage, %error, "turn failed");
    }
}

/// Reporter that remembers every report, for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct CollectingReporter {
    reports: Arc<Mutex<Vec<(String, String)>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(stage, message)` pairs in the order reported.
    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, stage: &str, error: &VoxturnError) {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((stage.to_string(), error.to_string()));
    }
}
