//! End-of-utterance detection.
//!
//! A hysteresis debounce over the RMS magnitude of live amplitude samples:
//! any tick louder than the threshold refreshes the last-activity timestamp,
//! and once the signal has stayed quiet for longer than the configured delay
//! the detector reports the end of the utterance and stops.
//!
//! This is not a spectral voice/noise classifier. Any loud enough sound
//! counts as activity.

use crate::audio::clock::{Clock, SystemClock};
use crate::defaults;
use std::time::{Duration, Instant};

/// Configuration for the silence detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// RMS magnitude (0-255 scale) at or below which a tick counts as silence.
    pub silence_threshold: f32,
    /// Continuous silence required before declaring end-of-utterance.
    pub silence_delay: Duration,
    /// Polling cadence used by the turn controller.
    pub tick_interval: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            silence_delay: Duration::from_millis(defaults::SILENCE_DELAY_MS),
            tick_interval: Duration::from_millis(defaults::TICK_INTERVAL_MS),
        }
    }
}

/// Magnitude readings taken from the live input at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmplitudeSample(pub Vec<u8>);

impl AmplitudeSample {
    /// A sample where every one of `len` readings has the same magnitude.
    pub fn uniform(level: u8, len: usize) -> Self {
        Self(vec![level; len])
    }

    /// Root mean square of the readings, on the same 0-255 scale.
    pub fn rms(&self) -> f32 {
        calculate_rms(&self.0)
    }
}

/// Outcome of one detector tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceDecision {
    /// Monitoring is not running; the tick was ignored.
    Inactive,
    /// Still waiting for the speaker to finish.
    Listening,
    /// The speaker has been quiet for longer than the silence delay.
    EndOfUtterance,
}

/// Silence detector state machine.
pub struct SilenceDetector<C: Clock = SystemClock> {
    config: DetectorConfig,
    clock: C,
    last_voice_activity: Option<Instant>,
    active: bool,
}

impl<C: Clock> SilenceDetector<C> {
    /// Creates a detector with the given configuration and clock.
    pub fn with_clock(config: DetectorConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            last_voice_activity: None,
            active: false,
        }
    }

    /// Starts monitoring.
    ///
    /// The baseline activity timestamp is "now", so a turn that opens in
    /// silence still ends after the silence delay.
    pub fn start(&mut self) {
        let now = self.clock.now();
        self.last_voice_activity = Some(now);
        self.active = true;
    }

    /// Stops monitoring. Later ticks are ignored until the next `start`.
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Processes one amplitude sample.
    pub fn tick(&mut self, sample: &AmplitudeSample) -> SilenceDecision {
        if !self.active {
            return SilenceDecision::Inactive;
        }

        let now = self.clock.now();
        if sample.rms() > self.config.silence_threshold {
            self.mark_activity(now);
        }

        let quiet_for = self
            .last_voice_activity
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();

        if quiet_for > self.config.silence_delay {
            self.active = false;
            SilenceDecision::EndOfUtterance
        } else {
            SilenceDecision::Listening
        }
    }

    /// Returns true while monitoring is running.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Last instant a tick exceeded the threshold (or the start baseline).
    pub fn last_voice_activity(&self) -> Option<Instant> {
        self.last_voice_activity
    }

    /// Returns the detector configuration.
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn mark_activity(&mut self, now: Instant) {
        // Only ever moves forward.
        match self.last_voice_activity {
            Some(last) if last >= now => {}
            _ => self.last_voice_activity = Some(now),
        }
    }
}

impl SilenceDetector<SystemClock> {
    /// Creates a detector using the system clock.
    pub fn new(config: DetectorConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

/// Calculates the root mean square of unsigned magnitude readings.
///
/// # Returns
/// RMS on the input's own 0-255 scale; 0.0 for an empty slice.
pub fn calculate_rms(readings: &[u8]) -> f32 {
    if readings.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = readings
        .iter()
        .map(|&value| {
            let value = value as f64;
            value * value
        })
        .sum();

    (sum_squares / readings.len() as f64).sqrt() as f32
}
