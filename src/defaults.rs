//! Default configuration constants for voxturn.
//!
//! Shared by the config file types and the component configs so both agree
//! on the same out-of-the-box behavior.

/// Default silence threshold on the 0-255 magnitude scale.
///
/// Ticks whose RMS magnitude stays at or below this value count as silence.
pub const SILENCE_THRESHOLD: f32 = 15.0;

/// Default continuous silence in milliseconds before the utterance is over.
///
/// 1500ms allows for natural pauses without cutting the speaker off.
pub const SILENCE_DELAY_MS: u64 = 1500;

/// Default silence polling cadence in milliseconds (~60 Hz).
pub const TICK_INTERVAL_MS: u64 = 16;

/// Default pause after the speech queue drains before the turn is closed.
///
/// Covers the window where the reply stream has completed but the last
/// sentence is still being flushed into the queue.
pub const SETTLE_DELAY_MS: u64 = 300;

/// Largest retained reply fragment (in chars) before it is spoken anyway.
pub const MAX_PENDING_CHARS: usize = 1000;

/// Default language for the reply voice and the exchange hint.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Default speaking rate (1.0 = platform normal).
pub const SPEECH_RATE: f32 = 1.0;

/// Default speaking pitch (1.0 = platform normal).
pub const SPEECH_PITCH: f32 = 1.0;

/// Characters that end a sentence in the streamed reply.
pub const SENTENCE_TERMINALS: &[char] = &['.', '?', '!'];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_threshold_fits_magnitude_scale() {
        assert!(SILENCE_THRESHOLD > 0.0 && SILENCE_THRESHOLD < 255.0);
    }

    #[test]
    fn tick_is_much_shorter_than_silence_delay() {
        assert!(TICK_INTERVAL_MS * 10 < SILENCE_DELAY_MS);
    }
}
