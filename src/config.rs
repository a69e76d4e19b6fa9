use crate::audio::silence::DetectorConfig;
use crate::defaults;
use crate::error::VoxturnError;
use crate::speech::segmenter::SegmenterConfig;
use crate::speech::synth::VoicePreference;
use crate::turn::controller::TurnConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub detector: DetectorSection,
    pub segmenter: SegmenterSection,
    pub turn: TurnSection,
    pub voice: VoicePreference,
}

/// End-of-utterance detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorSection {
    /// RMS magnitude on the 0-255 scale at or below which input counts as silence.
    pub silence_threshold: f32,
    pub silence_delay_ms: u64,
    pub tick_interval_ms: u64,
}

/// Reply segmentation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmenterSection {
    pub max_pending_chars: usize,
}

/// Turn timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TurnSection {
    pub settle_delay_ms: u64,
    /// Unset (the default) waits for the first reply chunk indefinitely.
    pub exchange_timeout_ms: Option<u64>,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            silence_delay_ms: defaults::SILENCE_DELAY_MS,
            tick_interval_ms: defaults::TICK_INTERVAL_MS,
        }
    }
}

impl Default for SegmenterSection {
    fn default() -> Self {
        Self {
            max_pending_chars: defaults::MAX_PENDING_CHARS,
        }
    }
}

impl Default for TurnSection {
    fn default() -> Self {
        Self {
            settle_delay_ms: defaults::SETTLE_DELAY_MS,
            exchange_timeout_ms: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXTURN_LANGUAGE → voice.language_code
    /// - VOXTURN_VOICE → voice.voice_uri
    /// - VOXTURN_SILENCE_DELAY_MS → detector.silence_delay_ms (ignored unless a number)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(language) = std::env::var("VOXTURN_LANGUAGE")
            && !language.is_empty()
        {
            self.voice.language_code = language;
        }

        if let Ok(voice) = std::env::var("VOXTURN_VOICE")
            && !voice.is_empty()
        {
            self.voice.voice_uri = Some(voice);
        }

        if let Ok(delay) = std::env::var("VOXTURN_SILENCE_DELAY_MS")
            && let Ok(delay) = delay.trim().parse::<u64>()
        {
            self.detector.silence_delay_ms = delay;
        }

        self
    }

    /// Check value ranges the type system cannot express.
    pub fn validate(&self) -> Result<(), VoxturnError> {
        let threshold = self.detector.silence_threshold;
        if !(0.0..=255.0).contains(&threshold) {
            return Err(invalid(
                "detector.silence_threshold",
                format!("must be between 0 and 255, got {}", threshold),
            ));
        }
        if self.detector.silence_delay_ms == 0 {
            return Err(invalid("detector.silence_delay_ms", "must be positive"));
        }
        if self.detector.tick_interval_ms == 0 {
            return Err(invalid("detector.tick_interval_ms", "must be positive"));
        }
        if self.segmenter.max_pending_chars == 0 {
            return Err(invalid("segmenter.max_pending_chars", "must be positive"));
        }
        if self.turn.exchange_timeout_ms == Some(0) {
            return Err(invalid(
                "turn.exchange_timeout_ms",
                "must be positive (omit it to wait indefinitely)",
            ));
        }
        if self.voice.rate.is_nan() || self.voice.rate <= 0.0 {
            return Err(invalid("voice.rate", format!("must be positive, got {}", self.voice.rate)));
        }
        if self.voice.pitch.is_nan() || self.voice.pitch <= 0.0 {
            return Err(invalid(
                "voice.pitch",
                format!("must be positive, got {}", self.voice.pitch),
            ));
        }
        if self.voice.language_code.trim().is_empty() {
            return Err(invalid("voice.language_code", "must not be empty"));
        }
        Ok(())
    }

    /// Runtime settings for the turn controller.
    pub fn turn_config(&self) -> TurnConfig {
        TurnConfig {
            detector: DetectorConfig {
                silence_threshold: self.detector.silence_threshold,
                silence_delay: Duration::from_millis(self.detector.silence_delay_ms),
                tick_interval: Duration::from_millis(self.detector.tick_interval_ms),
            },
            segmenter: SegmenterConfig {
                max_pending_chars: self.segmenter.max_pending_chars,
            },
            settle_delay: Duration::from_millis(self.turn.settle_delay_ms),
            exchange_timeout: self.turn.exchange_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxturn/config.toml on Linux, `None` when the
    /// platform has no config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("voxturn").join("config.toml"))
    }
}

fn invalid(key: &str, message: impl Into<String>) -> VoxturnError {
    VoxturnError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}
