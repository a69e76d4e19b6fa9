use crate::defaults;
use crate::error::{Result, VoxturnError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// The listener's voice settings.
///
/// Owned by the settings layer; the speech queue takes a snapshot each time
/// it creates an utterance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoicePreference {
    /// Preferred platform voice, if any.
    pub voice_uri: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    /// BCP 47 tag of the active language (e.g. `en-US`).
    pub language_code: String,
}

impl Default for VoicePreference {
    fn default() -> Self {
        Self {
            voice_uri: None,
            rate: defaults::SPEECH_RATE,
            pitch: defaults::SPEECH_PITCH,
            language_code: defaults::DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// A voice the synthesizer can speak with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceDescriptor {
    pub uri: String,
    /// BCP 47 tag the voice speaks.
    pub language: String,
}

impl VoiceDescriptor {
    pub fn new(uri: &str, language: &str) -> Self {
        Self {
            uri: uri.to_string(),
            language: language.to_string(),
        }
    }
}

/// One sentence ready to be spoken.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    /// `None` means the platform default voice for `language_code`.
    pub voice_id: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub language_code: String,
}

impl Utterance {
    /// Builds an utterance from the current preference snapshot.
    ///
    /// The preferred voice is applied only when its language shares the
    /// active language's primary subtag.
    pub fn new(text: &str, preference: &VoicePreference, voices: &[VoiceDescriptor]) -> Self {
        let voice_id = preference.voice_uri.as_deref().and_then(|uri| {
            voices
                .iter()
                .find(|voice| voice.uri == uri)
                .filter(|voice| same_primary_language(&voice.language, &preference.language_code))
                .map(|voice| voice.uri.clone())
        });

        Self {
            text: text.to_string(),
            voice_id,
            rate: preference.rate,
            pitch: preference.pitch,
            language_code: preference.language_code.clone(),
        }
    }
}

/// Primary subtag of a language tag: `en` for `en-US`, `pt` for `pt_BR`.
pub fn primary_subtag(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag).trim()
}

/// True when both tags share a (case-insensitive) primary subtag.
pub fn same_primary_language(a: &str, b: &str) -> bool {
    let a = primary_subtag(a);
    !a.is_empty() && a.eq_ignore_ascii_case(primary_subtag(b))
}

/// Trait for text-to-speech output.
///
/// This trait allows swapping implementations (platform speech vs mock).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Voices available on this device.
    fn voices(&self) -> Vec<VoiceDescriptor>;

    /// Speak one utterance, resolving when playback ends.
    ///
    /// # Errors
    /// `VoxturnError::Synthesis` if the utterance could not be played.
    async fn speak(&self, utterance: Utterance) -> Result<()>;

    /// Silence any utterance that is currently audible.
    fn cancel(&self);
}

#[derive(Debug, Default)]
struct MockSpeechState {
    started: Vec<Utterance>,
    finished: Vec<String>,
    cancels: usize,
    playing_now: usize,
    max_playing: usize,
}

fn lock(state: &Mutex<MockSpeechState>) -> MutexGuard<'_, MockSpeechState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps `playing_now` honest even when a playback future is dropped.
struct PlayingGuard {
    state: Arc<Mutex<MockSpeechState>>,
}

impl Drop for PlayingGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.playing_now = state.playing_now.saturating_sub(1);
    }
}

/// Mock synthesizer for testing.
///
/// Each utterance "plays" for a fixed duration of tokio time.
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    voices: Vec<VoiceDescriptor>,
    duration: Duration,
    failing: HashSet<String>,
    state: Arc<Mutex<MockSpeechState>>,
}

impl MockSynthesizer {
    /// Create a mock whose utterances take 200ms each.
    pub fn new() -> Self {
        Self {
            voices: Vec::new(),
            duration: Duration::from_millis(200),
            failing: HashSet::new(),
            state: Arc::new(Mutex::new(MockSpeechState::default())),
        }
    }

    /// Configure how long every utterance plays.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Advertise a voice.
    pub fn with_voice(mut self, uri: &str, language: &str) -> Self {
        self.voices.push(VoiceDescriptor::new(uri, language));
        self
    }

    /// Fail when asked to speak exactly this text.
    pub fn with_failure_on(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    /// Utterances that started playing, in order.
    pub fn started(&self) -> Vec<Utterance> {
        lock(&self.state).started.clone()
    }

    /// Texts of the utterances that started playing, in order.
    pub fn started_texts(&self) -> Vec<String> {
        lock(&self.state)
            .started
            .iter()
            .map(|u| u.text.clone())
            .collect()
    }

    /// Texts that played to their natural end.
    pub fn finished(&self) -> Vec<String> {
        lock(&self.state).finished.clone()
    }

    /// How many times `cancel` was called.
    pub fn cancels(&self) -> usize {
        lock(&self.state).cancels
    }

    /// Utterances audible right now.
    pub fn playing_now(&self) -> usize {
        lock(&self.state).playing_now
    }

    /// Highest number of utterances ever audible at once.
    pub fn max_concurrent(&self) -> usize {
        lock(&self.state).max_playing
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    fn voices(&self) -> Vec<VoiceDescriptor> {
        self.voices.clone()
    }

    async fn speak(&self, utterance: Utterance) -> Result<()> {
        let text = utterance.text.clone();
        {
            let mut state = lock(&self.state);
            state.started.push(utterance);
            state.playing_now += 1;
            state.max_playing = state.max_playing.max(state.playing_now);
        }
        let _guard = PlayingGuard {
            state: Arc::clone(&self.state),
        };

        tokio::time::sleep(self.duration).await;

        if self.failing.contains(&text) {
            return Err(VoxturnError::Synthesis {
                message: format!("mock synthesis failure for {:?}", text),
            });
        }
        lock(&self.state).finished.push(text);
        Ok(())
    }

    fn cancel(&self) {
        lock(&self.state).cancels += 1;
    }
}
