use crate::audio::silence::AmplitudeSample;
use crate::error::{CaptureFailure, Result, VoxturnError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for microphone access.
///
/// This trait allows swapping implementations (real platform capture vs mock).
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Request access to the microphone and start recording.
    ///
    /// May wait on a permission prompt. Dropping the returned future
    /// abandons the request.
    ///
    /// # Errors
    /// `VoxturnError::CaptureUnavailable` when permission is denied or no
    /// device can be opened.
    async fn open(&self) -> Result<Box<dyn CaptureStream>>;
}

/// A live, open microphone stream.
pub trait CaptureStream: Send {
    /// Encoded audio chunks recorded since the previous call.
    fn take_chunks(&mut self) -> Vec<Vec<u8>>;

    /// Magnitude readings for the current instant.
    fn amplitude(&mut self) -> AmplitudeSample;

    /// Release the device. Must be safe to call more than once.
    fn release(&mut self);
}

/// The audio captured for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioPayload {
    /// Nothing was recorded. No exchange should be attempted.
    Empty,
    /// Concatenated chunk data as produced by the capture device.
    Recorded { data: Vec<u8>, chunks: usize },
}

impl AudioPayload {
    pub fn is_empty(&self) -> bool {
        matches!(self, AudioPayload::Empty)
    }

    /// Payload bytes (empty slice for `Empty`).
    pub fn data(&self) -> &[u8] {
        match self {
            AudioPayload::Empty => &[],
            AudioPayload::Recorded { data, .. } => data,
        }
    }
}

/// Owns the microphone for the duration of one capture.
///
/// The device is released on `stop`, and on drop if `stop` was never reached.
pub struct CaptureSession {
    stream: Option<Box<dyn CaptureStream>>,
    buffer: Vec<u8>,
    chunks: usize,
}

impl CaptureSession {
    /// Opens the microphone and begins buffering audio from this point.
    pub async fn start(provider: &dyn CaptureProvider) -> Result<Self> {
        let stream = provider.open().await?;
        debug!("capture session opened");
        Ok(Self {
            stream: Some(stream),
            buffer: Vec::new(),
            chunks: 0,
        })
    }

    /// Moves newly recorded chunks into the session buffer.
    pub fn collect(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            for chunk in stream.take_chunks() {
                if chunk.is_empty() {
                    continue;
                }
                self.buffer.extend_from_slice(&chunk);
                self.chunks += 1;
            }
        }
    }

    /// Current amplitude sample (empty once released).
    pub fn sample(&mut self) -> AmplitudeSample {
        self.stream
            .as_mut()
            .map(|stream| stream.amplitude())
            .unwrap_or_default()
    }

    /// Number of chunks buffered so far.
    pub fn buffered_chunks(&self) -> usize {
        self.chunks
    }

    /// Ends buffering, releases the device and returns the captured audio.
    pub fn stop(mut self) -> AudioPayload {
        self.collect();
        self.release();
        if self.chunks == 0 {
            return AudioPayload::Empty;
        }
        AudioPayload::Recorded {
            data: std::mem::take(&mut self.buffer),
            chunks: self.chunks,
        }
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            debug!(chunks = self.chunks, "capture device released");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Counters shared between a `MockCaptureProvider` and its streams.
#[derive(Debug, Default)]
struct MockCaptureState {
    opened: usize,
    released: usize,
    open_now: usize,
    max_open: usize,
}

fn lock(state: &Mutex<MockCaptureState>) -> MutexGuard<'_, MockCaptureState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read-only view of a mock provider's device usage.
#[derive(Debug, Clone)]
pub struct CaptureProbe {
    state: Arc<Mutex<MockCaptureState>>,
}

impl CaptureProbe {
    /// How many times the device was opened.
    pub fn opened(&self) -> usize {
        lock(&self.state).opened
    }

    /// How many times the device was released.
    pub fn released(&self) -> usize {
        lock(&self.state).released
    }

    /// Streams currently holding the device.
    pub fn open_now(&self) -> usize {
        lock(&self.state).open_now
    }

    /// Highest number of streams ever open at the same time.
    pub fn max_concurrent(&self) -> usize {
        lock(&self.state).max_open
    }
}

/// Mock microphone for testing.
///
/// Amplitude follows a script of `(duration, level)` segments measured from
/// the moment the stream opens (tokio time, so paused tests are
/// deterministic); after the script ends the input is silent.
#[derive(Debug, Clone)]
pub struct MockCaptureProvider {
    script: Vec<(Duration, u8)>,
    readings: usize,
    records_audio: bool,
    open_delay: Duration,
    failure: Option<CaptureFailure>,
    error_message: String,
    state: Arc<Mutex<MockCaptureState>>,
}

impl MockCaptureProvider {
    /// Create a mock that is silent and records one chunk per poll.
    pub fn new() -> Self {
        Self {
            script: Vec::new(),
            readings: 32,
            records_audio: true,
            open_delay: Duration::ZERO,
            failure: None,
            error_message: "mock capture error".to_string(),
            state: Arc::new(Mutex::new(MockCaptureState::default())),
        }
    }

    /// Append a segment of constant amplitude to the script.
    pub fn with_level(mut self, duration: Duration, level: u8) -> Self {
        self.script.push((duration, level));
        self
    }

    /// Never produce audio chunks (the payload will be empty).
    pub fn without_audio(mut self) -> Self {
        self.records_audio = false;
        self
    }

    /// Wait this long in `open` before answering, like a permission prompt.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Fail every `open` with the given reason.
    pub fn with_open_failure(mut self, reason: CaptureFailure) -> Self {
        self.failure = Some(reason);
        self
    }

    /// Configure the error message for failures.
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Handle for inspecting device usage after the provider is moved.
    pub fn probe(&self) -> CaptureProbe {
        CaptureProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockCaptureProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureProvider for MockCaptureProvider {
    async fn open(&self) -> Result<Box<dyn CaptureStream>> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if let Some(reason) = self.failure {
            warn!(%reason, "mock capture refused to open");
            return Err(VoxturnError::CaptureUnavailable {
                reason,
                message: self.error_message.clone(),
            });
        }

        {
            let mut state = lock(&self.state);
            state.opened += 1;
            state.open_now += 1;
            state.max_open = state.max_open.max(state.open_now);
        }

        Ok(Box::new(MockCaptureStream {
            script: self.script.clone(),
            readings: self.readings,
            records_audio: self.records_audio,
            opened_at: tokio::time::Instant::now(),
            released: false,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockCaptureStream {
    script: Vec<(Duration, u8)>,
    readings: usize,
    records_audio: bool,
    opened_at: tokio::time::Instant,
    released: bool,
    state: Arc<Mutex<MockCaptureState>>,
}

impl MockCaptureStream {
    fn current_level(&self) -> u8 {
        let mut elapsed = self.opened_at.elapsed();
        for &(duration, level) in &self.script {
            if elapsed < duration {
                return level;
            }
            elapsed -= duration;
        }
        0
    }
}

impl CaptureStream for MockCaptureStream {
    fn take_chunks(&mut self) -> Vec<Vec<u8>> {
        if self.released || !self.records_audio {
            return Vec::new();
        }
        vec![vec![self.current_level(); 8]]
    }

    fn amplitude(&mut self) -> AmplitudeSample {
        if self.released {
            return AmplitudeSample::default();
        }
        AmplitudeSample::uniform(self.current_level(), self.readings)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = lock(&self.state);
        state.released += 1;
        state.open_now = state.open_now.saturating_sub(1);
    }
}

impl Drop for MockCaptureStream {
    fn drop(&mut self) {
        self.release();
    }
}
