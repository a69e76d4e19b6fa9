//! Boundary to the remote generative model.
//!
//! The core only needs `send(request) -> lazy stream of text chunks`; how the
//! request is encoded and transported is the client's business.

use crate::error::{Result, VoxturnError};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

/// Lazily produced reply text. The end of the stream is the completion
/// marker; an `Err` item aborts the reply.
pub type ReplyStream = BoxStream<'static, Result<String>>;

/// Everything the model gets for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    /// Captured utterance, encoded by the capture device.
    pub audio: Vec<u8>,
    /// Active language, so the model replies in it.
    pub language_hint: String,
    /// RFC 3339 timestamp of when the request was built.
    pub current_datetime: String,
}

impl ExchangeRequest {
    /// Builds a request stamped with the current time.
    pub fn new(audio: Vec<u8>, language_hint: &str) -> Self {
        Self::at(audio, language_hint, SystemTime::now())
    }

    /// Builds a request stamped with the given time.
    pub fn at(audio: Vec<u8>, language_hint: &str, now: SystemTime) -> Self {
        Self {
            audio,
            language_hint: language_hint.to_string(),
            current_datetime: humantime::format_rfc3339_seconds(now).to_string(),
        }
    }
}

/// Trait for the remote exchange.
///
/// This trait allows swapping implementations (real model client vs mock).
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Send one utterance and return the streamed reply.
    ///
    /// # Errors
    /// `VoxturnError::Exchange` when the request cannot be started.
    async fn send(&self, request: ExchangeRequest) -> Result<ReplyStream>;

    /// Name for logging/debugging.
    fn name(&self) -> &str {
        "exchange"
    }
}

/// Implement ExchangeClient for Arc<T> to allow sharing across controllers.
#[async_trait]
impl<T: ExchangeClient + ?Sized> ExchangeClient for Arc<T> {
    async fn send(&self, request: ExchangeRequest) -> Result<ReplyStream> {
        (**self).send(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// How the mock reply ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockEnding {
    Complete,
    FailAfter(usize),
    Stall,
}

/// Mock exchange client for testing.
///
/// Replies with scripted chunks, each delivered after `chunk_delay` of tokio
/// time.
#[derive(Debug, Clone)]
pub struct MockExchangeClient {
    chunks: Vec<String>,
    chunk_delay: Duration,
    send_delay: Duration,
    fail_on_send: bool,
    ending: MockEnding,
    requests: Arc<Mutex<Vec<ExchangeRequest>>>,
}

impl MockExchangeClient {
    /// Create a mock that replies with the given chunks.
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            chunk_delay: Duration::from_millis(50),
            send_delay: Duration::ZERO,
            fail_on_send: false,
            ending: MockEnding::Complete,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configure the delay before each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Wait this long inside `send` before the stream is returned.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// Refuse to start the exchange.
    pub fn with_send_failure(mut self) -> Self {
        self.fail_on_send = true;
        self
    }

    /// Yield an error after `count` chunks.
    pub fn with_failure_after(mut self, count: usize) -> Self {
        self.ending = MockEnding::FailAfter(count);
        self
    }

    /// Never produce anything and never complete.
    pub fn stalled(mut self) -> Self {
        self.ending = MockEnding::Stall;
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ExchangeRequest> {
        self.lock().clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ExchangeRequest>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    async fn send(&self, request: ExchangeRequest) -> Result<ReplyStream> {
        self.lock().push(request);
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }

        if self.fail_on_send {
            return Err(VoxturnError::Exchange {
                message: "mock exchange refused the request".to_string(),
            });
        }

        let mut items: Vec<Result<String>> = match self.ending {
            MockEnding::Stall => return Ok(stream::pending().boxed()),
            MockEnding::Complete => self.chunks.iter().cloned().map(Ok).collect(),
            MockEnding::FailAfter(count) => {
                self.chunks.iter().take(count).cloned().map(Ok).collect()
            }
        };
        if let MockEnding::FailAfter(_) = self.ending {
            items.push(Err(VoxturnError::Exchange {
                message: "mock stream interrupted".to_string(),
            }));
        }

        let delay = self.chunk_delay;
        Ok(stream::iter(items)
            .then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            })
            .boxed())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
