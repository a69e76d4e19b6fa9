//! Ordered, single-consumer playback of reply sentences.
//!
//! Sentences are spoken strictly in enqueue order, one at a time. The
//! consumer is `next_event`, which the owner polls (usually from a
//! `tokio::select!` loop): it awaits the utterance in flight and starts the
//! next one before returning.

use crate::error::VoxturnError;
use crate::speech::synth::{SpeechSynthesizer, Utterance, VoicePreference};
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What happened to the entry that was playing.
#[derive(Debug)]
pub enum SpeechEvent {
    /// The entry ended and the next pending entry has started.
    Finished { text: String },
    /// The entry ended and nothing is pending; the queue is now idle.
    Drained { text: String },
    /// The entry failed; `dropped` pending entries were discarded and the
    /// queue is now idle.
    Failed {
        text: String,
        error: VoxturnError,
        dropped: usize,
    },
}

struct Playback {
    text: String,
    done: BoxFuture<'static, crate::error::Result<()>>,
}

/// FIFO speech scheduler over a `SpeechSynthesizer`.
pub struct SpeechQueue {
    synth: Arc<dyn SpeechSynthesizer>,
    preference: watch::Receiver<VoicePreference>,
    pending: VecDeque<String>,
    current: Option<Playback>,
}

impl SpeechQueue {
    /// Creates an idle queue. `preference` is read at the start of every
    /// utterance.
    pub fn new(
        synth: Arc<dyn SpeechSynthesizer>,
        preference: watch::Receiver<VoicePreference>,
    ) -> Self {
        Self {
            synth,
            preference,
            pending: VecDeque::new(),
            current: None,
        }
    }

    /// Appends a sentence; starts playback right away if the queue is idle.
    pub fn enqueue(&mut self, sentence: impl Into<String>) {
        let sentence = sentence.into();
        if self.current.is_none() {
            self.begin(sentence);
        } else {
            self.pending.push_back(sentence);
        }
    }

    /// Drops every pending entry and silences the one playing.
    ///
    /// Returns the number of entries discarded, including the one playing.
    pub fn cancel_all(&mut self) -> usize {
        let mut discarded = self.pending.len();
        self.pending.clear();
        if let Some(playback) = self.current.take() {
            drop(playback);
            self.synth.cancel();
            discarded += 1;
        }
        if discarded > 0 {
            info!(discarded, "speech queue cancelled");
        }
        discarded
    }

    /// True while an entry is playing.
    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    /// True when nothing is playing or pending.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    /// Entries waiting behind the one playing.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Text of the entry playing right now.
    pub fn now_playing(&self) -> Option<&str> {
        self.current.as_ref().map(|playback| playback.text.as_str())
    }

    /// Waits for the playing entry to end and reports what happened.
    ///
    /// Never resolves while the queue is idle. Cancel safe: dropping the
    /// returned future leaves the playing entry untouched.
    pub async fn next_event(&mut self) -> SpeechEvent {
        let result = match self.current.as_mut() {
            Some(playback) => playback.done.as_mut().await,
            None => std::future::pending().await,
        };

        let text = match self.current.take() {
            Some(playback) => playback.text,
            None => String::new(),
        };

        match result {
            Ok(()) => match self.pending.pop_front() {
                Some(next) => {
                    self.begin(next);
                    SpeechEvent::Finished { text }
                }
                None => {
                    debug!("speech queue drained");
                    SpeechEvent::Drained { text }
                }
            },
            Err(error) => {
                let dropped = self.pending.len();
                self.pending.clear();
                warn!(%error, dropped, "utterance failed, dropping the rest of the reply");
                SpeechEvent::Failed {
                    text,
                    error,
                    dropped,
                }
            }
        }
    }

    fn begin(&mut self, text: String) {
        let preference = self.preference.borrow().clone();
        let utterance = Utterance::new(&text, &preference, &self.synth.voices());
        debug!(
            text = %utterance.text,
            voice = ?utterance.voice_id,
            language = %utterance.language_code,
            "speaking"
        );

        let synth = Arc::clone(&self.synth);
        self.current = Some(Playback {
            text,
            done: Box::pin(async move { synth.speak(utterance).await }),
        });
    }
}
