//! Incremental sentence segmentation of a streamed reply.
//!
//! Text arrives in arbitrary chunks. A sentence is complete once a terminal
//! character (`.`, `?`, `!`) is followed by whitespace; the punctuation stays
//! with the sentence and the whitespace is consumed. Whatever follows the last
//! boundary is kept back because the next chunk may still extend it.

use crate::defaults;
use tracing::warn;

/// Configuration for the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterConfig {
    /// Retained fragment length (in chars) that forces an early emit.
    pub max_pending_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_pending_chars: defaults::MAX_PENDING_CHARS,
        }
    }
}

/// Splits a growing reply into complete, trimmed sentences.
#[derive(Debug, Clone, Default)]
pub struct SentenceSegmenter {
    config: SegmenterConfig,
    pending: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::with_config(SegmenterConfig::default())
    }

    pub fn with_config(config: SegmenterConfig) -> Self {
        Self {
            config,
            pending: String::new(),
        }
    }

    /// Appends a chunk and returns every sentence it completed, in order.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut segments = Vec::new();
        let mut consumed = 0;
        let mut chars = self.pending.char_indices().peekable();

        while let Some((index, c)) = chars.next() {
            if !is_terminal(c) {
                continue;
            }
            let sentence_end = index + c.len_utf8();
            let mut next_start = sentence_end;
            while let Some(&(ws_index, ws)) = chars.peek() {
                if !ws.is_whitespace() {
                    break;
                }
                next_start = ws_index + ws.len_utf8();
                chars.next();
            }
            if next_start > sentence_end {
                push_trimmed(&mut segments, &self.pending[consumed..sentence_end]);
                consumed = next_start;
            }
        }

        self.pending.drain(..consumed);

        if self.pending.chars().count() > self.config.max_pending_chars {
            self.split_overflow(&mut segments);
        }

        segments
    }

    /// Emits the trimmed remainder, if any, and resets the segmenter.
    pub fn flush(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.pending);
        let trimmed = remainder.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Discards anything retained without emitting it.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// The fragment currently held back.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// The retained fragment has no sentence boundary and has grown past the
    /// limit: speak it as one oversized segment, cut at its last whitespace
    /// so a word split across chunks stays intact.
    fn split_overflow(&mut self, segments: &mut Vec<String>) {
        let cut = self
            .pending
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .last()
            .map(|(index, c)| (index, index + c.len_utf8()));

        let emitted = match cut {
            Some((end, rest)) if !self.pending[..end].trim().is_empty() => {
                let head = self.pending[..end].to_string();
                self.pending.drain(..rest);
                head
            }
            _ => std::mem::take(&mut self.pending),
        };

        warn!(
            chars = emitted.chars().count(),
            limit = self.config.max_pending_chars,
            "reply fragment without sentence boundary, speaking it as one segment"
        );
        push_trimmed(segments, &emitted);
    }
}

fn is_terminal(c: char) -> bool {
    defaults::SENTENCE_TERMINALS.contains(&c)
}

fn push_trimmed(segments: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}
