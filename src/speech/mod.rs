//! Reply side of a turn: sentence segmentation and ordered playback.

pub mod queue;
pub mod segmenter;
pub mod synth;

pub use queue::{SpeechEvent, SpeechQueue};
pub use segmenter::{SegmenterConfig, SentenceSegmenter};
pub use synth::{
    MockSynthesizer, SpeechSynthesizer, Utterance, VoiceDescriptor, VoicePreference,
    primary_subtag, same_primary_language,
};
