//! Microphone side of a turn: capture, amplitude sampling and end-of-utterance
//! detection.

pub mod capture;
pub mod clock;
pub mod silence;

pub use capture::{
    AudioPayload, CaptureProbe, CaptureProvider, CaptureSession, CaptureStream,
    MockCaptureProvider,
};
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use silence::{
    AmplitudeSample, DetectorConfig, SilenceDecision, SilenceDetector, calculate_rms,
};
