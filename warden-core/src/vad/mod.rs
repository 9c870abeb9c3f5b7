//! Voice activity detection and utterance segmentation.
//!
//! The `VoiceActivityDetector` trait is the extensibility point: swap in
//! `EnergyVad` (default) or any future neural detector without touching the
//! segmenter. `UtteranceSegmenter` drives a detector over fixed analysis
//! windows and turns a continuous frame stream into discrete utterances.

pub mod energy;
pub mod segmenter;

pub use energy::EnergyVad;
pub use segmenter::{SegmenterConfig, SessionSummary, SpeechSegment, UtteranceSegmenter};

use crate::audio::AudioFrame;

/// Whether a given analysis window contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// The window contains speech energy above threshold.
    Speech,
    /// The window is silent (below threshold).
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Trait for all VAD implementations.
///
/// Implementors may be stateful (adaptive floors, hidden states, etc.).
pub trait VoiceActivityDetector: Send + 'static {
    /// Analyse one window and return a speech/silence decision.
    ///
    /// The frame's `sample_rate` should match whatever rate this detector
    /// was configured for. Resampling is the caller's responsibility.
    fn classify(&mut self, frame: &AudioFrame) -> VadDecision;

    /// Reset any internal state (e.g. between utterances).
    fn reset(&mut self);
}
