//! Energy-based VAD using a short-term RMS threshold.
//!
//! One window, one decision: RMS ≥ `threshold` → `Speech`, otherwise
//! `Silence`. Tolerance for short silent gaps inside an utterance is the
//! segmenter's job (its consecutive-silence window), so this detector stays
//! stateless and threshold-tunable per deployment.

use super::{VadDecision, VoiceActivityDetector};
use crate::audio::AudioFrame;

/// A simple energy-based voice activity detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS amplitude threshold. Windows at or above this are speech.
    /// Typical range: 0.01–0.05 for a quiet microphone.
    threshold: f32,
}

impl EnergyVad {
    /// Create a new `EnergyVad`.
    ///
    /// # Parameters
    /// - `threshold`: RMS level above which a window is considered speech.
    ///   Default: `0.02`.
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Compute the root-mean-square of a sample slice.
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, frame: &AudioFrame) -> VadDecision {
        if Self::rms(&frame.samples) >= self.threshold {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_frame(len: usize) -> AudioFrame {
        AudioFrame::new(vec![0.0f32; len], 16000)
    }

    fn loud_frame(amplitude: f32, len: usize) -> AudioFrame {
        AudioFrame::new(vec![amplitude; len], 16000)
    }

    #[test]
    fn silence_below_threshold() {
        let mut vad = EnergyVad::new(0.02);
        assert_eq!(vad.classify(&silent_frame(320)), VadDecision::Silence);
    }

    #[test]
    fn speech_above_threshold() {
        let mut vad = EnergyVad::new(0.02);
        assert_eq!(vad.classify(&loud_frame(0.5, 320)), VadDecision::Speech);
    }

    #[test]
    fn empty_frame_is_silence() {
        let mut vad = EnergyVad::default();
        assert_eq!(
            vad.classify(&AudioFrame::new(vec![], 16000)),
            VadDecision::Silence
        );
    }

    #[test]
    fn rms_of_square_wave() {
        // A square wave at ±0.5 has RMS = 0.5
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let rms = EnergyVad::rms(&samples);
        assert!((rms - 0.5).abs() < 1e-5, "rms={rms}");
    }
}
