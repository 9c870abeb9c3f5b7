//! Utterance segmentation state machine.
//!
//! ## States
//!
//! ```text
//! Idle ──start()──► Listening ──speech window──► Accumulating
//!                       ▲                             │
//!                       └──── silence ≥ threshold ────┘ (finalize)
//! ```
//!
//! Finalization trims the trailing silence run from the buffer, so an
//! utterance's duration is the speech span itself (±one analysis window).
//! Segments shorter than `min_speech_secs` are discarded silently.

use tracing::{debug, trace};

use crate::audio::AudioFrame;
use crate::error::{Result, WardenError};
use crate::vad::{VadDecision, VoiceActivityDetector};

/// Tuning surface for the segmenter. The two thresholds that matter per
/// deployment are `energy_threshold` and `silence_duration_secs`.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Sample rate of incoming frames (Hz). Default: 16000.
    pub sample_rate: u32,
    /// Analysis window length in samples. Default: 320 (20 ms at 16 kHz).
    pub window_samples: usize,
    /// RMS threshold above which a window is classified as speech.
    /// Default: 0.02.
    pub energy_threshold: f32,
    /// Consecutive silence after speech that finalizes the utterance.
    /// Default: 1.5 s.
    pub silence_duration_secs: f32,
    /// Minimum accumulated speech for a segment to be meaningful;
    /// shorter bursts are discarded. Default: 0.5 s.
    pub min_speech_secs: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_samples: 320,
            energy_threshold: 0.02,
            silence_duration_secs: 1.5,
            min_speech_secs: 0.5,
        }
    }
}

impl SegmenterConfig {
    fn silence_samples(&self) -> usize {
        (self.silence_duration_secs * self.sample_rate as f32) as usize
    }

    fn min_speech_samples(&self) -> usize {
        (self.min_speech_secs * self.sample_rate as f32) as usize
    }
}

/// One finalized span of detected speech awaiting decode.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// The buffered speech audio (trailing silence trimmed).
    pub audio: AudioFrame,
    /// Offset of the first speech sample from the start of the stream.
    pub start_offset_secs: f64,
}

impl SpeechSegment {
    pub fn duration_secs(&self) -> f64 {
        self.audio.duration_secs()
    }
}

/// Terminal summary returned by [`UtteranceSegmenter::stop`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionSummary {
    /// Number of segments finalized over the session.
    pub segment_count: usize,
    /// Total finalized speech duration in seconds.
    pub total_speech_secs: f64,
}

/// Result of stopping the segmenter: an optional force-finalized segment
/// plus the terminal summary.
#[derive(Debug)]
pub struct StopOutcome {
    pub segment: Option<SpeechSegment>,
    pub summary: SessionSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmenterState {
    Idle,
    Listening,
    Accumulating,
}

/// Segments a continuous audio stream into discrete utterances.
///
/// Driven externally frame-by-frame; never blocks internally. Frames
/// shorter than one analysis window are buffered until enough samples
/// accumulate before an energy decision is made.
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    vad: Box<dyn VoiceActivityDetector>,
    state: SegmenterState,
    /// Sub-window samples awaiting a full analysis window.
    pending: Vec<f32>,
    /// Accumulated utterance samples, including interior silence.
    speech_buf: Vec<f32>,
    /// Trailing consecutive-silence samples inside `speech_buf`.
    trailing_silence: usize,
    /// Total samples consumed from the stream.
    stream_pos: u64,
    segment_count: usize,
    total_speech_secs: f64,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig, vad: Box<dyn VoiceActivityDetector>) -> Self {
        Self {
            config,
            vad,
            state: SegmenterState::Idle,
            pending: Vec::new(),
            speech_buf: Vec::new(),
            trailing_silence: 0,
            stream_pos: 0,
            segment_count: 0,
            total_speech_secs: 0.0,
        }
    }

    /// Build a segmenter with the default [`EnergyVad`](crate::vad::EnergyVad).
    pub fn with_energy_vad(config: SegmenterConfig) -> Self {
        let vad = Box::new(crate::vad::EnergyVad::new(config.energy_threshold));
        Self::new(config, vad)
    }

    /// Transition Idle → Listening, clearing all buffers.
    ///
    /// # Errors
    /// [`WardenError::AlreadyListening`] if a session is already active —
    /// re-starting is an error, not a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SegmenterState::Idle {
            return Err(WardenError::AlreadyListening);
        }
        self.pending.clear();
        self.speech_buf.clear();
        self.trailing_silence = 0;
        self.stream_pos = 0;
        self.segment_count = 0;
        self.total_speech_secs = 0.0;
        self.vad.reset();
        self.state = SegmenterState::Listening;
        debug!("segmenter listening");
        Ok(())
    }

    /// Feed raw samples into the segmenter.
    ///
    /// Returns any segments finalized by this frame — typically empty or a
    /// single element; a frame long enough to span several silence gaps may
    /// yield more.
    ///
    /// # Errors
    /// [`WardenError::NotListening`] if `start()` has not been called.
    pub fn push_frame(&mut self, samples: &[f32]) -> Result<Vec<SpeechSegment>> {
        if self.state == SegmenterState::Idle {
            return Err(WardenError::NotListening);
        }

        self.pending.extend_from_slice(samples);

        let window = self.config.window_samples;
        let mut finalized = Vec::new();

        while self.pending.len() >= window {
            let chunk: Vec<f32> = self.pending.drain(..window).collect();
            self.stream_pos += window as u64;

            let frame = AudioFrame::new(chunk, self.config.sample_rate);
            let decision = self.vad.classify(&frame);
            trace!(?decision, stream_pos = self.stream_pos, "window classified");

            match (self.state, decision) {
                (SegmenterState::Listening, VadDecision::Speech) => {
                    self.state = SegmenterState::Accumulating;
                    self.speech_buf.extend_from_slice(&frame.samples);
                    self.trailing_silence = 0;
                }
                (SegmenterState::Listening, VadDecision::Silence) => {}
                (SegmenterState::Accumulating, VadDecision::Speech) => {
                    // An interior silent gap became part of the utterance.
                    self.speech_buf.extend_from_slice(&frame.samples);
                    self.trailing_silence = 0;
                }
                (SegmenterState::Accumulating, VadDecision::Silence) => {
                    self.speech_buf.extend_from_slice(&frame.samples);
                    self.trailing_silence += frame.samples.len();
                    if self.trailing_silence >= self.config.silence_samples() {
                        if let Some(segment) = self.finalize() {
                            finalized.push(segment);
                        }
                        self.state = SegmenterState::Listening;
                    }
                }
                (SegmenterState::Idle, _) => unreachable!("guarded above"),
            }
        }

        Ok(finalized)
    }

    /// Force-finalize any non-trivial buffer, then return the terminal
    /// summary and transition to Idle.
    ///
    /// Stopping with nothing buffered and no segments returns an empty
    /// summary, not an error.
    pub fn stop(&mut self) -> Result<StopOutcome> {
        if self.state == SegmenterState::Idle {
            return Err(WardenError::NotListening);
        }

        let segment = if self.state == SegmenterState::Accumulating {
            self.finalize()
        } else {
            None
        };

        let summary = SessionSummary {
            segment_count: self.segment_count,
            total_speech_secs: self.total_speech_secs,
        };

        self.pending.clear();
        self.speech_buf.clear();
        self.trailing_silence = 0;
        self.vad.reset();
        self.state = SegmenterState::Idle;
        debug!(
            segment_count = summary.segment_count,
            total_speech_secs = summary.total_speech_secs,
            "segmenter stopped"
        );

        Ok(StopOutcome { segment, summary })
    }

    /// Segments finalized so far in this session.
    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    /// Whether the segmenter currently has an active session.
    pub fn is_listening(&self) -> bool {
        self.state != SegmenterState::Idle
    }

    /// Trim the trailing silence run and emit the utterance if it carries
    /// enough speech; short bursts are discarded silently.
    fn finalize(&mut self) -> Option<SpeechSegment> {
        let speech_len = self.speech_buf.len().saturating_sub(self.trailing_silence);
        let buffered = std::mem::take(&mut self.speech_buf);
        self.trailing_silence = 0;
        self.vad.reset();

        if speech_len < self.config.min_speech_samples() {
            debug!(
                samples = speech_len,
                min = self.config.min_speech_samples(),
                "segment too short — discarded"
            );
            return None;
        }

        let samples: Vec<f32> = buffered[..speech_len].to_vec();
        let start_sample = self.stream_pos.saturating_sub(buffered.len() as u64);
        let audio = AudioFrame::new(samples, self.config.sample_rate);
        let duration = audio.duration_secs();

        self.segment_count += 1;
        self.total_speech_secs += duration;
        debug!(
            segment = self.segment_count,
            duration_secs = duration,
            "utterance finalized"
        );

        Some(SpeechSegment {
            audio,
            start_offset_secs: start_sample as f64 / self.config.sample_rate as f64,
        })
    }
}
