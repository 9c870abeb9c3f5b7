//! Speech-recognition capability boundary.
//!
//! The `SpeechDecoder` trait decouples the session layer from any specific
//! engine (remote gRPC decoder, whisper-style local model, test stub).
//! The engine itself is an excluded collaborator: accept a waveform,
//! decode, return text.
//!
//! `&mut self` on `decode` intentionally expresses that decoders are
//! stateful — caches, hidden states, warm sessions. All mutation is
//! serialised through `DecoderHandle`'s `parking_lot::Mutex`.

pub mod stub;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::AudioFrame;
use crate::error::Result;

/// Contract for speech recognition backends.
pub trait SpeechDecoder: Send + 'static {
    /// Decode a mono f32 waveform into text.
    ///
    /// # Errors
    /// An error is fatal to the session that submitted the waveform, and
    /// to that session only.
    fn decode(&mut self, audio: &AudioFrame) -> Result<String>;

    /// Reset internal state (e.g. between sessions).
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `SpeechDecoder` implementor.
#[derive(Clone)]
pub struct DecoderHandle(pub Arc<Mutex<dyn SpeechDecoder>>);

impl DecoderHandle {
    /// Wrap any `SpeechDecoder` in a `DecoderHandle`.
    pub fn new<D: SpeechDecoder>(decoder: D) -> Self {
        Self(Arc::new(Mutex::new(decoder)))
    }
}

impl std::fmt::Debug for DecoderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderHandle").finish_non_exhaustive()
    }
}
