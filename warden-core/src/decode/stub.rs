//! `StubDecoder` — placeholder backend that echoes waveform metadata.
//!
//! Lets the full session → evaluation → delivery path be exercised
//! end-to-end before a real engine is wired in.

use tracing::debug;

use crate::audio::AudioFrame;
use crate::decode::SpeechDecoder;
use crate::error::Result;

/// Echo-style stub decoder.
pub struct StubDecoder {
    decode_count: u32,
}

impl StubDecoder {
    pub fn new() -> Self {
        Self { decode_count: 0 }
    }
}

impl Default for StubDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechDecoder for StubDecoder {
    fn decode(&mut self, audio: &AudioFrame) -> Result<String> {
        self.decode_count += 1;
        Ok(format!(
            "[stub #{}: {} samples @ {} Hz]",
            self.decode_count,
            audio.samples.len(),
            audio.sample_rate
        ))
    }

    fn reset(&mut self) {
        debug!("StubDecoder::reset");
    }
}
