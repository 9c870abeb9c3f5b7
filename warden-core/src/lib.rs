//! # warden-core
//!
//! Real-time device telemetry and speech-event delivery core.
//!
//! ## Architecture
//!
//! ```text
//! audio frames → UtteranceSegmenter → SpeechDecoder::decode
//!                                           │
//!                                  KeywordMatcher / evaluator
//!                                           │
//!                     ┌─────────────────────┴──────────────┐
//!              DeliveryQueue → RemoteSink           Relay → subscribers
//!
//! heartbeats → LivenessMonitor → Relay → subscribers
//! commands   ← Relay ← subscribers (fire-and-forget, correlation id)
//! ```
//!
//! Segmentation is synchronous and frame-driven; everything that can
//! block on the network (remote-sink delivery, the liveness sweep) runs
//! on dedicated blocking workers. Map mutation in the relay never
//! suspends.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod alert;
pub mod audio;
pub mod decode;
pub mod delivery;
pub mod device;
pub mod engine;
pub mod error;
pub mod eval;
pub mod events;
pub mod liveness;
pub mod relay;
pub mod session;
pub mod vad;

// Convenience re-exports for downstream crates
pub use alert::{AlertPriority, AlertRecord, AlertStatus};
pub use audio::AudioFrame;
pub use decode::{stub::StubDecoder, DecoderHandle, SpeechDecoder};
pub use delivery::{metrics::MetricsSnapshot, DeliveryConfig, DeliveryQueue, RemoteSink};
pub use device::{Device, DeviceRepository, MemoryDeviceRepository};
pub use engine::{CoreConfig, WardenCore};
pub use error::{Result, WardenError};
pub use events::{AlertEvent, DeviceStatusEvent, RelayEvent, ResultEvent};
pub use liveness::{LivenessConfig, LivenessMonitor};
pub use relay::{ClientReceiver, CommandBus, Relay};
pub use session::{FinalizedUtterance, SessionManager, SessionSnapshot};
pub use vad::{SegmenterConfig, SessionSummary, UtteranceSegmenter, VoiceActivityDetector};
