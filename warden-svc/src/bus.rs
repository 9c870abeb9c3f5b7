//! Logging command bus.
//!
//! Stands in for the externally-supplied MQTT-style transport so the full
//! dispatch path can be exercised end-to-end before the real broker is
//! wired in — the same role the stub decoder plays for the engine.

use tracing::info;

use warden_core::{CommandBus, Result};

#[derive(Default)]
pub struct LogCommandBus;

impl LogCommandBus {
    pub fn new() -> Self {
        Self
    }
}

impl CommandBus for LogCommandBus {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        info!(
            topic = %topic,
            payload = %String::from_utf8_lossy(payload),
            "command bus publish"
        );
        Ok(())
    }
}
