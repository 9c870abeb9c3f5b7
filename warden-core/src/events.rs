//! Wire events fanned out to subscribers and to process-local taps.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so the
//! excluded API layer can forward them verbatim (WebSocket frames, SSE,
//! ...). Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::AlertPriority;

/// One recognized utterance, as delivered to subscribers and to the
/// remote sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEvent {
    pub device_id: String,
    pub session_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub duration_secs: f64,
    pub is_emergency: bool,
    pub keywords: Vec<String>,
}

/// A device liveness transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusEvent {
    pub device_id: String,
    pub online: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// An emergency alert raised from a recognized utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub alert_id: String,
    pub device_id: String,
    pub text: String,
    pub keywords: Vec<String>,
    pub priority: AlertPriority,
}

/// Envelope pushed down subscriber channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelayEvent {
    Result(ResultEvent),
    DeviceStatus(DeviceStatusEvent),
    Alert(AlertEvent),
}

impl RelayEvent {
    /// The device this event concerns — the fan-out key.
    pub fn device_id(&self) -> &str {
        match self {
            RelayEvent::Result(e) => &e.device_id,
            RelayEvent::DeviceStatus(e) => &e.device_id,
            RelayEvent::Alert(e) => &e.device_id,
        }
    }
}
