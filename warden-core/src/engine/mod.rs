//! `WardenCore` — top-level lifecycle controller and exposed surface.
//!
//! ## Wiring
//!
//! ```text
//! WardenCore::new(config, decoder, repo, sink, bus)
//!     └─► start()     → delivery worker + liveness sweep spawned
//!         └─► ...     → sessions, ingest, subscriptions, commands
//!             └─► stop() → workers signalled, in-flight work abandoned
//! ```
//!
//! All collaborators are injected at construction: the speech decoder,
//! device repository, remote sink, and command bus are capabilities owned
//! by the caller, never globals. `start()`/`stop()` in the wrong state
//! return an error rather than panicking.
//!
//! ## Data flow
//!
//! ```text
//! frames ─► SessionManager ─► FinalizedUtterance ─► submit_result
//!                                  │                     │
//!                                  │          DeliveryQueue → RemoteSink
//!                                  └────────► Relay → subscribers
//! heartbeats ─► LivenessMonitor ─► Relay → subscribers
//! ```

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    alert::{AlertRecord, AlertRegistry, AlertStatus},
    decode::DecoderHandle,
    delivery::{metrics::MetricsSnapshot, DeliveryConfig, DeliveryQueue, RemoteSink},
    device::{Device, DeviceRepository},
    error::{Result, WardenError},
    eval::{keywords::DEFAULT_EMERGENCY_KEYWORDS, KeywordMatcher},
    events::{AlertEvent, DeviceStatusEvent, RelayEvent, ResultEvent},
    liveness::{LivenessConfig, LivenessMonitor},
    relay::{topic, ClientReceiver, CommandBus, Relay},
    session::{FinalizedUtterance, SessionManager, SessionSnapshot},
    vad::{SegmenterConfig, SessionSummary},
};

/// Broadcast tap capacity: 256 events buffered for slow local observers.
const TAP_CAP: usize = 256;

/// Configuration for all core services.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub segmenter: SegmenterConfig,
    pub delivery: DeliveryConfig,
    pub liveness: LivenessConfig,
    /// Emergency keyword list; empty falls back to the built-in corpus.
    pub emergency_keywords: Vec<String>,
    /// Optional recognition-quality reference phrases.
    pub reference_corpus: Vec<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            delivery: DeliveryConfig::default(),
            liveness: LivenessConfig::default(),
            emergency_keywords: Vec::new(),
            reference_corpus: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatMessage {
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AckMessage {
    correlation_id: Option<String>,
    status: Option<String>,
}

/// The top-level core handle.
///
/// `WardenCore` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<WardenCore>` to share between the API layer and
/// event-forwarding tasks.
pub struct WardenCore {
    relay: Arc<Relay>,
    delivery: Arc<DeliveryQueue>,
    liveness: Arc<LivenessMonitor>,
    sessions: SessionManager,
    alerts: AlertRegistry,
    /// `true` while the background workers are active.
    running: AtomicBool,
    alert_seq: AtomicU64,
    /// Process-local tap for device status transitions.
    status_tx: broadcast::Sender<DeviceStatusEvent>,
    /// Process-local tap for raised alerts.
    alert_tx: broadcast::Sender<AlertEvent>,
}

impl WardenCore {
    /// Construct the core with its injected capabilities. Does not spawn
    /// anything — call `start()`.
    pub fn new(
        config: CoreConfig,
        decoder: DecoderHandle,
        repo: Arc<dyn DeviceRepository>,
        sink: Arc<dyn RemoteSink>,
        bus: Arc<dyn CommandBus>,
    ) -> Self {
        let relay = Arc::new(Relay::new(bus));
        let delivery = Arc::new(DeliveryQueue::new(config.delivery.clone(), sink));
        let liveness = Arc::new(LivenessMonitor::new(
            config.liveness.clone(),
            repo,
            Arc::clone(&relay),
        ));

        let matcher = if config.emergency_keywords.is_empty() {
            KeywordMatcher::new(DEFAULT_EMERGENCY_KEYWORDS)
        } else {
            KeywordMatcher::new(&config.emergency_keywords)
        };
        let sessions = SessionManager::new(
            decoder,
            matcher,
            config.segmenter.clone(),
            config.reference_corpus.clone(),
        );

        let (status_tx, _) = broadcast::channel(TAP_CAP);
        let (alert_tx, _) = broadcast::channel(TAP_CAP);

        Self {
            relay,
            delivery,
            liveness,
            sessions,
            alerts: AlertRegistry::new(),
            running: AtomicBool::new(false),
            alert_seq: AtomicU64::new(0),
            status_tx,
            alert_tx,
        }
    }

    /// Spawn the delivery worker and the liveness sweep.
    ///
    /// # Errors
    /// [`WardenError::AlreadyRunning`] if already started.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WardenError::AlreadyRunning);
        }
        if let Err(e) = self.delivery.start() {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        if let Err(e) = self.liveness.start() {
            let _ = self.delivery.stop();
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!("warden core started");
        Ok(())
    }

    /// Stop both workers. In-flight deliveries are abandoned cleanly.
    ///
    /// # Errors
    /// [`WardenError::NotRunning`] if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(WardenError::NotRunning);
        }
        let _ = self.liveness.stop();
        let _ = self.delivery.stop();
        info!("warden core stopped");
        Ok(())
    }

    // ── Session control ──────────────────────────────────────────────────

    pub fn start_session(
        &self,
        device_id: &str,
        language: &str,
        vad_enabled: bool,
    ) -> Result<String> {
        self.sessions.start(device_id, language, vad_enabled)
    }

    /// Feed audio into a session; every finalized utterance is ingested
    /// (delivery + fan-out) before this returns.
    pub fn push_frame(
        &self,
        session_id: &str,
        samples: &[f32],
    ) -> Result<Vec<FinalizedUtterance>> {
        let utterances = self.sessions.push_frame(session_id, samples)?;
        for utterance in &utterances {
            if let Err(e) = self.submit_result(utterance.clone()) {
                // Capacity rejection: the record is gone but the stream
                // must keep flowing.
                warn!(session_id = %session_id, error = %e, "utterance ingest rejected");
            }
        }
        Ok(utterances)
    }

    pub fn stop_session(&self, session_id: &str) -> Result<SessionSummary> {
        let stop = self.sessions.stop(session_id)?;
        for utterance in stop.utterances {
            if let Err(e) = self.submit_result(utterance) {
                warn!(session_id = %session_id, error = %e, "final utterance ingest rejected");
            }
        }
        Ok(stop.summary)
    }

    pub fn session_status(&self, session_id: &str) -> Result<SessionSnapshot> {
        self.sessions.status(session_id)
    }

    // ── Event ingress ────────────────────────────────────────────────────

    /// Ingest one recognized-utterance record: enqueue it for remote
    /// delivery and fan it out to subscribers; emergencies additionally
    /// raise an alert.
    ///
    /// # Errors
    /// [`WardenError::QueueFull`] is the synchronous capacity reject; the
    /// subscriber fan-out has still happened by then. Eventual remote
    /// delivery is only observable through the metrics surface.
    pub fn submit_result(&self, utterance: FinalizedUtterance) -> Result<()> {
        let payload = ResultEvent {
            device_id: utterance.device_id.clone(),
            session_id: utterance.session_id.clone(),
            text: utterance.text.clone(),
            timestamp: utterance.timestamp,
            duration_secs: utterance.duration_secs,
            is_emergency: utterance.is_emergency,
            keywords: utterance.keywords.clone(),
        };

        let accepted = self.delivery.enqueue(payload.clone());
        self.relay
            .broadcast_to_subscribers(&payload.device_id, &RelayEvent::Result(payload.clone()));

        if payload.is_emergency {
            self.raise_alert(&payload, accepted.is_ok());
        }

        accepted
    }

    fn raise_alert(&self, payload: &ResultEvent, dispatched: bool) {
        let alert_id = format!("alert-{}", self.alert_seq.fetch_add(1, Ordering::Relaxed));
        let mut record = AlertRecord::new(
            alert_id.clone(),
            payload.device_id.clone(),
            payload.text.clone(),
            payload.keywords.clone(),
        );
        let status = if dispatched {
            AlertStatus::Sent
        } else {
            AlertStatus::Failed
        };
        if let Err(e) = record.transition(status) {
            warn!(alert_id = %alert_id, error = %e, "alert transition rejected");
        }
        info!(
            alert_id = %alert_id,
            device_id = %payload.device_id,
            priority = ?record.priority,
            keywords = ?payload.keywords,
            dispatched,
            "emergency alert raised"
        );

        let event = AlertEvent {
            alert_id: alert_id.clone(),
            device_id: payload.device_id.clone(),
            text: payload.text.clone(),
            keywords: payload.keywords.clone(),
            priority: record.priority,
        };
        self.alerts.insert(record);
        self.relay
            .broadcast_to_subscribers(&payload.device_id, &RelayEvent::Alert(event.clone()));
        let _ = self.alert_tx.send(event);
    }

    // ── Inbound device channel ───────────────────────────────────────────

    /// Route one inbound device-facing message. Malformed payloads are
    /// logged and discarded; this never fails the ingestion loop.
    pub fn handle_device_message(&self, message_topic: &str, payload: &[u8]) {
        if topic::matches("devices/+/heartbeat", message_topic) {
            let Some(device_id) = topic::segment(message_topic, 1) else {
                return;
            };
            let at = match parse_heartbeat(message_topic, payload) {
                Ok(at) => at,
                Err(e) => {
                    warn!(error = %e, "malformed heartbeat discarded");
                    return;
                }
            };
            match self.liveness.heartbeat(device_id, at) {
                Ok(device) => {
                    let _ = self.status_tx.send(DeviceStatusEvent {
                        device_id: device.id,
                        online: true,
                        last_heartbeat: device.last_heartbeat,
                    });
                }
                Err(e) => {
                    warn!(topic = %message_topic, error = %e, "heartbeat for unknown device discarded");
                }
            }
        } else if topic::matches("devices/+/ack", message_topic) {
            // Fire-and-forget dispatch: acknowledgments are logged with
            // their correlation id, not matched back to pending requests.
            match serde_json::from_slice::<AckMessage>(payload) {
                Ok(ack) => info!(
                    topic = %message_topic,
                    correlation_id = ack.correlation_id.as_deref().unwrap_or("unknown"),
                    status = ack.status.as_deref().unwrap_or(""),
                    "command acknowledged"
                ),
                Err(e) => {
                    warn!(topic = %message_topic, error = %e, "malformed ack discarded")
                }
            }
        } else {
            warn!(topic = %message_topic, bytes = payload.len(), "unhandled topic — message discarded");
        }
    }

    // ── Subscriptions & commands ─────────────────────────────────────────

    pub fn attach_subscriber(&self, subscriber: &str) -> (u64, ClientReceiver) {
        self.relay.attach(subscriber)
    }

    pub fn disconnect_subscriber(&self, subscriber: &str, channel_id: u64) {
        self.relay.disconnect(subscriber, channel_id)
    }

    pub fn subscribe(&self, subscriber: &str, device_id: &str) {
        self.relay.subscribe(subscriber, device_id)
    }

    pub fn unsubscribe(&self, subscriber: &str, device_id: &str) {
        self.relay.unsubscribe(subscriber, device_id)
    }

    /// Fire-and-forget device command; returns the correlation id.
    pub fn send_command(
        &self,
        device_id: &str,
        command_type: &str,
        action: &str,
        params: &serde_json::Value,
    ) -> Result<String> {
        self.relay.send_command(device_id, command_type, action, params)
    }

    // ── Read surface ─────────────────────────────────────────────────────

    pub fn delivery_metrics(&self) -> MetricsSnapshot {
        self.delivery.metrics_snapshot()
    }

    pub fn device_status(&self, device_id: &str) -> Option<Device> {
        self.liveness.device_status(device_id)
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.snapshot()
    }

    pub fn acknowledge_alert(&self, alert_id: &str, actor: &str) -> Result<AlertRecord> {
        self.alerts.acknowledge(alert_id, actor)
    }

    /// Subscribe to device status transitions observed by this process.
    pub fn subscribe_status(&self) -> broadcast::Receiver<DeviceStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to alerts raised by this process.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.alert_tx.subscribe()
    }
}

fn parse_heartbeat(message_topic: &str, payload: &[u8]) -> Result<DateTime<Utc>> {
    if payload.is_empty() {
        // Bare heartbeat pings are legal; arrival time is the timestamp.
        return Ok(Utc::now());
    }
    let message: HeartbeatMessage =
        serde_json::from_slice(payload).map_err(|e| WardenError::MalformedMessage {
            topic: message_topic.to_string(),
            reason: e.to_string(),
        })?;
    Ok(message.timestamp.unwrap_or_else(Utc::now))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::audio::AudioFrame;
    use crate::decode::SpeechDecoder;
    use crate::device::MemoryDeviceRepository;

    use parking_lot::Mutex;

    struct EchoDecoder(String);

    impl SpeechDecoder for EchoDecoder {
        fn decode(&mut self, _audio: &AudioFrame) -> Result<String> {
            Ok(self.0.clone())
        }
        fn reset(&mut self) {}
    }

    struct RecordingSink {
        posts: Mutex<Vec<ResultEvent>>,
    }

    impl RemoteSink for RecordingSink {
        fn post(&self, payload: &ResultEvent) -> Result<u16> {
            self.posts.lock().push(payload.clone());
            Ok(200)
        }
    }

    struct NullBus;

    impl CommandBus for NullBus {
        fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn core_with(text: &str, config: CoreConfig) -> (WardenCore, Arc<MemoryDeviceRepository>) {
        let repo = Arc::new(MemoryDeviceRepository::new());
        let core = WardenCore::new(
            config,
            DecoderHandle::new(EchoDecoder(text.into())),
            Arc::clone(&repo) as Arc<dyn DeviceRepository>,
            Arc::new(RecordingSink {
                posts: Mutex::new(Vec::new()),
            }),
            Arc::new(NullBus),
        );
        (core, repo)
    }

    fn utterance(device: &str, text: &str, keywords: Vec<String>) -> FinalizedUtterance {
        FinalizedUtterance {
            device_id: device.into(),
            session_id: "s-1".into(),
            text: text.into(),
            start_offset_secs: 0.0,
            duration_secs: 1.0,
            timestamp: Utc::now(),
            is_emergency: !keywords.is_empty(),
            keywords,
        }
    }

    #[test]
    fn submit_result_fans_out_and_raises_alert() {
        let (core, _) = core_with("ok", CoreConfig::default());
        let (_, rx) = core.attach_subscriber("watcher");
        core.subscribe("watcher", "dev-1");
        let mut alert_tap = core.subscribe_alerts();

        core.submit_result(utterance("dev-1", "도와줘", vec!["도와줘".into()]))
            .unwrap();

        let first = rx.try_recv().expect("result event");
        assert!(matches!(first, RelayEvent::Result(_)));
        let second = rx.try_recv().expect("alert event");
        match second {
            RelayEvent::Alert(alert) => {
                assert_eq!(alert.device_id, "dev-1");
            }
            other => panic!("expected alert event, got {other:?}"),
        }

        let tapped = alert_tap.try_recv().expect("alert tap");
        assert_eq!(tapped.device_id, "dev-1");

        let alerts = core.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Sent);
    }

    #[test]
    fn non_emergency_result_raises_no_alert() {
        let (core, _) = core_with("ok", CoreConfig::default());
        core.submit_result(utterance("dev-1", "날씨 알려줘", vec![]))
            .unwrap();
        assert!(core.alerts().is_empty());
    }

    #[test]
    fn queue_full_reject_is_synchronous_and_marks_alert_failed() {
        let config = CoreConfig {
            delivery: DeliveryConfig {
                capacity: 1,
                ..DeliveryConfig::default()
            },
            ..CoreConfig::default()
        };
        let (core, _) = core_with("ok", config);

        core.submit_result(utterance("dev-1", "first", vec![])).unwrap();
        let err = core
            .submit_result(utterance("dev-1", "도와줘", vec!["도와줘".into()]))
            .unwrap_err();
        assert!(matches!(err, WardenError::QueueFull));

        let alerts = core.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Failed);
    }

    #[test]
    fn heartbeat_message_updates_repo_and_emits_status() {
        let (core, repo) = core_with("ok", CoreConfig::default());
        repo.insert(Device {
            id: "dev-7".into(),
            external_id: "ext-7".into(),
            online: false,
            last_heartbeat: None,
            heartbeat_interval_secs: 30,
        });
        let mut status_tap = core.subscribe_status();

        core.handle_device_message("devices/dev-7/heartbeat", b"{}");

        let device = repo.get("dev-7").unwrap();
        assert!(device.online);
        assert!(device.last_heartbeat.is_some());

        let event = status_tap.try_recv().expect("status event");
        assert_eq!(event.device_id, "dev-7");
        assert!(event.online);
    }

    #[test]
    fn malformed_inbound_messages_are_discarded_quietly() {
        let (core, _) = core_with("ok", CoreConfig::default());
        // None of these may panic or error out.
        core.handle_device_message("devices/dev-7/heartbeat", b"not json");
        core.handle_device_message("devices/ghost/heartbeat", b"{}");
        core.handle_device_message("devices/dev-7/ack", b"\xff\xfe");
        core.handle_device_message("some/other/topic", b"{}");
    }

    #[test]
    fn ack_messages_are_logged_not_matched() {
        let (core, _) = core_with("ok", CoreConfig::default());
        core.handle_device_message(
            "devices/dev-7/ack",
            br#"{"correlationId":"abc123","status":"done"}"#,
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_and_stop_lifecycle_is_guarded() {
        let (core, _) = core_with("ok", CoreConfig::default());
        core.start().unwrap();
        assert!(matches!(core.start(), Err(WardenError::AlreadyRunning)));
        core.stop().unwrap();
        assert!(matches!(core.stop(), Err(WardenError::NotRunning)));
        // Restartable after stop.
        core.start().unwrap();
        core.stop().unwrap();
    }

    #[test]
    fn end_to_end_session_flow_reaches_the_queue() {
        let (core, _) = core_with("도와줘 사람이 쓰러졌어", CoreConfig::default());
        let (_, rx) = core.attach_subscriber("watcher");
        core.subscribe("watcher", "dev-1");

        let session = core.start_session("dev-1", "ko", true).unwrap();
        core.push_frame(&session, &vec![0.5f32; 16_000]).unwrap();
        let produced = core.push_frame(&session, &vec![0.0f32; 32_000]).unwrap();
        assert_eq!(produced.len(), 1);
        assert!(produced[0].is_emergency);

        // Worker not running: the record waits in the queue.
        assert_eq!(core.delivery_metrics().queue_depth, 1);
        assert!(rx.try_recv().is_ok());

        let summary = core.stop_session(&session).unwrap();
        assert_eq!(summary.segment_count, 1);
    }
}
