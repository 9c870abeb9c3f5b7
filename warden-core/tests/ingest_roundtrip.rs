//! Full round trip: session audio → segmentation → decode → triage →
//! delivery worker → remote sink, with relay fan-out observed in parallel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use warden_core::{
    AudioFrame, CommandBus, CoreConfig, DecoderHandle, DeliveryConfig, Device, DeviceRepository,
    MemoryDeviceRepository, RelayEvent, RemoteSink, Result, ResultEvent, SpeechDecoder,
    WardenCore,
};

struct FixedDecoder(&'static str);

impl SpeechDecoder for FixedDecoder {
    fn decode(&mut self, _audio: &AudioFrame) -> Result<String> {
        Ok(self.0.to_string())
    }

    fn reset(&mut self) {}
}

#[derive(Default)]
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

fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) {
    let start = Instant::now();
    while !ready() {
        if start.elapsed() >= timeout {
            panic!("condition not reached within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn emergency_utterance_reaches_sink_and_subscribers() {
    let sink = Arc::new(RecordingSink::default());
    let repo = Arc::new(MemoryDeviceRepository::new());
    repo.insert(Device {
        id: "dev-1".into(),
        external_id: "ext-1".into(),
        online: true,
        last_heartbeat: None,
        heartbeat_interval_secs: 30,
    });

    let config = CoreConfig {
        delivery: DeliveryConfig {
            base_delay: Duration::from_millis(5),
            poll_interval: Duration::from_millis(5),
            ..DeliveryConfig::default()
        },
        ..CoreConfig::default()
    };

    let core = WardenCore::new(
        config,
        DecoderHandle::new(FixedDecoder("도와줘 사람이 쓰러졌어")),
        Arc::clone(&repo) as Arc<dyn DeviceRepository>,
        Arc::clone(&sink) as Arc<dyn RemoteSink>,
        Arc::new(NullBus),
    );
    core.start().expect("core starts");

    let (_, events) = core.attach_subscriber("operator-console");
    core.subscribe("operator-console", "dev-1");

    let session = core.start_session("dev-1", "ko", true).expect("session");

    // One second of speech, then enough silence to finalize.
    core.push_frame(&session, &vec![0.5f32; 16_000]).unwrap();
    let produced = core.push_frame(&session, &vec![0.0f32; 32_000]).unwrap();
    assert_eq!(produced.len(), 1);
    assert!(produced[0].is_emergency);

    // The drain worker delivers to the sink in the background.
    wait_until(Duration::from_secs(5), || !sink.posts.lock().is_empty());
    {
        let posts = sink.posts.lock();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].device_id, "dev-1");
        assert_eq!(posts[0].text, "도와줘 사람이 쓰러졌어");
        assert!(posts[0].is_emergency);
    }

    // Subscribers saw the result and the alert, in that order.
    let first = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(first, RelayEvent::Result(_)));
    let second = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(second, RelayEvent::Alert(_)));

    let metrics = core.delivery_metrics();
    assert_eq!(metrics.attempted, 1);
    assert_eq!(metrics.succeeded, 1);
    assert_eq!(metrics.queue_depth, 0);
    assert!(metrics.avg_latency_ms.is_some());

    let summary = core.stop_session(&session).expect("summary");
    assert_eq!(summary.segment_count, 1);

    core.stop().expect("core stops");
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_device_offline_is_announced_through_the_relay() {
    let repo = Arc::new(MemoryDeviceRepository::new());
    repo.insert(Device {
        id: "dev-2".into(),
        external_id: "ext-2".into(),
        online: true,
        last_heartbeat: Some(chrono::Utc::now() - chrono::Duration::seconds(300)),
        heartbeat_interval_secs: 30,
    });

    let config = CoreConfig {
        liveness: warden_core::LivenessConfig {
            sweep_interval: Duration::from_millis(20),
            offline_threshold: Duration::from_secs(60),
        },
        ..CoreConfig::default()
    };

    let core = WardenCore::new(
        config,
        DecoderHandle::new(FixedDecoder("")),
        Arc::clone(&repo) as Arc<dyn DeviceRepository>,
        Arc::new(RecordingSink::default()),
        Arc::new(NullBus),
    );

    let (_, events) = core.attach_subscriber("operator-console");
    core.subscribe("operator-console", "dev-2");

    core.start().expect("core starts");

    let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
    match event {
        RelayEvent::DeviceStatus(status) => {
            assert_eq!(status.device_id, "dev-2");
            assert!(!status.online);
        }
        other => panic!("expected device status, got {other:?}"),
    }
    assert!(!repo.get("dev-2").unwrap().online);

    // Recovery via heartbeat flips it back online immediately.
    core.handle_device_message("devices/dev-2/heartbeat", b"");
    assert!(repo.get("dev-2").unwrap().online);

    core.stop().expect("core stops");
}
