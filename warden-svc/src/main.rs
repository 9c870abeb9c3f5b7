//! Warden service entry point.
//!
//! Headless harness: loads settings, constructs the core with its
//! collaborators (HTTP sink, in-memory device repository, logging command
//! bus, stub decoder), starts the background workers, and runs until
//! ctrl-c. The HTTP/API layer and the real broker attach to the same
//! `WardenCore` handle in production deployments.

mod bus;
mod settings;
mod sink;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use warden_core::{
    CoreConfig, DecoderHandle, DeliveryConfig, Device, DeviceRepository, LivenessConfig,
    MemoryDeviceRepository, RemoteSink, SegmenterConfig, StubDecoder, WardenCore,
};

use bus::LogCommandBus;
use settings::{default_settings_path, load_settings};
use sink::HttpSink;

fn core_config(settings: &settings::AppSettings) -> CoreConfig {
    CoreConfig {
        segmenter: SegmenterConfig {
            sample_rate: settings.sample_rate,
            energy_threshold: settings.energy_threshold,
            silence_duration_secs: settings.silence_duration_secs,
            min_speech_secs: settings.min_speech_secs,
            ..SegmenterConfig::default()
        },
        delivery: DeliveryConfig {
            capacity: settings.queue_capacity,
            batch_size: settings.queue_batch_size,
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            ..DeliveryConfig::default()
        },
        liveness: LivenessConfig {
            sweep_interval: Duration::from_secs(settings.sweep_interval_secs),
            offline_threshold: Duration::from_secs(settings.offline_threshold_secs),
        },
        emergency_keywords: settings.emergency_keywords.clone(),
        reference_corpus: settings.reference_corpus.clone(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden=info".parse().unwrap()),
        )
        .init();

    info!("Warden starting");

    let settings_path = default_settings_path();
    let app_settings = load_settings(&settings_path);
    info!(
        settings_path = ?settings_path,
        sink_endpoint = %app_settings.sink_endpoint,
        queue_capacity = app_settings.queue_capacity,
        sweep_interval_secs = app_settings.sweep_interval_secs,
        offline_threshold_secs = app_settings.offline_threshold_secs,
        "runtime settings loaded"
    );

    // ── Collaborators ─────────────────────────────────────────────────────
    let sink: Arc<dyn RemoteSink> = Arc::new(
        HttpSink::new(
            &app_settings.sink_endpoint,
            Duration::from_secs(app_settings.sink_timeout_secs),
        )
        .context("constructing HTTP sink")?,
    );

    let repo = Arc::new(MemoryDeviceRepository::new());
    for seed in &app_settings.seed_devices {
        repo.insert(Device {
            id: seed.id.clone(),
            external_id: seed.external_id.clone(),
            online: false,
            last_heartbeat: None,
            heartbeat_interval_secs: seed.heartbeat_interval_secs,
        });
    }
    if !repo.is_empty() {
        info!(devices = repo.len(), "seed devices registered");
    }

    // TODO: swap StubDecoder for the gRPC decoder client once the engine
    // endpoint config lands in settings.
    let decoder = DecoderHandle::new(StubDecoder::new());

    let core = Arc::new(WardenCore::new(
        core_config(&app_settings),
        decoder,
        Arc::clone(&repo) as Arc<dyn DeviceRepository>,
        sink,
        Arc::new(LogCommandBus::new()),
    ));

    // ── Lifecycle ─────────────────────────────────────────────────────────
    core.start().context("starting core services")?;
    info!("warden running — ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");

    core.stop().context("stopping core services")?;
    info!("Warden stopped");
    Ok(())
}
