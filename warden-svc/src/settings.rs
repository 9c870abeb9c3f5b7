//! Persistent service settings (JSON file).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Remote sink endpoint for recognition results.
    pub sink_endpoint: String,
    pub sink_timeout_secs: u64,
    pub queue_capacity: usize,
    pub queue_batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub sweep_interval_secs: u64,
    pub offline_threshold_secs: u64,
    pub sample_rate: u32,
    pub energy_threshold: f32,
    pub silence_duration_secs: f32,
    pub min_speech_secs: f32,
    /// Deployment-specific emergency keywords; empty uses the built-ins.
    pub emergency_keywords: Vec<String>,
    /// Recognition-quality reference phrases (observability only).
    pub reference_corpus: Vec<String>,
    /// Devices registered at startup when no storage layer is attached.
    pub seed_devices: Vec<SeedDevice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedDevice {
    pub id: String,
    pub external_id: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u32,
}

fn default_heartbeat_interval() -> u32 {
    30
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            sink_endpoint: "http://127.0.0.1:8080/api/v1/recognition-results".into(),
            sink_timeout_secs: 10,
            queue_capacity: 1000,
            queue_batch_size: 10,
            max_retries: 3,
            retry_base_delay_ms: 500,
            sweep_interval_secs: 30,
            offline_threshold_secs: 60,
            sample_rate: 16_000,
            energy_threshold: 0.02,
            silence_duration_secs: 1.5,
            min_speech_secs: 0.5,
            emergency_keywords: Vec::new(),
            reference_corpus: Vec::new(),
            seed_devices: Vec::new(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.sink_endpoint = self.sink_endpoint.trim().to_string();
        if self.sink_endpoint.is_empty() {
            self.sink_endpoint = AppSettings::default().sink_endpoint;
        }
        self.sink_timeout_secs = self.sink_timeout_secs.clamp(1, 120);
        self.queue_capacity = self.queue_capacity.clamp(1, 100_000);
        self.queue_batch_size = self.queue_batch_size.clamp(1, self.queue_capacity);
        self.max_retries = self.max_retries.clamp(0, 10);
        self.retry_base_delay_ms = self.retry_base_delay_ms.clamp(10, 60_000);
        self.sweep_interval_secs = self.sweep_interval_secs.clamp(1, 3600);
        self.offline_threshold_secs = self.offline_threshold_secs.clamp(1, 86_400);
        self.sample_rate = self.sample_rate.clamp(8_000, 48_000);
        self.energy_threshold = self.energy_threshold.clamp(0.0001, 0.5);
        self.silence_duration_secs = self.silence_duration_secs.clamp(0.2, 10.0);
        self.min_speech_secs = self.min_speech_secs.clamp(0.1, 10.0);
        self.emergency_keywords = normalize_terms(&self.emergency_keywords);
        self.reference_corpus = normalize_terms(&self.reference_corpus);
        self.seed_devices.retain(|d| !d.id.trim().is_empty());
    }
}

fn normalize_terms(raw: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for term in raw {
        let normalized = term.trim();
        if normalized.is_empty() {
            continue;
        }
        if out.iter().any(|t: &String| t == normalized) {
            continue;
        }
        out.push(normalized.to_string());
        if out.len() >= 256 {
            break;
        }
    }
    out
}

pub fn default_settings_path() -> PathBuf {
    std::env::var_os("WARDEN_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("warden-settings.json"))
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
