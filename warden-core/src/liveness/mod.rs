//! Device liveness monitor.
//!
//! Online/offline is inferred from heartbeat recency, not from explicit
//! disconnect signals: a periodic sweep compares `now − last_heartbeat`
//! against the offline threshold for every device the repository still
//! marks online. Consistency is eventual and polling-based.
//!
//! The sweep worker is a blocking loop fed by a crossbeam tick channel;
//! a zero-capacity shutdown channel lets `stop()` interrupt it between
//! sweeps without a forced kill mid-transition.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceRepository};
use crate::error::{Result, WardenError};
use crate::events::{DeviceStatusEvent, RelayEvent};
use crate::relay::Relay;

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Interval between sweeps. Default: 30 s.
    pub sweep_interval: Duration,
    /// A device is offline once its heartbeat is older than this.
    /// Default: 60 s.
    pub offline_threshold: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            offline_threshold: Duration::from_secs(60),
        }
    }
}

/// Watches heartbeat recency and announces offline transitions through
/// the relay. `Send + Sync`; wrap in `Arc`.
pub struct LivenessMonitor {
    config: LivenessConfig,
    repo: Arc<dyn DeviceRepository>,
    relay: Arc<Relay>,
    /// Devices whose offline transition was already announced; cleared by
    /// a fresh heartbeat.
    notified: Mutex<HashSet<String>>,
    shutdown: Mutex<Option<Sender<()>>>,
}

impl LivenessMonitor {
    pub fn new(config: LivenessConfig, repo: Arc<dyn DeviceRepository>, relay: Arc<Relay>) -> Self {
        Self {
            config,
            repo,
            relay,
            notified: Mutex::new(HashSet::new()),
            shutdown: Mutex::new(None),
        }
    }

    /// Spawn the periodic sweep worker.
    ///
    /// # Errors
    /// [`WardenError::AlreadyRunning`] if the worker is already active.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut shutdown = self.shutdown.lock();
        if shutdown.is_some() {
            return Err(WardenError::AlreadyRunning);
        }
        let (tx, rx) = bounded::<()>(0);
        *shutdown = Some(tx);

        let monitor = Arc::clone(self);
        let ticker = tick(monitor.config.sweep_interval);
        tokio::task::spawn_blocking(move || {
            info!(
                sweep_interval_secs = monitor.config.sweep_interval.as_secs_f64(),
                offline_threshold_secs = monitor.config.offline_threshold.as_secs_f64(),
                "liveness sweep started"
            );
            loop {
                select! {
                    recv(ticker) -> _ => monitor.sweep(Utc::now()),
                    recv(rx) -> _ => break,
                }
            }
            info!("liveness sweep stopped");
        });
        Ok(())
    }

    /// Stop the sweep worker; an in-flight sweep completes first.
    ///
    /// # Errors
    /// [`WardenError::NotRunning`] if the worker is not active.
    pub fn stop(&self) -> Result<()> {
        match self.shutdown.lock().take() {
            // Dropping the sender disconnects the select arm.
            Some(_tx) => Ok(()),
            None => Err(WardenError::NotRunning),
        }
    }

    /// One pass over all online devices, flipping and announcing the
    /// stale ones. Public with an explicit `now` so tests can drive it
    /// without the worker.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let threshold = chrono::Duration::from_std(self.config.offline_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        for device in self.repo.online_devices() {
            if !device.is_stale(now, threshold) {
                continue;
            }
            if let Err(e) = self.repo.set_online(&device.id, false) {
                warn!(device_id = %device.id, error = %e, "failed to mark device offline");
                continue;
            }

            // Announce once per outage: repeated sweeps while the device
            // stays offline must not re-broadcast.
            let first_notice = self.notified.lock().insert(device.id.clone());
            if first_notice {
                info!(
                    device_id = %device.id,
                    last_heartbeat = ?device.last_heartbeat,
                    "device offline"
                );
                self.relay.broadcast_to_subscribers(
                    &device.id,
                    &RelayEvent::DeviceStatus(DeviceStatusEvent {
                        device_id: device.id.clone(),
                        online: false,
                        last_heartbeat: device.last_heartbeat,
                    }),
                );
            }
        }
    }

    /// Inbound heartbeat: update the timestamp and, if the device was
    /// offline, flip it back online immediately. Independent of the sweep.
    pub fn heartbeat(&self, device_id: &str, at: DateTime<Utc>) -> Result<Device> {
        let device = self
            .repo
            .get(device_id)
            .ok_or_else(|| WardenError::DeviceNotFound(device_id.to_string()))?;

        self.repo.update_heartbeat(device_id, at)?;
        if !device.online {
            self.repo.set_online(device_id, true)?;
            info!(device_id = %device_id, "device online (heartbeat)");
        }
        self.notified.lock().remove(device_id);
        debug!(device_id = %device_id, at = %at, "heartbeat recorded");

        self.repo
            .get(device_id)
            .ok_or_else(|| WardenError::DeviceNotFound(device_id.to_string()))
    }

    /// Repository passthrough for the status read surface.
    pub fn device_status(&self, device_id: &str) -> Option<Device> {
        self.repo.get(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::device::MemoryDeviceRepository;
    use crate::relay::CommandBus;

    struct NullBus;
    impl CommandBus for NullBus {
        fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn seed(repo: &MemoryDeviceRepository, id: &str, online: bool, last: Option<DateTime<Utc>>) {
        repo.insert(Device {
            id: id.to_string(),
            external_id: format!("ext-{id}"),
            online,
            last_heartbeat: last,
            heartbeat_interval_secs: 30,
        });
    }

    fn setup() -> (Arc<MemoryDeviceRepository>, Arc<Relay>, LivenessMonitor) {
        let repo = Arc::new(MemoryDeviceRepository::new());
        let relay = Arc::new(Relay::new(Arc::new(NullBus)));
        let monitor = LivenessMonitor::new(
            LivenessConfig::default(),
            Arc::clone(&repo) as Arc<dyn DeviceRepository>,
            Arc::clone(&relay),
        );
        (repo, relay, monitor)
    }

    #[test]
    fn stale_device_goes_offline_and_is_announced_once() {
        let (repo, relay, monitor) = setup();
        let now = Utc::now();
        seed(&repo, "dev-1", true, Some(now - chrono::Duration::seconds(120)));

        let (_, rx) = relay.attach("watcher");
        relay.subscribe("watcher", "dev-1");

        monitor.sweep(now);
        assert!(!repo.get("dev-1").unwrap().online);
        assert!(rx.try_recv().is_ok(), "first sweep announces");

        // The device stays stale (and something re-marked it online so it
        // appears in later sweep populations): still no second broadcast.
        seed(&repo, "dev-1", true, Some(now - chrono::Duration::seconds(120)));
        monitor.sweep(now);
        monitor.sweep(now);
        assert!(rx.try_recv().is_err(), "repeat sweeps stay silent");
    }

    #[test]
    fn fresh_device_stays_online() {
        let (repo, _, monitor) = setup();
        let now = Utc::now();
        seed(&repo, "dev-1", true, Some(now - chrono::Duration::seconds(10)));

        monitor.sweep(now);
        assert!(repo.get("dev-1").unwrap().online);
    }

    #[test]
    fn device_without_heartbeat_is_swept_offline() {
        let (repo, _, monitor) = setup();
        seed(&repo, "dev-1", true, None);

        monitor.sweep(Utc::now());
        assert!(!repo.get("dev-1").unwrap().online);
    }

    #[test]
    fn heartbeat_flips_offline_device_online_and_rearms_notification() {
        let (repo, relay, monitor) = setup();
        let now = Utc::now();
        seed(&repo, "dev-1", true, Some(now - chrono::Duration::seconds(120)));

        let (_, rx) = relay.attach("watcher");
        relay.subscribe("watcher", "dev-1");

        monitor.sweep(now);
        assert!(rx.try_recv().is_ok());

        let device = monitor.heartbeat("dev-1", now).unwrap();
        assert!(device.online);
        assert_eq!(device.last_heartbeat, Some(now));

        // Next outage announces again.
        let later = now + chrono::Duration::seconds(120);
        monitor.sweep(later);
        assert!(rx.try_recv().is_ok(), "new outage announced after recovery");
    }

    #[test]
    fn heartbeat_for_unknown_device_is_a_typed_error() {
        let (_, _, monitor) = setup();
        assert!(matches!(
            monitor.heartbeat("ghost", Utc::now()),
            Err(WardenError::DeviceNotFound(_))
        ));
    }
}
