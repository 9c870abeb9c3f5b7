//! Device entity and the repository capability boundary.
//!
//! Durable device rows live in the external storage layer; this core only
//! reads and flips the liveness-relevant fields through `DeviceRepository`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A registered edge unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable internal id.
    pub id: String,
    /// External identifier (serial number, MAC, ...).
    pub external_id: String,
    /// Online flag as last evaluated by the liveness monitor.
    pub online: bool,
    /// Timestamp of the most recent heartbeat, if any.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Expected heartbeat interval in seconds.
    pub heartbeat_interval_secs: u32,
}

impl Device {
    /// Whether the last heartbeat is older than `threshold` as of `now`.
    /// A device that never sent a heartbeat is stale by definition.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        match self.last_heartbeat {
            Some(at) => now.signed_duration_since(at) > threshold,
            None => true,
        }
    }
}

/// Capability supplied by the excluded storage layer.
///
/// Lookups return `Option` rather than raising — "not found" is a value,
/// not an exception.
pub trait DeviceRepository: Send + Sync + 'static {
    fn get(&self, id: &str) -> Option<Device>;

    /// Record a heartbeat timestamp for `id`.
    fn update_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Flip the online flag for `id`.
    fn set_online(&self, id: &str, online: bool) -> Result<()>;

    /// All devices currently marked online — the sweep population.
    fn online_devices(&self) -> Vec<Device>;
}

/// In-memory `DeviceRepository`.
///
/// Stands in for the storage layer during bring-up and in tests, the way
/// the stub decoder stands in for the recognition engine. Production
/// deployments supply a repository backed by real storage.
#[derive(Default)]
pub struct MemoryDeviceRepository {
    devices: parking_lot::RwLock<std::collections::HashMap<String, Device>>,
}

impl MemoryDeviceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a device row.
    pub fn insert(&self, device: Device) {
        self.devices.write().insert(device.id.clone(), device);
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

impl DeviceRepository for MemoryDeviceRepository {
    fn get(&self, id: &str) -> Option<Device> {
        self.devices.read().get(id).cloned()
    }

    fn update_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(id)
            .ok_or_else(|| crate::error::WardenError::DeviceNotFound(id.to_string()))?;
        device.last_heartbeat = Some(at);
        Ok(())
    }

    fn set_online(&self, id: &str, online: bool) -> Result<()> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(id)
            .ok_or_else(|| crate::error::WardenError::DeviceNotFound(id.to_string()))?;
        device.online = online;
        Ok(())
    }

    fn online_devices(&self) -> Vec<Device> {
        self.devices
            .read()
            .values()
            .filter(|d| d.online)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn device(last_heartbeat: Option<DateTime<Utc>>) -> Device {
        Device {
            id: "dev-1".into(),
            external_id: "AA:BB:CC".into(),
            online: true,
            last_heartbeat,
            heartbeat_interval_secs: 30,
        }
    }

    #[test]
    fn fresh_heartbeat_is_not_stale() {
        let now = Utc::now();
        let d = device(Some(now - Duration::seconds(10)));
        assert!(!d.is_stale(now, Duration::seconds(60)));
    }

    #[test]
    fn old_heartbeat_is_stale() {
        let now = Utc::now();
        let d = device(Some(now - Duration::seconds(61)));
        assert!(d.is_stale(now, Duration::seconds(60)));
    }

    #[test]
    fn missing_heartbeat_is_stale() {
        assert!(device(None).is_stale(Utc::now(), Duration::seconds(60)));
    }

    #[test]
    fn memory_repository_round_trip() {
        let repo = MemoryDeviceRepository::new();
        assert!(repo.is_empty());
        repo.insert(device(None));

        let at = Utc::now();
        repo.update_heartbeat("dev-1", at).unwrap();
        repo.set_online("dev-1", true).unwrap();

        let stored = repo.get("dev-1").unwrap();
        assert_eq!(stored.last_heartbeat, Some(at));
        assert!(stored.online);
        assert_eq!(repo.online_devices().len(), 1);

        repo.set_online("dev-1", false).unwrap();
        assert!(repo.online_devices().is_empty());
    }

    #[test]
    fn memory_repository_rejects_unknown_ids() {
        let repo = MemoryDeviceRepository::new();
        assert!(repo.update_heartbeat("ghost", Utc::now()).is_err());
        assert!(repo.set_online("ghost", true).is_err());
        assert!(repo.get("ghost").is_none());
    }
}
