//! Publish/subscribe relay between the device-facing channel and client
//! subscribers.
//!
//! Two maps under one coarse mutex: subscriber → open channels, and
//! device → interested subscriber ids. Map mutation never suspends and
//! never performs I/O; fan-out uses bounded `try_send`, so one broken or
//! lagging connection can never block delivery to the others.

pub mod topic;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::RelayEvent;

/// Per-channel buffer: a subscriber more than this many events behind is
/// treated as broken and evicted.
pub const CLIENT_CHANNEL_CAP: usize = 64;

/// Receiving half handed to the subscriber's connection handler.
pub type ClientReceiver = Receiver<RelayEvent>;

/// Transport capability for the device-facing channel (MQTT-style).
pub trait CommandBus: Send + Sync + 'static {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// Command published to a device-addressed topic.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceCommand<'a> {
    command_type: &'a str,
    action: &'a str,
    params: &'a serde_json::Value,
    correlation_id: &'a str,
    timestamp: DateTime<Utc>,
}

struct ClientChannel {
    id: u64,
    tx: Sender<RelayEvent>,
}

#[derive(Default)]
struct Interests {
    /// subscriber id → open channels.
    channels: HashMap<String, Vec<ClientChannel>>,
    /// device id → interested subscriber ids.
    devices: HashMap<String, HashSet<String>>,
}

impl Interests {
    /// Drop every trace of a subscriber: its channels and all of its
    /// device interests (no dangling empty sets).
    fn evict_subscriber(&mut self, subscriber: &str) {
        self.channels.remove(subscriber);
        self.devices.retain(|_, subs| {
            subs.remove(subscriber);
            !subs.is_empty()
        });
    }
}

/// The relay service. `Send + Sync`; wrap in `Arc` and share.
pub struct Relay {
    inner: parking_lot::Mutex<Interests>,
    bus: Arc<dyn CommandBus>,
    next_channel_id: AtomicU64,
}

impl Relay {
    pub fn new(bus: Arc<dyn CommandBus>) -> Self {
        Self {
            inner: parking_lot::Mutex::new(Interests::default()),
            bus,
            next_channel_id: AtomicU64::new(0),
        }
    }

    /// Open a new channel for `subscriber`. Returns the channel id (for
    /// `disconnect`) and the receiving half.
    pub fn attach(&self, subscriber: &str) -> (u64, ClientReceiver) {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(CLIENT_CHANNEL_CAP);
        self.inner
            .lock()
            .channels
            .entry(subscriber.to_string())
            .or_default()
            .push(ClientChannel { id, tx });
        debug!(subscriber = %subscriber, channel = id, "channel attached");
        (id, rx)
    }

    /// Remove one channel. When it was the subscriber's last channel, the
    /// subscriber is dropped from every device interest set.
    pub fn disconnect(&self, subscriber: &str, channel_id: u64) {
        let mut inner = self.inner.lock();
        if let Some(channels) = inner.channels.get_mut(subscriber) {
            channels.retain(|c| c.id != channel_id);
            if channels.is_empty() {
                inner.evict_subscriber(subscriber);
                info!(subscriber = %subscriber, "last channel closed — subscriptions dropped");
            }
        }
    }

    /// Register interest of `subscriber` in `device`. Idempotent.
    pub fn subscribe(&self, subscriber: &str, device: &str) {
        let mut inner = self.inner.lock();
        inner
            .devices
            .entry(device.to_string())
            .or_default()
            .insert(subscriber.to_string());
        debug!(subscriber = %subscriber, device = %device, "subscribed");
    }

    /// Remove interest. Idempotent; the device entry disappears with its
    /// last subscriber.
    pub fn unsubscribe(&self, subscriber: &str, device: &str) {
        let mut inner = self.inner.lock();
        if let Some(subs) = inner.devices.get_mut(device) {
            subs.remove(subscriber);
            if subs.is_empty() {
                inner.devices.remove(device);
            }
        }
        debug!(subscriber = %subscriber, device = %device, "unsubscribed");
    }

    /// Deliver `event` to every channel of every subscriber interested in
    /// `device`. Returns the number of channels that received it.
    ///
    /// A channel whose `try_send` fails (closed, or lagging past its
    /// buffer) is removed; a subscriber left with no channels loses all
    /// interests. Failure on one channel never blocks the others.
    pub fn broadcast_to_subscribers(&self, device: &str, event: &RelayEvent) -> usize {
        let mut inner = self.inner.lock();

        let interested: Vec<String> = match inner.devices.get(device) {
            Some(subs) => subs.iter().cloned().collect(),
            None => return 0,
        };

        let mut delivered = 0usize;
        let mut dead_subscribers = Vec::new();

        for subscriber in &interested {
            let Some(channels) = inner.channels.get_mut(subscriber) else {
                // Interest without channels — stale entry, clean it up.
                dead_subscribers.push(subscriber.clone());
                continue;
            };
            channels.retain(|channel| match channel.tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(e) => {
                    warn!(
                        subscriber = %subscriber,
                        channel = channel.id,
                        error = %e,
                        "subscriber channel failed — removing"
                    );
                    false
                }
            });
            if channels.is_empty() {
                dead_subscribers.push(subscriber.clone());
            }
        }

        for subscriber in dead_subscribers {
            inner.evict_subscriber(&subscriber);
        }

        delivered
    }

    /// Fire-and-forget command dispatch: publish to the device-addressed
    /// topic and return the correlation id without waiting for an
    /// acknowledgment (acks arrive on the inbound channel and are logged).
    pub fn send_command(
        &self,
        device: &str,
        command_type: &str,
        action: &str,
        params: &serde_json::Value,
    ) -> Result<String> {
        let correlation_id = new_correlation_id();
        let command = DeviceCommand {
            command_type,
            action,
            params,
            correlation_id: &correlation_id,
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_vec(&command)
            .map_err(|e| crate::error::WardenError::CommandBus(e.to_string()))?;
        let command_topic = format!("devices/{device}/command");
        self.bus.publish(&command_topic, &payload)?;
        info!(
            device = %device,
            command_type = %command_type,
            action = %action,
            correlation_id = %correlation_id,
            "command dispatched"
        );
        Ok(correlation_id)
    }

    /// Subscribers currently interested in `device` (diagnostics).
    pub fn interest_count(&self, device: &str) -> usize {
        self.inner
            .lock()
            .devices
            .get(device)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Open channel count for `subscriber` (diagnostics).
    pub fn channel_count(&self, subscriber: &str) -> usize {
        self.inner
            .lock()
            .channels
            .get(subscriber)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

fn new_correlation_id() -> String {
    let id: u128 = rand::thread_rng().gen();
    format!("{id:032x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DeviceStatusEvent, RelayEvent};
    use parking_lot::Mutex;

    struct RecordingBus {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingBus {
        fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandBus for RecordingBus {
        fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
            self.published.lock().push((topic.into(), payload.to_vec()));
            Ok(())
        }
    }

    fn relay() -> (Relay, Arc<RecordingBus>) {
        let bus = Arc::new(RecordingBus::new());
        let dyn_bus: Arc<dyn CommandBus> = bus.clone();
        (Relay::new(dyn_bus), bus)
    }

    fn status_event(device: &str) -> RelayEvent {
        RelayEvent::DeviceStatus(DeviceStatusEvent {
            device_id: device.into(),
            online: false,
            last_heartbeat: None,
        })
    }

    #[test]
    fn broadcast_reaches_interested_subscribers_only() {
        let (relay, _) = relay();
        let (_, rx_a) = relay.attach("alice");
        let (_, rx_b) = relay.attach("bob");
        relay.subscribe("alice", "dev-1");
        relay.subscribe("bob", "dev-2");

        let delivered = relay.broadcast_to_subscribers("dev-1", &status_event("dev-1"));
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn subscribe_is_idempotent() {
        let (relay, _) = relay();
        relay.subscribe("alice", "dev-1");
        relay.subscribe("alice", "dev-1");
        assert_eq!(relay.interest_count("dev-1"), 1);
    }

    #[test]
    fn unsubscribing_last_subscriber_removes_device_entry() {
        let (relay, _) = relay();
        relay.subscribe("alice", "dev-1");
        relay.unsubscribe("alice", "dev-1");
        assert_eq!(relay.interest_count("dev-1"), 0);
        // And broadcasting to it is a clean no-op.
        assert_eq!(
            relay.broadcast_to_subscribers("dev-1", &status_event("dev-1")),
            0
        );
    }

    #[test]
    fn broken_channel_does_not_block_other_subscribers() {
        let (relay, _) = relay();
        let (_, rx_a) = relay.attach("alice");
        let (_, rx_b) = relay.attach("bob");
        relay.subscribe("alice", "dev-1");
        relay.subscribe("bob", "dev-1");

        // Alice's connection dies.
        drop(rx_a);

        let delivered = relay.broadcast_to_subscribers("dev-1", &status_event("dev-1"));
        assert_eq!(delivered, 1);
        assert!(rx_b.try_recv().is_ok());
        // Alice lost her last channel, so her interest is gone too.
        assert_eq!(relay.interest_count("dev-1"), 1);
        assert_eq!(relay.channel_count("alice"), 0);
    }

    #[test]
    fn subscriber_with_second_channel_survives_one_failure() {
        let (relay, _) = relay();
        let (_, rx_dead) = relay.attach("alice");
        let (_, rx_live) = relay.attach("alice");
        relay.subscribe("alice", "dev-1");

        drop(rx_dead);
        let delivered = relay.broadcast_to_subscribers("dev-1", &status_event("dev-1"));
        assert_eq!(delivered, 1);
        assert!(rx_live.try_recv().is_ok());
        assert_eq!(relay.interest_count("dev-1"), 1);
        assert_eq!(relay.channel_count("alice"), 1);
    }

    #[test]
    fn disconnecting_last_channel_drops_all_interests() {
        let (relay, _) = relay();
        let (id, _rx) = relay.attach("alice");
        relay.subscribe("alice", "dev-1");
        relay.subscribe("alice", "dev-2");

        relay.disconnect("alice", id);
        assert_eq!(relay.interest_count("dev-1"), 0);
        assert_eq!(relay.interest_count("dev-2"), 0);
    }

    #[test]
    fn send_command_publishes_with_correlation_id() {
        let (relay, bus) = relay();
        let params = serde_json::json!({"volume": 7});
        let correlation_id = relay
            .send_command("dev-9", "control", "set_volume", &params)
            .unwrap();
        assert_eq!(correlation_id.len(), 32);

        let published = bus.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "devices/dev-9/command");

        let body: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(body["commandType"], "control");
        assert_eq!(body["action"], "set_volume");
        assert_eq!(body["params"]["volume"], 7);
        assert_eq!(body["correlationId"], correlation_id.as_str());
    }

    #[test]
    fn correlation_ids_are_unique() {
        let (relay, _) = relay();
        let params = serde_json::json!({});
        let a = relay.send_command("d", "control", "ping", &params).unwrap();
        let b = relay.send_command("d", "control", "ping", &params).unwrap();
        assert_ne!(a, b);
    }
}
