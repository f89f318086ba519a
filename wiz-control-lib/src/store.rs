//! Shared device registry.
//!
//! Owned store passed by handle to both the discovery orchestrator and the
//! command dispatcher. Records are replaced as whole units under the map's
//! per-shard lock, so a reader never observes a half-updated device. The
//! embedding front-end consumes point-in-time snapshots or subscribes to the
//! `watch` channel for push-based change notification.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use log::debug;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::util::discovery::DiscoveredDevice;
use crate::util::parse::DeviceState;

pub struct DeviceStore {
    devices: DashMap<Ipv4Addr, DiscoveredDevice>,

    /// Full snapshot, rebuilt on mutation, ordered by IP.
    snapshot: watch::Sender<Arc<Vec<DiscoveredDevice>>>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        DeviceStore {
            devices: DashMap::new(),
            snapshot,
        }
    }

    /// Inserts a freshly discovered device, or folds it into the existing
    /// record: identity fields fill in if they were unknown, state fields
    /// last-write-win, extras accumulate. Returns `true` if the IP was new.
    pub fn upsert(&self, found: DiscoveredDevice) -> bool {
        let is_new = match self.devices.entry(found.ip) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let device = entry.get_mut();
                if found.mac.is_some() {
                    device.mac = found.mac;
                }
                if found.module_name.is_some() {
                    device.module_name = found.module_name;
                }
                device.state.merge_from(&found.state);
                device.extra.extend(found.extra);
                device.last_seen = found.last_seen;
                false
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                debug!("New device at {}", found.ip);
                entry.insert(found);
                true
            }
        };
        self.rebuild_snapshot();
        is_new
    }

    /// Folds a state update from a command or status response into the
    /// record for `ip`, creating the record if the device was addressed
    /// directly without prior discovery.
    pub fn record_state(&self, ip: Ipv4Addr, state: &DeviceState, extra: Map<String, Value>) {
        {
            let mut device = self
                .devices
                .entry(ip)
                .or_insert_with(|| DiscoveredDevice::new(ip));
            device.state.merge_from(state);
            device.extra.extend(extra);
            device.last_seen = Utc::now();
        }
        self.rebuild_snapshot();
    }

    /// Drops devices that stopped responding: everything not in `seen`.
    /// Called after a full sweep; device lists do not persist across runs,
    /// so absence from discovery is the retirement signal.
    pub fn retire_missing(&self, seen: &HashSet<Ipv4Addr>) {
        let before = self.devices.len();
        self.devices.retain(|ip, _| seen.contains(ip));
        if self.devices.len() != before {
            debug!("Retired {} unresponsive device(s)", before - self.devices.len());
        }
        self.rebuild_snapshot();
    }

    pub fn get(&self, ip: Ipv4Addr) -> Option<DiscoveredDevice> {
        self.devices.get(&ip).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Current snapshot, ordered by IP. Cheap `Arc` clone.
    pub fn snapshot(&self) -> Arc<Vec<DiscoveredDevice>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot updates. The receiver is notified on every
    /// store mutation; the front-end re-renders from the new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<DiscoveredDevice>>> {
        self.snapshot.subscribe()
    }

    fn rebuild_snapshot(&self) {
        let mut devices: Vec<DiscoveredDevice> =
            self.devices.iter().map(|r| r.value().clone()).collect();
        devices.sort_by_key(|d| d.ip);
        self.snapshot.send_replace(Arc::new(devices));
    }
}
