use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

#[derive(Debug, Default)]
struct RegistryState {
    online: HashSet<String>,
    /// connection id -> device channel
    on_duty: HashMap<String, String>,
}

/// Which connections are reachable and which device channel each has joined.
///
/// A connection is bound to at most one channel; a later join replaces the
/// earlier binding. Removing something that is not there is a no-op.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&self, conn: &str) {
        if self.lock().online.insert(conn.to_string()) {
            debug!(%conn, "connection online");
        }
    }

    /// Bind `conn` to `device`. Returns the channel it was previously bound to.
    pub fn on_join(&self, conn: &str, device: &str) -> Option<String> {
        let mut state = self.lock();
        state.online.insert(conn.to_string());
        let previous = state.on_duty.insert(conn.to_string(), device.to_string());
        info!(%conn, %device, "device joined");
        previous.filter(|prev| prev != device)
    }

    /// Drop the channel binding of `conn`. Returns whether one existed.
    pub fn on_leave(&self, conn: &str, device: &str) -> bool {
        let removed = self.lock().on_duty.remove(conn);
        if let Some(bound) = &removed {
            info!(%conn, %device, %bound, "device left");
        }
        removed.is_some()
    }

    /// Forget `conn` entirely.
    pub fn on_disconnect(&self, conn: &str) {
        let mut state = self.lock();
        state.online.remove(conn);
        if let Some(device) = state.on_duty.remove(conn) {
            info!(%conn, %device, "device disconnected");
        }
    }

    pub fn is_online(&self, conn: &str) -> bool {
        self.lock().online.contains(conn)
    }

    pub fn channel_of(&self, conn: &str) -> Option<String> {
        self.lock().on_duty.get(conn).cloned()
    }

    /// Connections currently bound to `device`, sorted.
    pub fn connections_in(&self, device: &str) -> Vec<String> {
        let state = self.lock();
        let mut conns: Vec<_> = state
            .on_duty
            .iter()
            .filter(|(_, bound)| bound.as_str() == device)
            .map(|(conn, _)| conn.clone())
            .collect();
        conns.sort();
        conns
    }

    pub fn is_device_online(&self, device: &str) -> bool {
        self.lock().on_duty.values().any(|bound| bound == device)
    }

    /// Device channels with at least one member, sorted and deduplicated.
    pub fn devices(&self) -> Vec<String> {
        let state = self.lock();
        let mut devices: Vec<_> = state.on_duty.values().cloned().collect();
        devices.sort();
        devices.dedup();
        devices
    }

    pub fn online_count(&self) -> usize {
        self.lock().online.len()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
