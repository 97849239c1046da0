use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::message::OutboundMessage;
use crate::registry::DeviceRegistry;

/// Outbound side of the pub/sub link.
pub trait Publisher: Send + Sync {
    /// Deliver `message` to every member of `channel`. Returns how many
    /// members received it; an empty channel is not an error.
    fn publish(&self, channel: &str, message: &OutboundMessage) -> Result<usize>;
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish(&self, channel: &str, message: &OutboundMessage) -> Result<usize> {
        (**self).publish(channel, message)
    }
}

/// In-process pub/sub: channel membership comes from the registry, delivery
/// goes through one mailbox per connection.
#[derive(Debug)]
pub struct LocalBus {
    registry: Arc<DeviceRegistry>,
    mailboxes: Mutex<HashMap<String, mpsc::UnboundedSender<OutboundMessage>>>,
}

impl LocalBus {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            mailboxes: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Register a connection and return its mailbox.
    pub fn connect(&self, conn: &str) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(conn.to_string(), tx);
        self.registry.on_connect(conn);
        rx
    }

    pub fn join(&self, conn: &str, device: &str) {
        self.registry.on_join(conn, device);
    }

    pub fn leave(&self, conn: &str, device: &str) {
        self.registry.on_leave(conn, device);
    }

    pub fn disconnect(&self, conn: &str) {
        self.lock().remove(conn);
        self.registry.on_disconnect(conn);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<OutboundMessage>>> {
        self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Publisher for LocalBus {
    fn publish(&self, channel: &str, message: &OutboundMessage) -> Result<usize> {
        let members = self.registry.connections_in(channel);
        let mailboxes = self.lock();
        let delivered = members
            .iter()
            .filter_map(|conn| mailboxes.get(conn))
            .filter(|mailbox| mailbox.send(message.clone()).is_ok())
            .count();
        debug!(%channel, id = %message.id, action = %message.action, delivered, "published");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn message(id: &str) -> OutboundMessage {
        OutboundMessage {
            id: id.to_string(),
            action: "ping".to_string(),
            content: json!("ping"),
        }
    }

    #[test]
    fn delivers_to_channel_members_only() {
        let bus = LocalBus::new(Arc::new(DeviceRegistry::new()));
        let mut r1 = bus.connect("c1");
        let mut r2 = bus.connect("c2");
        bus.join("c1", "R-1");
        bus.join("c2", "R-2");

        assert_eq!(bus.publish("R-1", &message("a")).unwrap(), 1);
        assert_eq!(r1.try_recv().unwrap().id, "a");
        assert!(r2.try_recv().is_err());
    }

    #[test]
    fn empty_channel_is_not_an_error() {
        let bus = LocalBus::new(Arc::new(DeviceRegistry::new()));
        assert_eq!(bus.publish("nobody", &message("a")).unwrap(), 0);
    }

    #[test]
    fn leave_and_disconnect_stop_delivery() {
        let bus = LocalBus::new(Arc::new(DeviceRegistry::new()));
        let mut rx = bus.connect("c1");
        bus.join("c1", "R-1");
        bus.leave("c1", "R-1");
        assert_eq!(bus.publish("R-1", &message("a")).unwrap(), 0);

        bus.join("c1", "R-1");
        bus.disconnect("c1");
        assert_eq!(bus.publish("R-1", &message("b")).unwrap(), 0);
        assert!(rx.try_recv().is_err());
        assert!(!bus.registry().is_online("c1"));
    }

    #[test]
    fn dropped_mailbox_is_skipped() {
        let bus = LocalBus::new(Arc::new(DeviceRegistry::new()));
        drop(bus.connect("c1"));
        bus.join("c1", "R-1");
        assert_eq!(bus.publish("R-1", &message("a")).unwrap(), 0);
    }
}
