use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::Publisher;
use crate::error::{BrokerError, Result};
use crate::message::{OutboundMessage, ResponseMessage};
use crate::session::{unix_now, SessionState, SessionStore};

/// Timeout applied when a caller does not pass one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    pub default_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

type PendingTable = Mutex<HashMap<String, oneshot::Sender<Value>>>;

/// Removes a waiter when its request finishes, times out, or is dropped.
struct WaiterGuard<'a> {
    pending: &'a PendingTable,
    id: String,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

/// Correlates requests published to device channels with their responses.
pub struct Broker<P> {
    publisher: P,
    config: BrokerConfig,
    pending: PendingTable,
    store: Option<Arc<dyn SessionStore>>,
    store_updates: Mutex<()>,
}

impl<P: Publisher> Broker<P> {
    pub fn new(publisher: P) -> Self {
        Self::with_config(publisher, BrokerConfig::default())
    }

    pub fn with_config(publisher: P, config: BrokerConfig) -> Self {
        Self {
            publisher,
            config,
            pending: Mutex::new(HashMap::new()),
            store: None,
            store_updates: Mutex::new(()),
        }
    }

    /// Enable persisted mode.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Number of callers currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Publish a request to `target` and wait for its response.
    ///
    /// `None` uses the configured default timeout. The waiter is removed
    /// whether the call resolves, times out, or the future is dropped.
    pub async fn send(
        &self,
        action: &str,
        content: Value,
        target: &str,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let timeout = self.resolve_timeout(timeout)?;
        let id = Uuid::new_v4().to_string();

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);
        let _guard = WaiterGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        let message = OutboundMessage {
            id,
            action: action.to_string(),
            content,
        };
        self.publisher.publish(target, &message)?;
        debug!(id = %message.id, %action, %target, "request published");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) | Err(_) => {
                warn!(id = %message.id, %action, %target, ?timeout, "request timed out");
                Err(BrokerError::Timeout(timeout))
            }
        }
    }

    /// Publish a request and record it in the session store without waiting.
    pub fn send_async(
        &self,
        action: &str,
        content: Value,
        target: &str,
        timeout: Option<Duration>,
    ) -> Result<SessionState> {
        let store = self.store.as_ref().ok_or(BrokerError::NoSessionStore)?;
        let timeout = self.resolve_timeout(timeout)?;
        let id = Uuid::new_v4().to_string();

        // Stored before publishing so a fast response always finds its record.
        let state = SessionState::sent(id.clone(), content.clone(), timeout.as_secs_f64());
        store.put(&state)?;

        let message = OutboundMessage {
            id,
            action: action.to_string(),
            content,
        };
        if let Err(err) = self.publisher.publish(target, &message) {
            if let Err(cleanup) = store.remove(&message.id) {
                warn!(id = %message.id, error = %cleanup, "failed to drop unsent session");
            }
            return Err(err);
        }
        debug!(id = %message.id, %action, %target, "request published (persisted)");
        Ok(state)
    }

    /// Read a persisted session.
    pub fn get_session(&self, id: &str) -> Result<SessionState> {
        let store = self.store.as_ref().ok_or(BrokerError::NoSessionStore)?;
        store
            .get(id)?
            .ok_or_else(|| BrokerError::UnknownSession(id.to_string()))
    }

    /// Deliver a device response. Returns whether anything was waiting for
    /// it; unknown, late and duplicate responses are dropped quietly.
    pub fn on_response(&self, message: &ResponseMessage) -> bool {
        let Some(id) = message.request_id() else {
            debug!("response without correlation id dropped");
            return false;
        };

        let mut matched = false;
        let waiter = lock(&self.pending).remove(id);
        if let Some(waiter) = waiter {
            matched = waiter.send(message.response.clone()).is_ok();
        }

        if let Some(store) = &self.store {
            let _serial = self
                .store_updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match store.respond(id, &message.response, unix_now()) {
                Ok(updated) => matched |= updated,
                Err(err) => warn!(%id, error = %err, "failed to record response"),
            }
        }

        if !matched {
            debug!(%id, "response for unknown or finished request dropped");
        }
        matched
    }

    fn resolve_timeout(&self, timeout: Option<Duration>) -> Result<Duration> {
        match timeout {
            None => Ok(self.config.default_timeout),
            Some(timeout) if timeout.is_zero() => Err(BrokerError::InvalidTimeout(timeout)),
            Some(timeout) => Ok(timeout),
        }
    }
}

/// Shape a broker result as the JSON the hub hands back to its caller.
pub fn into_reply(result: Result<Value>) -> Value {
    match result {
        Ok(response) => response,
        Err(err) => serde_json::json!({ "error": err.to_string() }),
    }
}

fn lock(pending: &PendingTable) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Value>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}
