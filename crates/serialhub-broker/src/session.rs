use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Seconds since the Unix epoch, with sub-second precision.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Sent,
    Responded,
}

/// Persisted record of one asynchronous request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session: String,
    pub request: Value,
    pub status: SessionStatus,
    pub send_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respond_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Seconds.
    pub timeout: f64,
}

impl SessionState {
    pub fn sent(session: impl Into<String>, request: Value, timeout: f64) -> Self {
        Self {
            session: session.into(),
            request,
            status: SessionStatus::Sent,
            send_time: unix_now(),
            respond_time: None,
            response: None,
            timeout,
        }
    }

    /// Record the response. Only the first call has any effect.
    pub fn respond(&mut self, response: Value, at: f64) -> bool {
        if self.status == SessionStatus::Responded {
            return false;
        }
        self.status = SessionStatus::Responded;
        self.respond_time = Some(at);
        self.response = Some(response);
        true
    }
}

/// Keyed storage for [`SessionState`] records.
pub trait SessionStore: Send + Sync {
    fn put(&self, state: &SessionState) -> StoreResult<()>;

    fn get(&self, id: &str) -> StoreResult<Option<SessionState>>;

    /// Remove a record. Returns whether it existed.
    fn remove(&self, id: &str) -> StoreResult<bool>;

    /// Move a `sent` record to `responded`. Returns false when the record is
    /// missing or already responded.
    fn respond(&self, id: &str, response: &Value, at: f64) -> StoreResult<bool> {
        let Some(mut state) = self.get(id)? else {
            return Ok(false);
        };
        if !state.respond(response.clone(), at) {
            return Ok(false);
        }
        self.put(&state)?;
        Ok(true)
    }
}

/// In-process store holding records as JSON documents.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for MemorySessionStore {
    fn put(&self, state: &SessionState) -> StoreResult<()> {
        let document = serde_json::to_string(state)?;
        self.lock().insert(state.session.clone(), document);
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<Option<SessionState>> {
        let document = self.lock().get(id).cloned();
        document
            .map(|document| serde_json::from_str(&document).map_err(StoreError::from))
            .transpose()
    }

    fn remove(&self, id: &str) -> StoreResult<bool> {
        Ok(self.lock().remove(id).is_some())
    }
}

/// Store keeping one `<id>.json` file per session under a directory, so
/// records survive a restart of the hub.
#[derive(Debug)]
pub struct DirSessionStore {
    root: PathBuf,
}

impl DirSessionStore {
    /// Open (and create if needed) the store directory.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "opened session directory");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> StoreResult<PathBuf> {
        let valid = !id.is_empty()
            && id.len() <= 128
            && id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(format!("{id}.json")))
    }
}

impl SessionStore for DirSessionStore {
    fn put(&self, state: &SessionState) -> StoreResult<()> {
        let path = self.path_for(&state.session)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(state)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<Option<SessionState>> {
        let path = self.path_for(id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn remove(&self, id: &str) -> StoreResult<bool> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "serialhub-sessions-{label}-{}-{nanos}",
            std::process::id()
        ))
    }

    fn exercise(store: &dyn SessionStore) {
        let state = SessionState::sent("abc-1", json!({"cmd": "list attached"}), 5.0);
        store.put(&state).unwrap();
        assert_eq!(store.get("abc-1").unwrap(), Some(state));

        assert!(store.respond("abc-1", &json!({"result": []}), 42.0).unwrap());
        assert!(!store.respond("abc-1", &json!("late"), 43.0).unwrap());

        let stored = store.get("abc-1").unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Responded);
        assert_eq!(stored.respond_time, Some(42.0));
        assert_eq!(stored.response, Some(json!({"result": []})));

        assert!(!store.respond("missing", &json!(1), 1.0).unwrap());
        assert!(store.remove("abc-1").unwrap());
        assert!(!store.remove("abc-1").unwrap());
        assert!(store.get("abc-1").unwrap().is_none());
    }

    #[test]
    fn memory_store() {
        let store = MemorySessionStore::new();
        exercise(&store);
        assert!(store.is_empty());
    }

    #[test]
    fn dir_store() {
        let root = temp_dir("dir");
        let store = DirSessionStore::open(&root).unwrap();
        exercise(&store);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn dir_store_survives_reopen() {
        let root = temp_dir("reopen");
        let state = SessionState::sent("keep", json!("ping"), 5.0);
        DirSessionStore::open(&root).unwrap().put(&state).unwrap();

        let reopened = DirSessionStore::open(&root).unwrap();
        assert_eq!(reopened.get("keep").unwrap(), Some(state));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn timestamps_survive_storage_exactly() {
        let root = temp_dir("floats");
        let dir = DirSessionStore::open(&root).unwrap();
        let memory = MemorySessionStore::new();
        let stores: [&dyn SessionStore; 2] = [&memory, &dir];

        // Sub-microsecond fractions are where lossy float parsing slips a ULP.
        let base = 1_792_402_173.0_f64;
        for i in 0..500u32 {
            let mut state = SessionState::sent(format!("t{i}"), json!("ping"), 5.0);
            state.send_time = base + f64::from(i) * 0.000_000_123_7 + 0.896_630_3;
            for store in stores {
                store.put(&state).unwrap();
                let loaded = store.get(&state.session).unwrap().unwrap();
                assert_eq!(loaded.send_time.to_bits(), state.send_time.to_bits());
            }
        }
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn dir_store_rejects_path_like_ids() {
        let root = temp_dir("ids");
        let store = DirSessionStore::open(&root).unwrap();
        for id in ["", "../escape", "a/b", "dot.dot"] {
            assert!(matches!(store.get(id), Err(StoreError::InvalidId(_))));
        }
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn state_wire_shape() {
        let mut state = SessionState::sent("s", json!("ping"), 5.0);
        state.send_time = 1.5;
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"session": "s", "request": "ping", "status": "sent", "send_time": 1.5, "timeout": 5.0})
        );
        state.respond(json!("pong"), 2.0);
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["status"], "responded");
        assert_eq!(value["response"], "pong");
    }
}
