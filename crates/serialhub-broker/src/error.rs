use std::time::Duration;

/// Errors from a session store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Session ids must be usable as plain keys and file names.
    #[error("invalid session id: {0:?}")]
    InvalidId(String),

    /// I/O error in a file-backed store.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur in broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// No response arrived before the deadline.
    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// A zero timeout can never be satisfied.
    #[error("invalid timeout: {0:?}")]
    InvalidTimeout(Duration),

    /// The message could not be handed to the pub/sub layer.
    #[error("publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    /// Persisted mode was used on a broker without a session store.
    #[error("no session store configured")]
    NoSessionStore,

    /// The session id is not (or no longer) in the store.
    #[error("session not exist or expired")]
    UnknownSession(String),

    /// Session store backend error.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_texts() {
        assert_eq!(
            BrokerError::Timeout(Duration::from_secs(5)).to_string(),
            "request timed out after 5s"
        );
        assert_eq!(
            BrokerError::UnknownSession("abc".to_string()).to_string(),
            "session not exist or expired"
        );
    }
}
