/// Errors that can occur in port session operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// No session is open on this path.
    #[error("{0} not attached")]
    NotAttached(String),

    /// The path is not open, or its reader has stopped.
    #[error("{0} connection dead")]
    ConnectionDead(String),

    /// The request payload could not be understood.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The reader thread could not be started.
    #[error("failed to start reader for {path}: {source}")]
    Spawn {
        path: String,
        source: std::io::Error,
    },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] serialhub_transport::TransportError),

    /// Framing error. Displayed bare so device replies carry the protocol text.
    #[error(transparent)]
    Frame(#[from] serialhub_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PortError>;
