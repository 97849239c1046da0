use std::time::Duration;

/// Errors that can occur while exchanging enveloped commands.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// No event arrived within the per-command timeout.
    #[error("Timeout with no response after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The protocol configuration cannot frame lines.
    #[error("invalid protocol config: {0}")]
    InvalidConfig(String),

    /// An I/O error occurred while writing the envelope.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The port stopped accepting bytes or was closed.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
