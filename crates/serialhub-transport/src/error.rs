/// Errors that can occur in serial transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The serial device could not be opened (bad path, busy, permissions).
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: serialport::Error,
    },

    /// A `socket://` bridge could not be reached.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The host refused to enumerate its serial ports.
    #[error("failed to enumerate ports: {0}")]
    Enumerate(serialport::Error),

    /// The requested port attributes are not representable.
    #[error("invalid port attributes: {0}")]
    InvalidAttributes(String),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
