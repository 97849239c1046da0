//! Command/response correlation between a hub and the serial peripherals of
//! remote devices.
//!
//! # Crate Structure
//!
//! - [`transport`] - Serial byte streams (device paths, `socket://` bridges)
//! - [`frame`] - Line framing with BEGIN/END batch envelopes
//! - [`port`] - Port session lifecycle and device-side action routing
//! - [`broker`] - Device registry and request/response correlation (behind
//!   `broker` feature)

/// Re-export transport types.
pub mod transport {
    pub use serialhub_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use serialhub_frame::*;
}

/// Re-export port types.
pub mod port {
    pub use serialhub_port::*;
}

/// Re-export broker types (requires `broker` feature).
#[cfg(feature = "broker")]
pub mod broker {
    pub use serialhub_broker::*;
}
