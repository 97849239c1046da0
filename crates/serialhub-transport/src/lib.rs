//! Serial port transport abstraction.
//!
//! Provides a unified byte stream over the ways a device reaches its
//! peripherals:
//! - Local serial devices (`/dev/ttyUSB0`, `COM3`) via the `serialport` crate
//! - Raw TCP serial bridges addressed as `socket://host:port`
//! - Unix socket pairs (tests and local simulators)
//!
//! This is the lowest layer of serialhub. Everything else builds on top of
//! the [`PortStream`] type provided here.

pub mod error;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use serial::{
    available_ports, open_port, Parity, PortAttributes, PortInfo, SystemPorts,
    DEFAULT_BAUDRATE, SOCKET_URL_PREFIX,
};
pub use traits::{PortOpener, PortStream};
