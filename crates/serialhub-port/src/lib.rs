//! Port session lifecycle and device-side command routing.
//!
//! A device owns zero or more serial ports. Each attached port gets a
//! [`PortSession`]: a reader thread pushing bytes into a
//! [`LineProtocol`](serialhub_frame::LineProtocol) and a writer used by
//! enveloped commands. [`PortManager`] keys sessions by path, and
//! [`DeviceAgent`] turns hub actions (`ping`, `comports`, `repl`) into
//! manager calls and JSON replies.

pub mod agent;
pub mod command;
pub mod error;
pub mod manager;
pub mod session;

pub use agent::{AgentAction, DeviceAgent, INVALID_REQUEST};
pub use command::{
    resolve_timeout, ComportCommand, PortCommand, Reply, ReplRequest, DEFAULT_TIMEOUT,
};
pub use error::{PortError, Result};
pub use manager::{AttachedPort, PortManager};
pub use session::{PortSession, SessionConfig};
