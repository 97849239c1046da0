//! Request/response correlation over publish/subscribe device channels.
//!
//! The hub publishes `{id, action, content}` to the channel a device has
//! joined and later receives `{request: {id, ..}, response}` back on a shared
//! event. [`Broker`] matches the two by id, either suspending the caller until
//! the response or a timeout ([`Broker::send`]) or recording a
//! [`SessionState`] that can be polled ([`Broker::send_async`]).
//!
//! [`DeviceRegistry`] tracks which connections are online and which device
//! channel each has joined; [`LocalBus`] is an in-process [`Publisher`] that
//! delivers to the members of a channel.

pub mod broker;
pub mod bus;
pub mod error;
pub mod message;
pub mod registry;
pub mod session;

pub use broker::{into_reply, Broker, BrokerConfig, DEFAULT_TIMEOUT};
pub use bus::{LocalBus, Publisher};
pub use error::{BrokerError, Result, StoreError};
pub use message::{OutboundMessage, ResponseMessage};
pub use registry::DeviceRegistry;
pub use session::{
    unix_now, DirSessionStore, MemorySessionStore, SessionState, SessionStatus, SessionStore,
};
