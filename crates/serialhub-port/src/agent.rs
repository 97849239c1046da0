use serde_json::Value;
use serialhub_transport::{PortOpener, SystemPorts};
use tracing::{debug, warn};

use crate::command::{PortCommand, Reply};
use crate::manager::PortManager;

/// Reply text for payloads that cannot be routed.
pub const INVALID_REQUEST: &str = "invalid request";

/// Hub actions a device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAction {
    Ping,
    Comports,
    Repl,
}

impl AgentAction {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ping" => Some(AgentAction::Ping),
            "comports" => Some(AgentAction::Comports),
            "repl" => Some(AgentAction::Repl),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentAction::Ping => "ping",
            AgentAction::Comports => "comports",
            AgentAction::Repl => "repl",
        }
    }
}

/// Device side of the hub link: routes actions to the port manager and
/// shapes the replies.
pub struct DeviceAgent<O: PortOpener = SystemPorts> {
    serial_number: String,
    ports: PortManager<O>,
}

impl DeviceAgent<SystemPorts> {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self::with_manager(serial_number, PortManager::new())
    }
}

impl<O: PortOpener> DeviceAgent<O> {
    pub fn with_manager(serial_number: impl Into<String>, ports: PortManager<O>) -> Self {
        Self {
            serial_number: serial_number.into(),
            ports,
        }
    }

    /// Channel this device joins on the hub.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn ports(&self) -> &PortManager<O> {
        &self.ports
    }

    /// Payload announced when joining the device channel.
    pub fn join_payload(&self) -> Value {
        serde_json::json!({ "serial_number": self.serial_number })
    }

    /// Handle one action and return its reply value.
    pub fn handle(&self, action: &str, content: Value) -> Value {
        debug!(device = %self.serial_number, action, "handling request");
        let Some(action) = AgentAction::parse(action) else {
            warn!(device = %self.serial_number, action, "unknown action");
            return Reply::error(INVALID_REQUEST).to_value();
        };

        let parsed = match action {
            AgentAction::Ping => return Value::String("pong".to_string()),
            AgentAction::Comports => PortCommand::from_comports(content),
            AgentAction::Repl => PortCommand::from_repl(content),
        };
        match parsed {
            Ok(command) => self.execute(command).to_value(),
            Err(err) => {
                debug!(error = %err, "rejected request payload");
                Reply::error(INVALID_REQUEST).to_value()
            }
        }
    }

    /// Build the `response` message for an inbound `{id, action, content}`.
    pub fn respond(&self, message: Value) -> Value {
        let action = message
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let content = message.get("content").cloned().unwrap_or(Value::Null);
        let response = self.handle(&action, content);
        serde_json::json!({ "request": message, "response": response })
    }

    /// Run a parsed port command.
    pub fn execute(&self, command: PortCommand) -> Reply {
        match command {
            PortCommand::ListAvailable => match self.ports.list_available() {
                Ok(ports) => to_reply(&ports),
                Err(err) => {
                    warn!(error = %err, "port enumeration failed");
                    Reply::error("Cannot list comports")
                }
            },
            PortCommand::ListAttached => to_reply(&self.ports.list_attached()),
            PortCommand::Connect {
                comport,
                attributes,
                protocol,
            } => match self.ports.connect(&comport, attributes, protocol) {
                Ok(()) => Reply::result(format!("{comport} connected successfully")),
                Err(err) => Reply::error(err.to_string()),
            },
            PortCommand::Close { comport } => match self.ports.close(&comport) {
                Ok(()) => Reply::result(format!("{comport} closed successfully")),
                Err(err) => Reply::error(err.to_string()),
            },
            PortCommand::Dispatch {
                comport,
                session,
                cmd,
                timeout,
            } => match self.ports.dispatch(&comport, &session, &cmd, timeout) {
                Ok(batch) => Reply::Ok {
                    result: Value::String(batch.result),
                    events: Some(batch.events),
                },
                Err(err) => Reply::error(err.to_string()),
            },
        }
    }
}

fn to_reply<T: serde::Serialize>(value: &T) -> Reply {
    match serde_json::to_value(value) {
        Ok(value) => Reply::result(value),
        Err(err) => Reply::error(err.to_string()),
    }
}
