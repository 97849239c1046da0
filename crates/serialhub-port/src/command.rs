use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serialhub_frame::{ProtocolConfig, ProtocolEvent};
use serialhub_transport::PortAttributes;

use crate::error::{PortError, Result};

/// Timeout applied when a request does not carry one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Payload of a `comports` action, tagged by its `cmd` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd")]
pub enum ComportCommand {
    #[serde(rename = "list available")]
    ListAvailable,
    #[serde(rename = "list attached")]
    ListAttached,
    #[serde(rename = "connect")]
    Connect {
        comport: String,
        #[serde(default)]
        attributes: PortAttributes,
        #[serde(default)]
        protocol: ProtocolConfig,
    },
    #[serde(rename = "close")]
    Close { comport: String },
}

/// Payload of a `repl` action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplRequest {
    pub comport: String,
    pub session: String,
    pub cmd: String,
    /// Seconds; absent means [`DEFAULT_TIMEOUT`].
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl ReplRequest {
    /// Resolved timeout. Zero, negative and non-finite values are rejected.
    pub fn timeout(&self) -> Result<Duration> {
        resolve_timeout(self.timeout)
    }
}

/// Turn an optional seconds value into a timeout.
pub fn resolve_timeout(seconds: Option<f64>) -> Result<Duration> {
    let Some(seconds) = seconds else {
        return Ok(DEFAULT_TIMEOUT);
    };
    if seconds.is_nan() || seconds <= 0.0 {
        return Err(PortError::InvalidRequest(format!(
            "timeout must be positive (got {seconds})"
        )));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|err| PortError::InvalidRequest(format!("timeout {seconds}: {err}")))
}

/// Every operation the port layer accepts, as one closed set.
#[derive(Debug, Clone, PartialEq)]
pub enum PortCommand {
    ListAvailable,
    ListAttached,
    Connect {
        comport: String,
        attributes: PortAttributes,
        protocol: ProtocolConfig,
    },
    Close {
        comport: String,
    },
    Dispatch {
        comport: String,
        session: String,
        cmd: String,
        timeout: Duration,
    },
}

impl PortCommand {
    /// Parse the `content` of a `comports` action.
    pub fn from_comports(content: Value) -> Result<Self> {
        let command: ComportCommand = serde_json::from_value(content)?;
        Ok(match command {
            ComportCommand::ListAvailable => PortCommand::ListAvailable,
            ComportCommand::ListAttached => PortCommand::ListAttached,
            ComportCommand::Connect {
                comport,
                attributes,
                protocol,
            } => PortCommand::Connect {
                comport,
                attributes,
                protocol,
            },
            ComportCommand::Close { comport } => PortCommand::Close { comport },
        })
    }

    /// Parse the `content` of a `repl` action.
    pub fn from_repl(content: Value) -> Result<Self> {
        let request: ReplRequest = serde_json::from_value(content)?;
        let timeout = request.timeout()?;
        Ok(PortCommand::Dispatch {
            comport: request.comport,
            session: request.session,
            cmd: request.cmd,
            timeout,
        })
    }
}

/// Reply sent back to the hub: `{"result": ..., "events": [...]}` or
/// `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Ok {
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        events: Option<Vec<ProtocolEvent>>,
    },
    Err {
        error: String,
    },
}

impl Reply {
    pub fn result(result: impl Into<Value>) -> Self {
        Reply::Ok {
            result: result.into(),
            events: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Err {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Err { .. })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self)
            .unwrap_or_else(|err| serde_json::json!({ "error": err.to_string() }))
    }
}
