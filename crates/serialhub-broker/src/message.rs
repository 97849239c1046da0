use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request published to a device channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: String,
    pub action: String,
    pub content: Value,
}

/// `response` event sent back by a device.
///
/// `request` echoes the original message; its correlation id is read from
/// `id`, or from the older `uuid` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub request: Value,
    #[serde(default)]
    pub response: Value,
}

impl ResponseMessage {
    pub fn new(request: Value, response: Value) -> Self {
        Self { request, response }
    }

    /// Correlation id carried by the echoed request.
    pub fn request_id(&self) -> Option<&str> {
        self.request
            .get("id")
            .or_else(|| self.request.get("uuid"))
            .and_then(Value::as_str)
    }
}
