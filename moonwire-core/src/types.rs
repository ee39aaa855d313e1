//! JSON-RPC 2.0 frames exchanged with the remote endpoint
//!
//! Three frame kinds travel over the socket:
//!
//! 1. **Request**: carries an `id`, a `method` and optional `params`
//! 2. **Response**: carries the `id` of the request it answers and either a
//!    `result` or an `error`
//! 3. **Notification**: carries a `method` and optional `params`, never an `id`
//!
//! Every frame this crate builds declares `"jsonrpc":"2.0"`. Field order in
//! the structs below is the order the fields appear on the wire, so a request
//! encodes as `{"jsonrpc":"2.0","id":1,"method":"printer.info"}`.

use crate::error::{Error, JsonRpcErrorData, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version declared by every outbound frame
pub const JSONRPC_VERSION: &str = "2.0";

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// JSON-RPC 2.0 request ID
///
/// Requests issued by this client always use numeric ids. String ids are
/// accepted on inbound frames so that a foreign response does not break
/// decoding; such frames simply never match a pending request.
///
/// The enum is `#[serde(untagged)]` so it serializes as the bare value.
///
/// # Examples
///
/// ```rust
/// use moonwire_core::Id;
///
/// let id = Id::from(7u64);
/// assert_eq!(id.as_correlation(), Some(7));
/// assert_eq!(Id::from("abc").as_correlation(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric identifier
    Number(i64),
    /// String identifier
    String(String),
}

impl Id {
    /// The correlation id this frame refers to, if it is one this client
    /// could have issued (a non-negative number).
    pub fn as_correlation(&self) -> Option<u64> {
        match self {
            Id::Number(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Id::Number(n as i64)
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

/// JSON-RPC 2.0 request
///
/// `params` is skipped on the wire when absent, which is how a call with
/// null params is encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub id: Id,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: Id, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            method: method.into(),
            params,
        }
    }

    /// Params as a JSON value, `Null` when the frame carried none
    pub fn params_or_null(&self) -> serde_json::Value {
        self.params.clone().unwrap_or(serde_json::Value::Null)
    }
}

/// JSON-RPC 2.0 response
///
/// A response carries either `result` or `error`. A `"result": null` on the
/// wire decodes to `result: None`, which [`JsonRpcResponse::into_result`]
/// turns back into `Value::Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorData>,
}

impl JsonRpcResponse {
    pub fn success(id: Id, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Id, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Convert into the caller-visible outcome: the result value, or
    /// [`Error::Remote`] carrying the peer's error object verbatim.
    pub fn into_result(self) -> Result<serde_json::Value> {
        match self.error {
            Some(error) => Err(Error::Remote(error)),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// A classified inbound or outbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    /// Frame with both `id` and `method`
    Request(JsonRpcRequest),
    /// Frame with an `id` and no `method`
    Response(JsonRpcResponse),
    /// Frame with a `method` and no `id`
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    pub fn is_request(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, JsonRpcMessage::Response(_))
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, JsonRpcMessage::Notification(_))
    }
}
