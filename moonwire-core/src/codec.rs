//! Codec for JSON-RPC frame serialization and classification
//!
//! Encoding is plain serde. Decoding is where the protocol lives: an inbound
//! text frame is classified by which of `id` and `method` it carries, not by
//! trying struct shapes one after another.
//!
//! | `id` | `method` | Classified as  |
//! |------|----------|----------------|
//! | yes  | no       | Response       |
//! | no   | yes      | Notification   |
//! | yes  | yes      | Request        |
//! | no   | no       | invalid frame  |
//!
//! # Error Handling
//!
//! - Text that is not JSON at all → [`Error::Decode`]. The connection treats
//!   this as a transport failure.
//! - JSON that is not a usable frame (an array, a scalar, wrong field types,
//!   neither `id` nor `method`) → [`Error::InvalidFrame`]. The frame is
//!   dropped and the connection stays up.
//!
//! # Examples
//!
//! ```rust
//! use moonwire_core::{codec, Id, JsonRpcRequest};
//!
//! let request = JsonRpcRequest::new(Id::from(1u64), "printer.info", None);
//! let json = codec::encode_request(&request).unwrap();
//! assert_eq!(json, r#"{"jsonrpc":"2.0","id":1,"method":"printer.info"}"#);
//!
//! let msg = codec::decode(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
//! assert!(msg.is_response());
//! ```

use crate::error::{Error, JsonRpcErrorData, Result};
use crate::types::{
    Id, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION,
};
use serde::{Deserialize, Serialize};

/// Encode any serializable message to a JSON string
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

pub fn encode_request(req: &JsonRpcRequest) -> Result<String> {
    encode(req)
}

pub fn encode_notification(notif: &JsonRpcNotification) -> Result<String> {
    encode(notif)
}

pub fn encode_response(resp: &JsonRpcResponse) -> Result<String> {
    encode(resp)
}

/// Every field any frame kind may carry
#[derive(Deserialize)]
struct RawFrame {
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorData>,
}

/// Decode and classify one inbound text frame
///
/// # Errors
///
/// - `Error::Decode` if `data` is not JSON
/// - `Error::InvalidFrame` if it is JSON but not a classifiable frame
pub fn decode(data: &str) -> Result<JsonRpcMessage> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| Error::Decode(e.to_string()))?;

    // Batches are never sent by the endpoint; treat them like any other
    // unusable shape.
    if !value.is_object() {
        return Err(Error::InvalidFrame("frame is not a JSON object".to_string()));
    }

    let raw: RawFrame =
        serde_json::from_value(value).map_err(|e| Error::InvalidFrame(e.to_string()))?;
    let jsonrpc = raw.jsonrpc.unwrap_or_else(|| JSONRPC_VERSION.to_string());

    match (raw.id, raw.method) {
        (Some(id), None) => Ok(JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc,
            id,
            result: raw.result,
            error: raw.error,
        })),
        (None, Some(method)) => Ok(JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc,
            method,
            params: raw.params,
        })),
        (Some(id), Some(method)) => Ok(JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc,
            id,
            method,
            params: raw.params,
        })),
        (None, None) => Err(Error::InvalidFrame(
            "frame carries neither id nor method".to_string(),
        )),
    }
}

/// Decode a JSON string straight into a known type
pub fn decode_as<'de, T: Deserialize<'de>>(data: &'de str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| Error::Serialization(e.to_string()))
}
