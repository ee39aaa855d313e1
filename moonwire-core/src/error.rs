//! Error types for moonwire
//!
//! Two error types live here:
//!
//! - **Error**: every failure a client operation can report (uses thiserror)
//! - **JsonRpcErrorData**: the wire-format error object a peer sends back
//!
//! # Who sees which error
//!
//! `NotConnected`, `AlreadyConnected`, `Timeout`, `Backpressure`, `Remote` and
//! `Cancelled` are returned straight to the caller of the operation that
//! produced them. `Transport` and `Decode` are raised by the I/O loops; they
//! reach the status listener once and force the connection back to `Stopped`.
//! Requests still pending at that moment fail with `ConnectionClosed`.
//!
//! # Examples
//!
//! ```rust
//! use moonwire_core::{Error, JsonRpcErrorData};
//!
//! let remote = Error::from(JsonRpcErrorData::new(-32601, "Method not found"));
//! assert_eq!(remote.kind(), "remote");
//! assert!(!remote.is_transport());
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for moonwire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Shared handle to the error that broke a connection
pub type TransportCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The peer ended the stream without a transport error of its own
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct StreamClosed(pub String);

/// Error type for moonwire operations
///
/// Cloneable so one transport failure can be handed to the listener and
/// fanned out to every pending request.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Operation requires a `Connected` client
    #[error("Not connected")]
    NotConnected,

    /// Connect attempted while the client is not `Stopped`
    #[error("Already connecting or connected")]
    AlreadyConnected,

    /// No response arrived before the request deadline
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The bounded outbound queue is full; nothing was enqueued
    #[error("Outbound queue full (capacity {0})")]
    Backpressure(usize),

    /// The socket failed: dial, handshake, read, write or unexpected close
    ///
    /// Carries the underlying error as its source.
    #[error("Transport error: {0}")]
    Transport(#[source] TransportCause),

    /// The peer answered with a JSON-RPC error object
    ///
    /// Code, message and data are carried exactly as received.
    #[error("Remote error: {0}")]
    Remote(#[from] JsonRpcErrorData),

    /// The caller's cancellation token fired first
    #[error("Operation cancelled")]
    Cancelled,

    /// The connection went away while the request was in flight
    #[error("Connection closed")]
    ConnectionClosed,

    /// Params or result could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An inbound text frame was not valid JSON
    #[error("Decode error: {0}")]
    Decode(String),

    /// An inbound frame was valid JSON but not a usable JSON-RPC frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The configured endpoint does not form a valid WebSocket URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl Error {
    pub fn transport<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Transport(Arc::new(cause))
    }

    /// Transport failure for a stream that ended or was closed by the peer
    pub fn stream_closed(reason: impl Into<String>) -> Self {
        Error::transport(StreamClosed(reason.into()))
    }

    /// The error underneath a `Transport` failure, for downcasting
    pub fn transport_cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Error::Transport(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }

    /// Short stable label, used as a metric attribute and log field
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotConnected => "not_connected",
            Error::AlreadyConnected => "already_connected",
            Error::Timeout(_) => "timeout",
            Error::Backpressure(_) => "backpressure",
            Error::Transport(_) => "transport",
            Error::Remote(_) => "remote",
            Error::Cancelled => "cancelled",
            Error::ConnectionClosed => "connection_closed",
            Error::Serialization(_) => "serialization",
            Error::Decode(_) => "decode",
            Error::InvalidFrame(_) => "invalid_frame",
            Error::InvalidUrl(_) => "invalid_url",
        }
    }

    /// Whether this error means the physical connection is unusable
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Decode(_) | Error::ConnectionClosed
        )
    }
}

/// JSON-RPC 2.0 error object as it appears in the `error` field of a response
///
/// # Examples
///
/// ```rust
/// use moonwire_core::JsonRpcErrorData;
/// use serde_json::json;
///
/// let error = JsonRpcErrorData::with_data(
///     400,
///     "Klippy Disconnected",
///     json!({"state": "shutdown"}),
/// );
/// assert_eq!(error.to_string(), "[400] Klippy Disconnected");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// Numeric error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Optional additional error information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcErrorData {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl std::fmt::Display for JsonRpcErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorData {}
