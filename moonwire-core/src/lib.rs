//! Core JSON-RPC 2.0 types, codec and errors for moonwire
//!
//! This crate holds everything that does not touch a socket:
//!
//! - **Types**: request, response and notification frames
//! - **Codec**: encoding and the id/method classification of inbound frames
//! - **Error handling**: the error taxonomy shared by every moonwire crate
//! - **Observability**: tracing subscriber and OpenTelemetry setup
//!
//! The `moonwire-client` crate builds the persistent WebSocket connection on
//! top of these pieces.
//!
//! # Example
//!
//! ```rust
//! use moonwire_core::{codec, Id, JsonRpcMessage, JsonRpcRequest};
//!
//! let request = JsonRpcRequest::new(Id::from(1u64), "server.info", None);
//! let json = codec::encode_request(&request).unwrap();
//!
//! match codec::decode(&json).unwrap() {
//!     JsonRpcMessage::Request(req) => assert_eq!(req.method, "server.info"),
//!     _ => unreachable!(),
//! }
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use error::{Error, JsonRpcErrorData, Result, StreamClosed, TransportCause};
pub use observability::{init_observability, shutdown_observability, LogFormat, ObservabilityConfig};
pub use types::{Id, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
