//! Persistent JSON-RPC 2.0 client over WebSocket
//!
//! This crate keeps one logical connection to a JSON-RPC endpoint alive and
//! multiplexes concurrent requests over it.
//!
//! # Core Features
//!
//! - **Request correlation**: increasing ids, per-request timeout and
//!   cancellation, bounded outbound queue with backpressure
//! - **Notifications**: fan-out to registered handlers and a status listener
//! - **Auto-reconnection**: one background driver with exponential backoff
//!   and an optional attempt budget
//! - **Lifecycle events**: every state transition reported synchronously
//! - **Observability**: `tracing` spans and OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use moonwire_client::{ClientBuilder, ConnectionState, StatusListener};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct PrintState;
//!
//! impl StatusListener for PrintState {
//!     fn on_state_changed(&self, state: ConnectionState) {
//!         println!("now {}", state);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> moonwire_core::Result<()> {
//!     let shutdown = CancellationToken::new();
//!     let client = ClientBuilder::new("localhost", 7125)
//!         .with_listener(Arc::new(PrintState))
//!         .connect(&shutdown)
//!         .await?;
//!
//!     let info: serde_json::Value = client.request("server.info", ()).await?;
//!     println!("{}", info);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

mod client;
mod client_builder;
mod connection_state;
mod io;
mod listener;
mod metrics;
mod notification;
mod reconnect;
mod request;

pub use client::MoonwireClient;
pub use client_builder::{
    ClientBuilder, ClientConfig, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_PORT,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_TIMEOUT,
};
pub use connection_state::{ConnectionManager, ConnectionState};
pub use listener::StatusListener;
pub use metrics::ClientMetrics;
pub use notification::{HandlerId, NotificationDispatcher, NotificationFn};
pub use reconnect::{BackoffPolicy, ExponentialBackoff, FixedDelay, RetryState};
pub use request::RequestCorrelator;
