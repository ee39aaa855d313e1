//! moonwire - a persistent JSON-RPC 2.0 client for Moonraker
//!
//! This is the convenience crate that re-exports the moonwire sub-crates.
//!
//! # Architecture
//!
//! - **moonwire-core**: frames, codec, error taxonomy, observability setup
//! - **moonwire-client**: the persistent WebSocket client with request
//!   correlation and reconnection
//! - **moonwire-bridge**: configuration, the typed Moonraker API, the
//!   poller and the publisher sink behind the `moonwire` binary
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use moonwire::ClientBuilder;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new("localhost", 7125)
//!         .connect(&CancellationToken::new())
//!         .await?;
//!
//!     let info: serde_json::Value = client.request("server.info", ()).await?;
//!     println!("klippy: {}", info["klippy_state"]);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub use moonwire_bridge as bridge;
pub use moonwire_client as client;
pub use moonwire_core as core;

pub use moonwire_bridge::{Bridge, Config};
pub use moonwire_client::{ClientBuilder, ConnectionState, MoonwireClient, StatusListener};
pub use moonwire_core::{Error, Result};
