//! Moonraker bridge
//!
//! Keeps a [`moonwire_client::MoonwireClient`] connected to a Moonraker
//! instance and republishes what it learns through a [`Publisher`]:
//! connection state, every notification, startup server and printer info,
//! and a periodic poll of klippy state and monitored printer objects.
//!
//! ```rust,no_run
//! use moonwire_bridge::{Bridge, Config, LogPublisher};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create("moonwire.toml")?;
//! let shutdown = CancellationToken::new();
//! Bridge::new(config, Arc::new(LogPublisher::new()))
//!     .run(shutdown)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod listener;
pub mod moonraker;
pub mod poller;
pub mod publisher;
pub mod shutdown;

pub use app::Bridge;
pub use config::{Config, ConfigError, LoggingConfig, MoonrakerConfig, PublishConfig, DEFAULT_CONFIG_FILE};
pub use error::BridgeError;
pub use listener::BridgeListener;
pub use moonraker::{Command, CommandMessage, MoonrakerApi, PrinterInfo, ServerInfo};
pub use poller::{fetch_initial_metadata, AdaptiveInterval, PollSchedule, Poller};
pub use publisher::{publish_with_retry, LogPublisher, Outlet, PublishError, Publisher, Topics};
pub use shutdown::install_signal_handlers;
