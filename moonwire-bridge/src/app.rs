//! The bridge run loop
//!
//! Connects to Moonraker with a [`BridgeListener`] attached, publishes the
//! startup metadata, then polls until the shutdown token fires.

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::listener::BridgeListener;
use crate::moonraker::MoonrakerApi;
use crate::poller::{fetch_initial_metadata, Poller};
use crate::publisher::{Outlet, Publisher};
use moonwire_client::ClientBuilder;
use moonwire_core::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Linear backoff unit for the startup metadata fetch
pub const METADATA_RETRY_UNIT: Duration = Duration::from_secs(1);

const FORWARDER_DRAIN: Duration = Duration::from_secs(2);

pub struct Bridge {
    config: Config,
    publisher: Arc<dyn Publisher>,
    metadata_retry_unit: Duration,
    publish_retry_unit: Option<Duration>,
}

impl Bridge {
    pub fn new(config: Config, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            config,
            publisher,
            metadata_retry_unit: METADATA_RETRY_UNIT,
            publish_retry_unit: None,
        }
    }

    pub fn with_metadata_retry_unit(mut self, unit: Duration) -> Self {
        self.metadata_retry_unit = unit;
        self
    }

    pub fn with_publish_retry_unit(mut self, unit: Duration) -> Self {
        self.publish_retry_unit = Some(unit);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run until `shutdown` is cancelled
    ///
    /// # Errors
    ///
    /// Only a failed initial connection with auto-reconnect disabled is
    /// fatal. Everything later is logged and retried.
    #[tracing::instrument(skip_all, fields(url = %self.config.moonraker.client_config().url()))]
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(environment = %self.config.environment, "Starting moonwire bridge");

        let mut outlet = Outlet::new(Arc::clone(&self.publisher), &self.config.publish);
        if let Some(unit) = self.publish_retry_unit {
            outlet = outlet.with_retry_unit(unit);
        }

        let (listener, forwarder) = BridgeListener::spawn(outlet.clone());
        let client = ClientBuilder::from_config(self.config.moonraker.client_config())
            .with_listener(listener)
            .with_metrics()
            .build();

        match client.connect(&shutdown).await {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                tracing::info!("Shutdown requested before connecting");
                return Ok(());
            }
            Err(e) => return Err(BridgeError::Connect(e)),
        }
        if client.is_connected().await {
            tracing::info!("Connected to Moonraker");
        } else {
            tracing::warn!("Moonraker unreachable, reconnecting in background");
        }

        let api = MoonrakerApi::new(client.clone(), shutdown.clone());
        fetch_initial_metadata(&api, &outlet, self.metadata_retry_unit, &shutdown).await;

        let poller = Poller::new(
            api,
            outlet,
            self.config.moonraker.monitored_objects_value(),
            self.config.moonraker.call_interval(),
        );
        poller.run(&shutdown).await;

        tracing::info!("Shutting down");
        client.disconnect().await;
        drop(client);

        if tokio::time::timeout(FORWARDER_DRAIN, forwarder).await.is_err() {
            tracing::warn!("Timed out draining bridge events");
        }
        Ok(())
    }
}
