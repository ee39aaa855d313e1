//! Client configuration and builder
//!
//! `ClientConfig` is the plain data a client needs: where to connect, how
//! long requests may take, how hard to try reconnecting. `ClientBuilder`
//! wraps it in a fluent API and attaches the optional status listener and
//! metrics.
//!
//! # Examples
//!
//! ```rust,no_run
//! use moonwire_client::{ClientBuilder, ExponentialBackoff};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> moonwire_core::Result<()> {
//! let client = ClientBuilder::new("printer.local", 7125)
//!     .with_api_key("secret")
//!     .with_request_timeout(Duration::from_secs(10))
//!     .with_max_reconnect_attempts(0)
//!     .with_backoff(ExponentialBackoff::default().with_jitter())
//!     .with_metrics()
//!     .connect(&CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::reconnect::{BackoffPolicy, ExponentialBackoff};
use crate::{ClientMetrics, MoonwireClient, StatusListener};
use moonwire_core::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PORT: u16 = 7125;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Everything a client needs to know about its endpoint
#[derive(Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Use `wss://` instead of `ws://`
    pub tls: bool,
    /// Sent as the `X-Api-Key` handshake header
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub auto_reconnect: bool,
    /// 0 means unlimited
    pub max_reconnect_attempts: u32,
    /// Bound of the outbound frame queue
    pub queue_capacity: usize,
    pub backoff: Arc<dyn BackoffPolicy>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// `ws://host:port/websocket`, or `wss://` with TLS
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}:{}/websocket", scheme, self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            tls: false,
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auto_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backoff: Arc::new(ExponentialBackoff::default()),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring and creating a `MoonwireClient`
pub struct ClientBuilder {
    config: ClientConfig,
    listener: Option<Arc<dyn StatusListener>>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl ClientBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::from_config(ClientConfig::new(host, port))
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            listener: None,
            metrics: None,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.config.tls = tls;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Cap the reconnection driver at `attempts` tries (0 = unlimited)
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn with_backoff(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.config.backoff = Arc::new(backoff);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Record client metrics on the global meter provider
    pub fn with_metrics(mut self) -> Self {
        self.metrics = Some(Arc::new(ClientMetrics::new()));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create the client without dialing
    pub fn build(self) -> MoonwireClient {
        MoonwireClient::new(self.config, self.listener, self.metrics)
    }

    /// Create the client and connect it
    pub async fn connect(self, cancel: &CancellationToken) -> Result<MoonwireClient> {
        let client = self.build();
        client.connect(cancel).await?;
        Ok(client)
    }
}
