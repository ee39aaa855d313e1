//! Persistent JSON-RPC client over WebSocket
//!
//! `MoonwireClient` keeps one logical connection to the endpoint. Requests
//! from any number of tasks are multiplexed over the single socket and
//! matched to their responses by correlation id. Notifications go to the
//! registered handlers and the status listener. When the socket fails, a
//! background driver re-dials with backoff until it succeeds, the retry
//! budget is spent, or `disconnect` is called.
//!
//! # Client Lifecycle
//!
//! 1. **Build**: `ClientBuilder` (nothing is dialed yet)
//! 2. **Connect**: `connect(&token)` performs the handshake
//! 3. **Use**: requests, notifications, handlers
//! 4. **Disconnect**: closes the socket, fails pending requests, stops the
//!    reconnection driver
//!
//! # Cloning
//!
//! `MoonwireClient` is cheaply cloneable; all clones share one connection.
//!
//! # Example
//!
//! ```rust,no_run
//! use moonwire_client::ClientBuilder;
//! use serde_json::Value;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> moonwire_core::Result<()> {
//! let client = ClientBuilder::new("localhost", 7125).build();
//! client.connect(&CancellationToken::new()).await?;
//!
//! let info: Value = client.request("printer.info", ()).await?;
//! println!("klippy is {}", info["state"]);
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

use crate::client_builder::ClientConfig;
use crate::connection_state::ConnectionManager;
use crate::io::Session;
use crate::notification::{HandlerId, NotificationDispatcher};
use crate::reconnect::{self, RetryState};
use crate::request::RequestCorrelator;
use crate::{ClientMetrics, ConnectionState, StatusListener};
use moonwire_core::{
    codec, Error, Id, JsonRpcNotification, JsonRpcRequest, Result,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_util::sync::CancellationToken;

/// Shared state behind every clone of a client
pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) connection: ConnectionManager,
    pub(crate) requests: RequestCorrelator,
    pub(crate) notifications: NotificationDispatcher,
    pub(crate) listener: Option<Arc<dyn StatusListener>>,
    pub(crate) metrics: Option<Arc<ClientMetrics>>,
    pub(crate) session: Mutex<Option<Session>>,
    pub(crate) retry: Mutex<RetryState>,
    pub(crate) driver_running: AtomicBool,
    stop_requested: AtomicBool,
    lifecycle: Mutex<CancellationToken>,
    generation: AtomicU64,
}

impl ClientInner {
    /// Token cancelled by `disconnect`; bounds the driver and in-flight dials
    pub(crate) async fn lifecycle_token(&self) -> CancellationToken {
        self.lifecycle.lock().await.clone()
    }

    async fn renew_lifecycle(&self) {
        let mut token = self.lifecycle.lock().await;
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// One dial and handshake; installs a session on success
    #[tracing::instrument(skip(self, cancel), fields(url = %self.config.url()))]
    pub(crate) async fn connect_once(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        let lifecycle = self.lifecycle_token().await;
        {
            // `disconnect` inspects the state under the same lock, so it
            // either sees this dial as Connecting or its cancel stops it here.
            let _slot = self.session.lock().await;
            if lifecycle.is_cancelled() || cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.connection.begin_connect().await?;
        }

        let request = match self.handshake_request() {
            Ok(request) => request,
            Err(e) => {
                self.connection.mark_stopped().await;
                self.report_exception(&e);
                return Err(e);
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = lifecycle.cancelled() => Err(Error::Cancelled),
            result = tokio_tungstenite::connect_async(request) => result
                .map(|(ws, _response)| ws)
                .map_err(Error::transport),
        };

        let ws = match outcome {
            Ok(ws) => ws,
            Err(e) => {
                self.connection.mark_stopped().await;
                if !matches!(e, Error::Cancelled) {
                    tracing::warn!(error = %e, "Connection attempt failed");
                    self.report_exception(&e);
                }
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            // Held across the state change so a failing loop cannot observe
            // its session before the client reports Connected.
            let mut slot = self.session.lock().await;
            let session = Session::start(
                Arc::downgrade(self),
                ws,
                generation,
                self.config.queue_capacity,
            );

            // A disconnect that raced the handshake wins.
            if lifecycle.is_cancelled() || cancel.is_cancelled() {
                session.abort();
                self.connection.mark_stopped().await;
                return Err(Error::Cancelled);
            }

            *slot = Some(session);
            if !self.connection.mark_connected().await {
                if let Some(session) = slot.take() {
                    session.abort();
                }
                return Err(Error::Cancelled);
            }
        }

        self.retry.lock().await.reset();
        tracing::info!(generation, "Connected");
        Ok(())
    }

    fn handshake_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let url = self.config.url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;

        if let Some(ref key) = self.config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| Error::InvalidUrl(format!("invalid api key header: {}", e)))?;
            request.headers_mut().insert("X-Api-Key", value);
        }
        Ok(request)
    }

    /// Called by an I/O loop whose socket failed
    ///
    /// Stale generations and failures during an explicit disconnect are
    /// ignored. Otherwise the session is torn down, the state forced to
    /// `Stopped`, pending requests failed, and the driver started.
    pub(crate) async fn transport_failed(self: &Arc<Self>, generation: u64, error: Error) {
        let session = {
            let mut slot = self.session.lock().await;
            match slot.as_ref() {
                Some(session) if session.generation == generation => {}
                _ => return,
            }
            if self.connection.state().await == ConnectionState::Stopping {
                return;
            }
            slot.take()
        };
        if let Some(session) = session {
            session.abort();
        }

        tracing::error!(generation, error = %error, "Connection lost");
        self.connection.mark_stopped().await;
        self.report_exception(&error);

        let failed = self.requests.fail_all(Error::ConnectionClosed).await;
        if failed > 0 {
            tracing::warn!(failed, "Failed in-flight requests");
        }

        if self.config.auto_reconnect && !self.stop_requested.load(Ordering::Acquire) {
            reconnect::spawn_driver(self);
        }
    }

    /// Stopped with reconnection wanted and budget left
    pub(crate) async fn needs_driver(&self) -> bool {
        self.config.auto_reconnect
            && !self.stop_requested.load(Ordering::Acquire)
            && self.connection.state().await == ConnectionState::Stopped
            && self.retry.lock().await.should_reconnect()
    }

    fn report_exception(&self, error: &Error) {
        if let Some(ref m) = self.metrics {
            m.record_error(error.kind());
        }
        if let Some(ref listener) = self.listener {
            listener.on_exception(error);
        }
    }

    async fn outbound(&self) -> Result<tokio::sync::mpsc::Sender<String>> {
        if !self.connection.is_connected().await {
            return Err(Error::NotConnected);
        }
        let slot = self.session.lock().await;
        slot.as_ref()
            .map(|s| s.outbound.clone())
            .ok_or(Error::NotConnected)
    }

    fn enqueue_error(&self, err: TrySendError<String>) -> Error {
        match err {
            TrySendError::Full(_) => Error::Backpressure(self.config.queue_capacity),
            TrySendError::Closed(_) => Error::NotConnected,
        }
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let outbound = self.outbound().await?;

        let id = self.requests.next_id();
        let request = JsonRpcRequest::new(Id::from(id), method, params.filter(|p| !p.is_null()));
        let text = codec::encode_request(&request)?;

        let slot = self.requests.register(id, method, timeout).await;
        if let Err(e) = outbound.try_send(text) {
            self.requests.remove(id).await;
            return Err(self.enqueue_error(e));
        }

        tracing::debug!(id, "Request queued");
        self.requests.wait(slot, cancel).await
    }
}

/// JSON-RPC client over one persistent WebSocket connection
#[derive(Clone)]
pub struct MoonwireClient {
    inner: Arc<ClientInner>,
}

impl MoonwireClient {
    pub(crate) fn new(
        config: ClientConfig,
        listener: Option<Arc<dyn StatusListener>>,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        let retry = RetryState::new(config.auto_reconnect, config.max_reconnect_attempts);
        let inner = ClientInner {
            connection: ConnectionManager::new(listener.clone(), metrics.clone()),
            requests: RequestCorrelator::new(),
            notifications: NotificationDispatcher::new(listener.clone()),
            listener,
            metrics,
            session: Mutex::new(None),
            retry: Mutex::new(retry),
            driver_running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            lifecycle: Mutex::new(CancellationToken::new()),
            generation: AtomicU64::new(0),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Connect to the endpoint
    ///
    /// With auto-reconnect enabled a failed handshake is reported to the
    /// listener, the reconnection driver takes over, and this returns `Ok`.
    /// With auto-reconnect disabled the handshake error is returned.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if the client is not `Stopped`
    /// - `Cancelled` if `cancel` fires during the handshake
    /// - `Transport` / `InvalidUrl` when reconnect is disabled
    #[tracing::instrument(skip(self, cancel), fields(url = %self.inner.config.url()))]
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        if self.inner.connection.state().await != ConnectionState::Stopped {
            return Err(Error::AlreadyConnected);
        }
        self.inner.renew_lifecycle().await;
        self.inner.stop_requested.store(false, Ordering::Release);

        match self.inner.connect_once(cancel).await {
            Ok(()) => Ok(()),
            Err(e @ (Error::AlreadyConnected | Error::Cancelled)) => Err(e),
            Err(e) if self.inner.config.auto_reconnect => {
                tracing::warn!(error = %e, "Initial connection failed; reconnecting in background");
                reconnect::spawn_driver(&self.inner);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Close the connection and stop reconnecting
    ///
    /// A no-op when already stopped. A dial in progress is cancelled and
    /// awaited, so the client is `Stopped` once this returns. Pending
    /// requests fail with `ConnectionClosed`.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) {
        self.inner.stop_requested.store(true, Ordering::Release);
        self.inner.lifecycle_token().await.cancel();

        let session = {
            let mut slot = self.inner.session.lock().await;
            match self.inner.connection.begin_stop().await {
                Ok(()) => slot.take(),
                Err(ConnectionState::Connecting) => {
                    drop(slot);
                    tracing::debug!("Cancelling connection attempt");
                    self.inner.connection.wait_while_connecting().await;
                    return;
                }
                Err(_) => {
                    tracing::debug!("Disconnect with no live connection");
                    return;
                }
            }
        };

        if let Some(session) = session {
            session.shutdown().await;
        }

        let failed = self.inner.requests.fail_all(Error::ConnectionClosed).await;
        if failed > 0 {
            tracing::debug!(failed, "Failed pending requests on disconnect");
        }

        self.inner.connection.mark_stopped().await;
        tracing::info!("Disconnected");
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.connection.is_connected().await
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.connection.state().await
    }

    /// Number of requests waiting for a response
    pub async fn pending_requests(&self) -> usize {
        self.inner.requests.pending_count().await
    }

    /// Current reconnect bookkeeping
    pub async fn retry_state(&self) -> RetryState {
        self.inner.retry.lock().await.clone()
    }

    /// Send a request with the configured timeout and decode the result
    ///
    /// `params` serializing to `null` (for example `()`) is omitted from the
    /// frame.
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.request_with_timeout(method, params, self.inner.config.request_timeout)
            .await
    }

    pub async fn request_with_timeout<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.request_cancellable(method, params, timeout, &CancellationToken::new())
            .await
    }

    pub async fn request_cancellable<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params =
            serde_json::to_value(params).map_err(|e| Error::Serialization(e.to_string()))?;
        let value = self.send_request(method, Some(params), timeout, cancel).await?;
        serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Send a request and return the raw result value
    #[tracing::instrument(skip(self, params, cancel), fields(method = %method))]
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let start = Instant::now();
        let outcome = self
            .inner
            .send_request(method, params, timeout, cancel)
            .await;

        if let Some(ref m) = self.inner.metrics {
            let status = match &outcome {
                Ok(_) => "success",
                Err(e) => e.kind(),
            };
            m.record_request(method, status, start.elapsed().as_secs_f64());
        }
        if let Err(ref e) = outcome {
            tracing::debug!(error = %e, "Request failed");
        }
        outcome
    }

    /// Send a notification; no response is expected
    ///
    /// Fails with `NotConnected` or `Backpressure` like a request would.
    pub async fn send_notification<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let outbound = self.inner.outbound().await?;
        let params =
            serde_json::to_value(params).map_err(|e| Error::Serialization(e.to_string()))?;
        let notification =
            JsonRpcNotification::new(method, Some(params).filter(|p| !p.is_null()));
        let text = codec::encode_notification(&notification)?;

        outbound
            .try_send(text)
            .map_err(|e| self.inner.enqueue_error(e))
    }

    /// Register a handler for every inbound notification
    pub async fn register_notification_handler<F, Fut>(&self, handler: F) -> HandlerId
    where
        F: Fn(JsonRpcNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.notifications.register(None, handler).await
    }

    /// Register a handler for one notification method
    pub async fn on_notification<F, Fut>(&self, method: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(JsonRpcNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .notifications
            .register(Some(method.into()), handler)
            .await
    }

    pub async fn unregister_notification_handler(&self, id: HandlerId) -> bool {
        self.inner.notifications.unregister(id).await
    }

    /// Attach a socket-less session and mark the client connected
    #[cfg(test)]
    pub(crate) async fn attach_detached_session(
        &self,
        capacity: usize,
    ) -> tokio::sync::mpsc::Receiver<String> {
        let (session, rx) = Session::detached(1, capacity);
        self.inner.connection.begin_connect().await.unwrap();
        *self.inner.session.lock().await = Some(session);
        self.inner.connection.mark_connected().await;
        rx
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }
}
