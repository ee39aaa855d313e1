//! Connection state machine
//!
//! # Connection States
//!
//! - **Stopped**: no socket; initial and terminal state
//! - **Connecting**: a dial and handshake are in progress
//! - **Connected**: the socket is open and both I/O loops run
//! - **Stopping**: an explicit disconnect is closing the socket
//!
//! # State Transitions
//!
//! ```text
//! Stopped → Connecting → Connected → Stopping → Stopped
//!               ↓            ↓
//!            Stopped      Stopped   (handshake failure / transport failure)
//! ```
//!
//! Every transition goes through one `tokio::sync::RwLock` and invokes the
//! listener's `on_state_changed` before the transition method returns.
//! Setting the state it already has is not a transition and is not reported.

use crate::{ClientMetrics, StatusListener};
use moonwire_core::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

/// Lifecycle state of a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Stopped,
    Connecting,
    Connected,
    Stopping,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Stopped => "stopped",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Stopping => "stopping",
        }
    }

    /// Numeric value recorded by the connection state gauge
    pub fn as_metric(&self) -> i64 {
        match self {
            ConnectionState::Stopped => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Stopping => 3,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the current state and reports every transition
pub struct ConnectionManager {
    state: RwLock<ConnectionState>,
    settled: Notify,
    listener: Option<Arc<dyn StatusListener>>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl ConnectionManager {
    pub fn new(
        listener: Option<Arc<dyn StatusListener>>,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        Self {
            state: RwLock::new(ConnectionState::Stopped),
            settled: Notify::new(),
            listener,
            metrics,
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// `Stopped → Connecting`, or `AlreadyConnected` from any other state
    pub async fn begin_connect(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != ConnectionState::Stopped {
            return Err(Error::AlreadyConnected);
        }
        self.apply(&mut state, ConnectionState::Connecting);
        Ok(())
    }

    /// `Connecting → Connected`; false if the client was not connecting
    pub async fn mark_connected(&self) -> bool {
        let mut state = self.state.write().await;
        if *state != ConnectionState::Connecting {
            return false;
        }
        self.apply(&mut state, ConnectionState::Connected);
        true
    }

    /// `Connected → Stopping`; otherwise the state that prevented it
    pub async fn begin_stop(&self) -> std::result::Result<(), ConnectionState> {
        let mut state = self.state.write().await;
        if *state != ConnectionState::Connected {
            return Err(*state);
        }
        self.apply(&mut state, ConnectionState::Stopping);
        Ok(())
    }

    /// Return once the state is anything but `Connecting`
    pub async fn wait_while_connecting(&self) {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            if self.state().await != ConnectionState::Connecting {
                return;
            }
            settled.await;
        }
    }

    /// Any state `→ Stopped`; false if already stopped
    pub async fn mark_stopped(&self) -> bool {
        let mut state = self.state.write().await;
        if *state == ConnectionState::Stopped {
            return false;
        }
        self.apply(&mut state, ConnectionState::Stopped);
        true
    }

    // The listener runs while the write guard is held so observers see
    // transitions in the order they happened.
    fn apply(&self, state: &mut ConnectionState, next: ConnectionState) {
        let previous = *state;
        *state = next;

        tracing::debug!(from = %previous, to = %next, "Connection state changed");

        if let Some(ref m) = self.metrics {
            m.update_connection_state(next.as_metric());
        }
        if let Some(ref listener) = self.listener {
            listener.on_state_changed(next);
        }
        if previous == ConnectionState::Connecting {
            self.settled.notify_waiters();
        }
    }
}
