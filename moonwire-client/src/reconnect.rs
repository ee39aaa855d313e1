//! Reconnection backoff, retry bookkeeping and the reconnection driver
//!
//! When the physical connection fails, a single background driver keeps
//! dialing until a connection sticks, the retry budget runs out, or the
//! client is told to stop. This module holds the pieces of that loop:
//!
//! - **BackoffPolicy**: maps an attempt number to a delay (pure)
//! - **RetryState**: enabled flag, attempt budget and the running counter
//! - **spawn_driver**: the background task itself
//!
//! # Delay Sequence
//!
//! Attempts are numbered from 1 after every failure. The first attempt is
//! made immediately; attempt `n >= 2` waits `initial * multiplier^(n-2)`,
//! capped at `max`. With the defaults (1s, x2, 60s) that is
//! `0, 1, 2, 4, 8, 16, 32, 60, 60, ...` seconds.
//!
//! # Examples
//!
//! ```rust
//! use moonwire_client::{BackoffPolicy, ExponentialBackoff};
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::default();
//! assert_eq!(backoff.delay_for(1), Duration::ZERO);
//! assert_eq!(backoff.delay_for(2), Duration::from_secs(1));
//! assert_eq!(backoff.delay_for(7), Duration::from_secs(32));
//! assert_eq!(backoff.delay_for(8), Duration::from_secs(60));
//! ```

use crate::client::ClientInner;
use moonwire_core::Error;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Delay before a given reconnect attempt
///
/// `attempt` is 1-based and counts attempts since the last successful
/// connection.
pub trait BackoffPolicy: Send + Sync {
    fn delay_for(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with an optional 0-25% jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: u32,
    max: Duration,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            multiplier: 2,
            max,
            jitter: false,
        }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Add a random 0-25% on top of every non-zero delay
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.saturating_pow(attempt - 2);
        std::cmp::min(self.initial.saturating_mul(factor), self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }

        use rand::Rng;
        let millis = delay.as_millis() as u64;
        let jitter_ms = rand::thread_rng().gen_range(0..=(millis / 4));
        delay + Duration::from_millis(jitter_ms)
    }
}

/// The same delay before every attempt after the first
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffPolicy for FixedDelay {
    fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.delay
        }
    }
}

/// Reconnect bookkeeping for one client
///
/// `max_attempts == 0` means unlimited. `current_delay` is the delay the most
/// recent attempt waited; both counters go back to zero on every successful
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub enabled: bool,
    pub max_attempts: u32,
    pub attempt: u32,
    pub current_delay: Duration,
}

impl RetryState {
    pub fn new(enabled: bool, max_attempts: u32) -> Self {
        Self {
            enabled,
            max_attempts,
            attempt: 0,
            current_delay: Duration::ZERO,
        }
    }

    /// Whether the driver may make another attempt
    pub fn should_reconnect(&self) -> bool {
        self.enabled && (self.max_attempts == 0 || self.attempt < self.max_attempts)
    }

    /// Count one more attempt and return how long to wait before it
    pub fn begin_attempt(&mut self, policy: &dyn BackoffPolicy) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.current_delay = policy.delay_for(self.attempt);
        self.current_delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = Duration::ZERO;
    }
}

/// Start the reconnection driver unless one is already running
///
/// The driver stops on the first successful connection, when the retry
/// budget is exhausted, or when the client's lifecycle token is cancelled by
/// `disconnect`. On the way out it starts a fresh driver if the connection
/// already dropped again.
pub(crate) fn spawn_driver(inner: &Arc<ClientInner>) {
    if inner
        .driver_running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        tracing::debug!("Reconnection driver already running");
        return;
    }

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        run_driver(&inner).await;
        inner.driver_running.store(false, Ordering::Release);

        // A session that failed while this driver was winding down could not
        // start its own driver, so take over for it.
        if inner.needs_driver().await {
            tracing::debug!("Connection lost while the driver was exiting; restarting it");
            spawn_driver(&inner);
        }
    });
}

async fn run_driver(inner: &Arc<ClientInner>) {
    let lifecycle = inner.lifecycle_token().await;

    loop {
        let (attempt, delay) = {
            let mut retry = inner.retry.lock().await;
            if !retry.should_reconnect() {
                tracing::error!(
                    attempts = retry.attempt,
                    max_attempts = retry.max_attempts,
                    "Giving up on reconnection"
                );
                return;
            }
            let delay = retry.begin_attempt(inner.config.backoff.as_ref());
            (retry.attempt, delay)
        };

        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );

        if !delay.is_zero() {
            tokio::select! {
                _ = lifecycle.cancelled() => {
                    tracing::debug!("Reconnection cancelled during backoff");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if let Some(ref m) = inner.metrics {
            m.record_reconnection_attempt();
        }

        match inner.connect_once(&lifecycle).await {
            Ok(()) => {
                tracing::info!(attempt, "Reconnected");
                if let Some(ref m) = inner.metrics {
                    m.record_reconnection_success();
                }
                return;
            }
            Err(Error::AlreadyConnected) => {
                tracing::debug!("Connection re-established elsewhere; driver exiting");
                return;
            }
            Err(Error::Cancelled) => {
                tracing::debug!("Reconnection cancelled");
                return;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
            }
        }
    }
}
