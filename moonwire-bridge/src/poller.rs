//! Periodic status polling and the startup metadata fetch
//!
//! Each tick reads the klippy state and the monitored printer objects and
//! publishes them. Five failed ticks in a row double the interval; the next
//! successful tick restores it.

use crate::error::{BridgeError, Result};
use crate::moonraker::MoonrakerApi;
use crate::publisher::Outlet;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Consecutive failures before the poll interval is widened
pub const FAILURE_THRESHOLD: u32 = 5;

/// Attempts for the startup metadata fetch
pub const METADATA_ATTEMPTS: u32 = 3;

/// Poll interval that backs off after a failure streak
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveInterval {
    base: Duration,
    current: Duration,
    failures: u32,
    threshold: u32,
}

impl AdaptiveInterval {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            current: base,
            failures: 0,
            threshold: FAILURE_THRESHOLD,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count a failed tick; true when this one widened the interval
    pub fn record_failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.threshold && self.current == self.base {
            self.current = self.base.saturating_mul(2);
            return true;
        }
        false
    }

    /// Count a good tick; true when it ended a failure streak
    pub fn record_success(&mut self) -> bool {
        if self.failures == 0 {
            return false;
        }
        self.failures = 0;
        self.current = self.base;
        true
    }
}

/// Fixed-rate tick source whose period can be changed between ticks
///
/// Ticks are scheduled from the previous deadline, not from the end of the
/// work done on a tick. A tick that overruns the period fires the next one
/// immediately and realigns the schedule from there.
pub struct PollSchedule {
    ticker: Interval,
    period: Duration,
}

impl PollSchedule {
    /// The first tick fires one `period` from now
    pub fn new(period: Duration) -> Self {
        Self {
            ticker: ticker(period),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn next(&mut self) {
        self.ticker.tick().await;
    }

    /// Switch to `period`, counting from now; false if it is unchanged
    pub fn retune(&mut self, period: Duration) -> bool {
        if period == self.period {
            return false;
        }
        self.period = period;
        self.ticker = ticker(period);
        true
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub struct Poller {
    api: MoonrakerApi,
    outlet: Outlet,
    objects: Value,
    interval: AdaptiveInterval,
}

impl Poller {
    /// `objects` is the `printer.objects.query` argument
    pub fn new(api: MoonrakerApi, outlet: Outlet, objects: Value, interval: Duration) -> Self {
        Self {
            api,
            outlet,
            objects,
            interval: AdaptiveInterval::new(interval),
        }
    }

    pub fn interval(&self) -> &AdaptiveInterval {
        &self.interval
    }

    /// Tick until `cancel` fires
    pub async fn run(mut self, cancel: &CancellationToken) {
        tracing::info!(
            interval_ms = self.interval.current().as_millis() as u64,
            "Starting status poller"
        );

        let mut schedule = PollSchedule::new(self.interval.current());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = schedule.next() => {}
            }
            self.tick().await;
            schedule.retune(self.interval.current());
        }

        tracing::info!("Status poller stopped");
    }

    /// One poll with interval bookkeeping
    pub async fn tick(&mut self) {
        match self.poll_once().await {
            Ok(published) => {
                if self.interval.record_success() {
                    tracing::info!(published, "Polling recovered, restoring interval");
                }
            }
            Err(e) => {
                let widened = self.interval.record_failure();
                tracing::error!(
                    failures = self.interval.failures(),
                    threshold = FAILURE_THRESHOLD,
                    error = %e,
                    "Status poll failed"
                );
                if widened {
                    tracing::warn!(
                        interval_ms = self.interval.current().as_millis() as u64,
                        "Too many consecutive failures, slowing down polling"
                    );
                }
            }
        }
    }

    /// Publish the klippy state and every monitored object once
    ///
    /// Returns the number of objects published. Failing to publish at least
    /// half of them counts as a failed poll.
    pub async fn poll_once(&self) -> Result<usize> {
        let topics = self.outlet.topics();

        let state = self.api.klippy_state().await?;
        self.outlet
            .send(&topics.klipper_state(), state.as_bytes(), false)
            .await?;

        let status = self.api.query_objects(&self.objects).await?;
        let total = status.len();
        let mut failed = 0;
        for (name, data) in &status {
            if let Err(e) = self.outlet.send_json(&topics.object(name), data, false).await {
                tracing::error!(object = %name, error = %e, "Failed to publish object");
                failed += 1;
            }
        }

        if failed > 0 {
            tracing::warn!(failed, total, "Published objects with errors");
            if failed * 2 >= total {
                return Err(BridgeError::ObjectPublish { failed, total });
            }
        }
        Ok(total - failed)
    }
}

/// Publish `server.info` and `printer.info`
pub async fn publish_initial_info(api: &MoonrakerApi, outlet: &Outlet) -> Result<()> {
    let topics = outlet.topics();

    let server = api.server_info().await?;
    outlet.send_json(&topics.server_info(), &server, true).await?;

    let printer = api.printer_info().await?;
    outlet.send_json(&topics.printer_info(), &printer, true).await?;
    Ok(())
}

/// Fetch and publish startup metadata, retrying with a linear backoff
///
/// Attempt `n` failing waits `unit * n` before the next one. Giving up is
/// not fatal; the return value says whether the metadata went out.
pub async fn fetch_initial_metadata(
    api: &MoonrakerApi,
    outlet: &Outlet,
    unit: Duration,
    cancel: &CancellationToken,
) -> bool {
    for attempt in 1..=METADATA_ATTEMPTS {
        match publish_initial_info(api, outlet).await {
            Ok(()) => {
                tracing::info!(attempt, "Published initial info");
                return true;
            }
            Err(e) => {
                tracing::warn!(
                    attempt,
                    max_attempts = METADATA_ATTEMPTS,
                    error = %e,
                    "Failed to publish initial info"
                );
            }
        }

        if attempt == METADATA_ATTEMPTS {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(unit * attempt) => {}
        }
    }

    tracing::error!(
        attempts = METADATA_ATTEMPTS,
        "Failed to publish initial info, continuing anyway"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_schedule_is_fixed_rate() {
        let start = Instant::now();
        let mut schedule = PollSchedule::new(Duration::from_secs(2));

        schedule.next().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));

        // Work inside the period does not push the next tick back
        tokio::time::sleep(Duration::from_millis(1500)).await;
        schedule.next().await;
        assert_eq!(start.elapsed(), Duration::from_secs(4));

        tokio::time::sleep(Duration::from_millis(100)).await;
        schedule.next().await;
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_overrun_fires_immediately() {
        let start = Instant::now();
        let mut schedule = PollSchedule::new(Duration::from_secs(2));

        schedule.next().await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        schedule.next().await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));

        // Realigned from the late tick, no burst of catch-up ticks
        schedule.next().await;
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_retune() {
        let start = Instant::now();
        let mut schedule = PollSchedule::new(Duration::from_secs(2));
        schedule.next().await;

        assert!(!schedule.retune(Duration::from_secs(2)));
        assert!(schedule.retune(Duration::from_secs(4)));
        assert_eq!(schedule.period(), Duration::from_secs(4));

        schedule.next().await;
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        schedule.next().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn test_doubles_after_five_failures() {
        let mut interval = AdaptiveInterval::new(Duration::from_secs(2));
        for _ in 0..4 {
            assert!(!interval.record_failure());
            assert_eq!(interval.current(), Duration::from_secs(2));
        }
        assert!(interval.record_failure());
        assert_eq!(interval.current(), Duration::from_secs(4));

        // Further failures keep the widened interval
        assert!(!interval.record_failure());
        assert_eq!(interval.current(), Duration::from_secs(4));
        assert_eq!(interval.failures(), 6);
    }

    #[test]
    fn test_success_restores() {
        let mut interval = AdaptiveInterval::new(Duration::from_secs(2));
        assert!(!interval.record_success());

        for _ in 0..5 {
            interval.record_failure();
        }
        assert!(interval.record_success());
        assert_eq!(interval.current(), Duration::from_secs(2));
        assert_eq!(interval.failures(), 0);
    }

    #[test]
    fn test_short_streak_only_clears_counter() {
        let mut interval = AdaptiveInterval::new(Duration::from_secs(2));
        interval.record_failure();
        interval.record_failure();
        assert!(interval.record_success());
        assert_eq!(interval.current(), Duration::from_secs(2));

        // The streak starts over
        for _ in 0..4 {
            assert!(!interval.record_failure());
        }
    }
}
