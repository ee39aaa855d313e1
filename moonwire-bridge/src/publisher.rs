//! Pub/sub sink for everything the bridge learns
//!
//! The bridge never talks to a broker directly. It hands `(topic, payload,
//! qos, retain)` tuples to a [`Publisher`], and topic names come from
//! [`Topics`] so the layout is defined in one place:
//!
//! ```text
//! <prefix>/state                      connection state
//! <prefix>/notifications/<method>     every Moonraker notification
//! <prefix>/server/info                server.info at startup
//! <prefix>/printer/info               printer.info at startup
//! <prefix>/klipper/state              klippy state, every poll
//! <prefix>/objects/<name>             queried printer objects, every poll
//! ```

use crate::config::PublishConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Attempts per message in [`publish_with_retry`]
pub const PUBLISH_ATTEMPTS: u32 = 3;

/// Linear delay unit between publish attempts
pub const PUBLISH_RETRY_UNIT: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Publisher unavailable: {0}")]
    Unavailable(String),

    #[error("Publish to {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },

    #[error("Failed to encode payload for {topic}: {reason}")]
    Encode { topic: String, reason: String },

    #[error("Publish to {topic} failed after {attempts} attempts: {last}")]
    Exhausted {
        topic: String,
        attempts: u32,
        last: Box<PublishError>,
    },
}

/// Destination for bridge output
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<(), PublishError>;
}

/// Publishes by emitting one structured log event per message
#[derive(Debug, Default, Clone)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<(), PublishError> {
        tracing::info!(
            target: "moonwire::publish",
            topic,
            qos,
            retain,
            payload = %String::from_utf8_lossy(payload),
            "publish"
        );
        Ok(())
    }
}

/// Publish, retrying failures with a linear delay (`unit * attempt`)
pub async fn publish_with_retry(
    publisher: &dyn Publisher,
    topic: &str,
    payload: &[u8],
    qos: u8,
    retain: bool,
    attempts: u32,
    unit: Duration,
) -> Result<(), PublishError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match publisher.publish(topic, payload, qos, retain).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= attempts => {
                return Err(PublishError::Exhausted {
                    topic: topic.to_string(),
                    attempts,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                tracing::debug!(topic, attempt, error = %e, "Publish failed, retrying");
                tokio::time::sleep(unit * attempt).await;
                attempt += 1;
            }
        }
    }
}

/// Topic names under one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn state(&self) -> String {
        format!("{}/state", self.prefix)
    }

    pub fn notification(&self, method: &str) -> String {
        format!("{}/notifications/{}", self.prefix, method)
    }

    pub fn server_info(&self) -> String {
        format!("{}/server/info", self.prefix)
    }

    pub fn printer_info(&self) -> String {
        format!("{}/printer/info", self.prefix)
    }

    pub fn klipper_state(&self) -> String {
        format!("{}/klipper/state", self.prefix)
    }

    pub fn object(&self, name: &str) -> String {
        format!("{}/objects/{}", self.prefix, name)
    }
}

/// A publisher bound to the configured prefix, qos and retain flag
#[derive(Clone)]
pub struct Outlet {
    publisher: Arc<dyn Publisher>,
    topics: Topics,
    qos: u8,
    retain: bool,
    retry_unit: Duration,
}

impl Outlet {
    pub fn new(publisher: Arc<dyn Publisher>, config: &PublishConfig) -> Self {
        Self {
            publisher,
            topics: Topics::new(config.topic_prefix.clone()),
            qos: config.qos,
            retain: config.retain,
            retry_unit: PUBLISH_RETRY_UNIT,
        }
    }

    pub fn with_retry_unit(mut self, unit: Duration) -> Self {
        self.retry_unit = unit;
        self
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Publish raw bytes; `retain` is and-ed with the configured flag
    pub async fn send(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), PublishError> {
        publish_with_retry(
            self.publisher.as_ref(),
            topic,
            payload,
            self.qos,
            self.retain && retain,
            PUBLISH_ATTEMPTS,
            self.retry_unit,
        )
        .await
    }

    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
        retain: bool,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(value).map_err(|e| PublishError::Encode {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        self.send(topic, &payload, retain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` publishes, records the rest
    struct Flaky {
        failures: AtomicU32,
        calls: AtomicU32,
        sent: Mutex<Vec<(String, Vec<u8>, u8, bool)>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Publisher for Flaky {
        async fn publish(
            &self,
            topic: &str,
            payload: &[u8],
            qos: u8,
            retain: bool,
        ) -> Result<(), PublishError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(PublishError::Unavailable("broker down".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec(), qos, retain));
            Ok(())
        }
    }

    #[test]
    fn test_topics() {
        let topics = Topics::new("moonraker");
        assert_eq!(topics.state(), "moonraker/state");
        assert_eq!(
            topics.notification("notify_status_update"),
            "moonraker/notifications/notify_status_update"
        );
        assert_eq!(topics.server_info(), "moonraker/server/info");
        assert_eq!(topics.printer_info(), "moonraker/printer/info");
        assert_eq!(topics.klipper_state(), "moonraker/klipper/state");
        assert_eq!(topics.object("toolhead"), "moonraker/objects/toolhead");
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let publisher = Flaky::new(2);
        publish_with_retry(&publisher, "t", b"x", 1, false, 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(publisher.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let publisher = Flaky::new(10);
        let err = publish_with_retry(&publisher, "t", b"x", 0, false, 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Exhausted { attempts: 3, .. }));
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_outlet_applies_config() {
        let publisher = Arc::new(Flaky::new(0));
        let config = PublishConfig {
            topic_prefix: "shop/voron".into(),
            qos: 1,
            retain: true,
        };
        let outlet = Outlet::new(publisher.clone(), &config);

        let topic = outlet.topics().state();
        outlet.send(&topic, b"connected", true).await.unwrap();
        let topic = outlet.topics().object("extruder");
        outlet
            .send_json(&topic, &serde_json::json!({"temperature": 210.5}), false)
            .await
            .unwrap();

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent[0], ("shop/voron/state".into(), b"connected".to_vec(), 1, true));
        assert_eq!(sent[1].0, "shop/voron/objects/extruder");
        assert_eq!(sent[1].1, br#"{"temperature":210.5}"#.to_vec());
        assert!(!sent[1].3);
    }

    #[tokio::test]
    async fn test_log_publisher_accepts_everything() {
        let publisher = LogPublisher::new();
        assert!(publisher.publish("a/b", b"{}", 2, true).await.is_ok());
    }
}
