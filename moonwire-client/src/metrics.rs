//! Client metrics definitions
//!
//! OpenTelemetry instruments for connection health. They record into the
//! global meter provider, which `moonwire_core::init_observability` points at
//! an OTLP collector when one is configured and which is a no-op otherwise.
//!
//! # Metrics Collected
//!
//! - **connection.state**: current state (0=stopped, 1=connecting, 2=connected, 3=stopping)
//! - **requests.total** / **request.duration**: by method and status
//! - **errors.total**: by error kind
//! - **reconnection.attempts** / **reconnection.success**
//! - **notifications.received**: by method

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

const METER_NAME: &str = "moonwire.client";

/// OpenTelemetry instruments for one client
pub struct ClientMetrics {
    pub connection_state: Gauge<i64>,
    pub requests_total: Counter<u64>,
    /// Request duration in seconds
    pub request_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
    pub reconnection_attempts: Counter<u64>,
    pub reconnection_success: Counter<u64>,
    pub notifications_received: Counter<u64>,
}

impl ClientMetrics {
    /// Instruments on the global meter provider
    pub fn new() -> Self {
        Self::new_with_meter(&global::meter(METER_NAME))
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("moonwire.client.connection.state")
                .with_description("0 stopped, 1 connecting, 2 connected, 3 stopping")
                .build(),
            requests_total: meter
                .u64_counter("moonwire.client.requests.total")
                .with_description("Requests finished, by method and outcome")
                .build(),
            request_duration: meter
                .f64_histogram("moonwire.client.request.duration")
                .with_description("Seconds from enqueue to outcome")
                .build(),
            errors_total: meter
                .u64_counter("moonwire.client.errors.total")
                .with_description("Errors reported to the status listener, by kind")
                .build(),
            reconnection_attempts: meter
                .u64_counter("moonwire.client.reconnection.attempts")
                .with_description("Dials made by the reconnection driver")
                .build(),
            reconnection_success: meter
                .u64_counter("moonwire.client.reconnection.success")
                .with_description("Driver dials that produced a connection")
                .build(),
            notifications_received: meter
                .u64_counter("moonwire.client.notifications.received")
                .with_description("Inbound notifications, by method")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: i64) {
        self.connection_state.record(state, &[]);
    }

    /// `status` is "success" or an error kind
    pub fn record_request(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("rpc.method", method.to_string()),
            KeyValue::new("outcome", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    pub fn record_error(&self, kind: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error.kind", kind.to_string())]);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }

    pub fn record_notification(&self, method: &str) {
        self.notifications_received
            .add(1, &[KeyValue::new("rpc.method", method.to_string())]);
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}
