//! Status listener that republishes client events
//!
//! Listener callbacks are synchronous and run on client tasks, so events are
//! queued to a single forwarding task that publishes them in order. A full
//! queue drops the event with a warning rather than stall the client.

use crate::publisher::Outlet;
use moonwire_client::{ConnectionState, StatusListener};
use moonwire_core::Error;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const EVENT_QUEUE: usize = 1024;

#[derive(Debug)]
enum Event {
    State(ConnectionState),
    Notification { method: String, params: Value },
}

pub struct BridgeListener {
    events: mpsc::Sender<Event>,
}

impl BridgeListener {
    /// Create the listener and its forwarding task
    ///
    /// The task ends once every handle to the listener has been dropped and
    /// the queue is drained.
    pub fn spawn(outlet: Outlet) -> (Arc<Self>, JoinHandle<()>) {
        let (events, rx) = mpsc::channel(EVENT_QUEUE);
        let task = tokio::spawn(forward(outlet, rx));
        (Arc::new(Self { events }), task)
    }

    fn enqueue(&self, event: Event) {
        if let Err(e) = self.events.try_send(event) {
            tracing::warn!(error = %e, "Dropping bridge event");
        }
    }
}

impl StatusListener for BridgeListener {
    fn on_state_changed(&self, state: ConnectionState) {
        tracing::debug!(state = %state, "Moonraker state changed");
        self.enqueue(Event::State(state));
    }

    fn on_notification(&self, method: &str, params: &Value) {
        tracing::debug!(method, "Received notification");
        self.enqueue(Event::Notification {
            method: method.to_string(),
            params: params.clone(),
        });
    }

    fn on_exception(&self, error: &Error) {
        tracing::error!(error = %error, kind = error.kind(), "Moonraker exception");
    }
}

async fn forward(outlet: Outlet, mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        let topics = outlet.topics();
        let outcome = match event {
            Event::State(state) => {
                outlet
                    .send(&topics.state(), state.as_str().as_bytes(), true)
                    .await
            }
            Event::Notification { method, params } => {
                outlet
                    .send_json(&topics.notification(&method), &params, true)
                    .await
            }
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "Failed to publish bridge event");
        }
    }
    tracing::debug!("Bridge event forwarder stopped");
}
