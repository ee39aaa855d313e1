//! Status listener capability
//!
//! A client holds at most one listener. It hears about every state
//! transition, every inbound notification and every transport failure.
//! Callbacks run synchronously on the task that produced the event, so
//! they must not block; hand slow work to a spawned task.

use crate::ConnectionState;
use moonwire_core::Error;
use serde_json::Value;

/// Receiver of connection lifecycle events
///
/// All methods default to doing nothing.
pub trait StatusListener: Send + Sync {
    /// Called once per state transition, after the new state is visible
    fn on_state_changed(&self, _state: ConnectionState) {}

    /// Called once per inbound notification, after data handlers are spawned
    fn on_notification(&self, _method: &str, _params: &Value) {}

    /// Called when connecting fails or a live connection breaks
    ///
    /// Not called for failures during an intentional disconnect.
    fn on_exception(&self, _error: &Error) {}
}
