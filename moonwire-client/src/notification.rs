//! Notification dispatch for the JSON-RPC client
//!
//! Notifications are server-originated frames with a `method` and no `id`.
//! They never touch the pending-request table. Each inbound notification
//! goes to:
//!
//! - every registered data handler whose filter matches, each on its own
//!   spawned task so a slow handler cannot stall the inbound loop
//! - the status listener's `on_notification`, synchronously
//!
//! # Examples
//!
//! ```rust,no_run
//! use moonwire_client::MoonwireClient;
//!
//! # async fn example(client: &MoonwireClient) {
//! // Every notification
//! let all = client
//!     .register_notification_handler(|notif| async move {
//!         println!("{}: {:?}", notif.method, notif.params);
//!     })
//!     .await;
//!
//! // One method only
//! client
//!     .on_notification("notify_status_update", |notif| async move {
//!         println!("status: {:?}", notif.params);
//!     })
//!     .await;
//!
//! client.unregister_notification_handler(all).await;
//! # }
//! ```

use crate::StatusListener;
use moonwire_core::JsonRpcNotification;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Type for notification handler functions
pub type NotificationFn =
    Arc<dyn Fn(JsonRpcNotification) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Identifies one registration so it can be removed later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    method: Option<String>,
    handler: NotificationFn,
}

/// Fans inbound notifications out to handlers and the listener
pub struct NotificationDispatcher {
    handlers: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    listener: Option<Arc<dyn StatusListener>>,
}

impl NotificationDispatcher {
    pub fn new(listener: Option<Arc<dyn StatusListener>>) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            listener,
        }
    }

    /// Register a handler; `method: None` receives every notification
    pub async fn register<F, Fut>(&self, method: Option<String>, handler: F) -> HandlerId
    where
        F: Fn(JsonRpcNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: NotificationFn = Arc::new(move |notif| Box::pin(handler(notif)));
        self.handlers.write().await.push(Registration {
            id,
            method,
            handler,
        });
        id
    }

    pub async fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().await;
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Deliver one notification; returns how many handlers were spawned
    pub async fn dispatch(&self, notification: JsonRpcNotification) -> usize {
        let matching: Vec<NotificationFn> = {
            let handlers = self.handlers.read().await;
            handlers
                .iter()
                .filter(|r| r.method.as_deref().map_or(true, |m| m == notification.method))
                .map(|r| Arc::clone(&r.handler))
                .collect()
        };

        let spawned = matching.len();
        for handler in matching {
            tokio::spawn(handler(notification.clone()));
        }

        if let Some(ref listener) = self.listener {
            listener.on_notification(&notification.method, &notification.params_or_null());
        }

        tracing::trace!(method = %notification.method, handlers = spawned, "Notification dispatched");
        spawned
    }
}
