//! Inbound and outbound loops for one physical connection
//!
//! A [`Session`] is created for every successful handshake. It owns the two
//! tasks that touch the socket:
//!
//! - **read loop**: decodes one frame at a time and routes it to the request
//!   correlator or the notification dispatcher
//! - **write loop**: drains the bounded outbound queue in order, one text
//!   message per frame
//!
//! Both loops stop when the session's `closed` token is cancelled. A loop
//! that hits a transport failure reports it to the client, which tears the
//! session down and forces the state back to `Stopped`.
//!
//! The loops hold only a weak reference to the client, so dropping the last
//! client handle ends them at the next frame.

use crate::client::ClientInner;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use moonwire_core::{codec, Error, JsonRpcMessage, Result};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles for one physical connection
pub(crate) struct Session {
    pub(crate) generation: u64,
    pub(crate) outbound: mpsc::Sender<String>,
    pub(crate) closed: CancellationToken,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Session {
    /// Split the socket and start both loops
    pub(crate) fn start(
        inner: Weak<ClientInner>,
        ws: WsStream,
        generation: u64,
        queue_capacity: usize,
    ) -> Self {
        let (sink, stream) = ws.split();
        let (outbound, rx) = mpsc::channel(queue_capacity.max(1));
        let closed = CancellationToken::new();

        let writer = tokio::spawn(write_loop(
            inner.clone(),
            sink,
            rx,
            generation,
            closed.clone(),
        ));
        let reader = tokio::spawn(read_loop(inner, stream, generation, closed.clone()));

        Self {
            generation,
            outbound,
            closed,
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    /// A session with no socket behind it; the caller reads the queue
    #[cfg(test)]
    pub(crate) fn detached(generation: u64, queue_capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbound, rx) = mpsc::channel(queue_capacity.max(1));
        let session = Self {
            generation,
            outbound,
            closed: CancellationToken::new(),
            reader: None,
            writer: None,
        };
        (session, rx)
    }

    /// Stop both loops without waiting for them
    pub(crate) fn abort(self) {
        self.closed.cancel();
    }

    /// Intentional close: the writer sends a Close frame, then both loops end
    pub(crate) async fn shutdown(mut self) {
        self.closed.cancel();

        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, writer).await.is_err() {
                tracing::warn!("Timed out sending close frame");
            }
        }
        if let Some(reader) = self.reader.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, reader).await.is_err() {
                tracing::warn!("Timed out waiting for read loop");
            }
        }
    }
}

async fn read_loop(
    inner: Weak<ClientInner>,
    mut stream: SplitStream<WsStream>,
    generation: u64,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = stream.next() => frame,
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };

        let failure = match frame {
            Some(Ok(Message::Text(text))) => match route_frame(&inner, &text).await {
                Ok(()) => continue,
                Err(e) => e,
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "no reason".to_string());
                Error::stream_closed(format!("connection closed by peer: {}", reason))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => Error::transport(e),
            None => Error::stream_closed("stream ended"),
        };

        inner.transport_failed(generation, failure).await;
        break;
    }

    tracing::debug!(generation, "Read loop stopped");
}

/// Route one decoded text frame
///
/// Only a frame that is not JSON at all is an error; every other oddity is
/// logged and dropped.
async fn route_frame(inner: &Arc<ClientInner>, text: &str) -> Result<()> {
    match codec::decode(text) {
        Ok(JsonRpcMessage::Response(response)) => {
            let Some(id) = response.id.as_correlation() else {
                tracing::debug!(id = %response.id, "Dropping response with foreign id");
                return Ok(());
            };
            if !inner.requests.complete(id, response.into_result()).await {
                tracing::debug!(id, "Dropping response for unknown or expired request");
            }
        }
        Ok(JsonRpcMessage::Notification(notification)) => {
            if let Some(ref m) = inner.metrics {
                m.record_notification(&notification.method);
            }
            inner.notifications.dispatch(notification).await;
        }
        Ok(JsonRpcMessage::Request(request)) => {
            tracing::warn!(
                id = %request.id,
                method = %request.method,
                "Dropping server-originated request"
            );
        }
        Err(Error::InvalidFrame(reason)) => {
            tracing::warn!(reason = %reason, "Dropping invalid frame");
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn write_loop(
    inner: Weak<ClientInner>,
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<String>,
    generation: u64,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    tracing::debug!(error = %e, "Close frame not sent");
                }
                let _ = sink.close().await;
                break;
            }
            next = rx.recv() => {
                let Some(text) = next else {
                    break;
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    if let Some(inner) = inner.upgrade() {
                        inner
                            .transport_failed(generation, Error::transport(e))
                            .await;
                    }
                    break;
                }
            }
        }
    }

    tracing::debug!(generation, "Write loop stopped");
}
