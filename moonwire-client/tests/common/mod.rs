//! Common test utilities for moonwire-client integration tests
//!
//! A lightweight WebSocket server that records what the client sends,
//! answers through a test-supplied handler, can push frames at any time and
//! can drop every connection without a close handshake. A recording status
//! listener rounds it off.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use moonwire_client::{ConnectionState, StatusListener};
use moonwire_core::Error;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// What the client presented during one handshake
#[derive(Debug, Clone)]
pub struct Handshake {
    pub path: String,
    pub api_key: Option<String>,
}

/// Mock WebSocket server for client testing
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    message_rx: mpsc::Receiver<String>,
    push_tx: broadcast::Sender<String>,
    drop_tx: broadcast::Sender<()>,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
    accepted: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// A server that never answers
    pub async fn silent() -> Self {
        Self::with_handler(|_msg| async move { None }).await
    }

    /// Start a mock server with a custom message handler
    ///
    /// The handler gets every text frame and may return one frame to send
    /// back on the same connection.
    pub async fn with_handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let (msg_tx, message_rx) = mpsc::channel::<String>(1000);
        let (push_tx, _) = broadcast::channel::<String>(100);
        let (drop_tx, _) = broadcast::channel::<()>(8);
        let handshakes = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let server_shutdown = shutdown.clone();
        let server_push = push_tx.clone();
        let server_drop = drop_tx.clone();
        let server_handshakes = Arc::clone(&handshakes);
        let server_accepted = Arc::clone(&accepted);

        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = server_shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(_) => continue,
                    },
                };

                let handshakes = Arc::clone(&server_handshakes);
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let api_key = req
                        .headers()
                        .get("X-Api-Key")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    handshakes.lock().unwrap().push(Handshake {
                        path: req.uri().path().to_string(),
                        api_key,
                    });
                    Ok(resp)
                };

                let Ok(ws) = accept_hdr_async(stream, callback).await else {
                    continue;
                };
                server_accepted.fetch_add(1, Ordering::SeqCst);

                let handler = Arc::clone(&handler);
                let msg_tx = msg_tx.clone();
                let mut push_rx = server_push.subscribe();
                let mut drop_rx = server_drop.subscribe();
                let shutdown = server_shutdown.clone();

                tokio::spawn(async move {
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = drop_rx.recv() => break,
                            pushed = push_rx.recv() => {
                                if let Ok(text) = pushed {
                                    if write.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            frame = read.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = msg_tx.send(text.clone()).await;
                                    if let Some(reply) = handler(text).await {
                                        if write.send(Message::Text(reply)).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                });
            }
        });

        Self {
            addr,
            shutdown,
            message_rx,
            push_tx,
            drop_tx,
            handshakes,
            accepted,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait up to five seconds for the next frame the client sent
    pub async fn wait_for_message(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Send a frame to every open connection
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.push_tx.send(text.into());
    }

    /// Close every open connection without a close handshake
    pub fn drop_connections(&self) {
        let _ = self.drop_tx.send(());
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.handshakes.lock().unwrap().clone()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Completes every WebSocket handshake and hangs up straight away
pub struct FlappingServer {
    port: u16,
    shutdown: CancellationToken,
    accepted: Arc<AtomicUsize>,
}

impl FlappingServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();
        let accepted = Arc::new(AtomicUsize::new(0));

        let server_shutdown = shutdown.clone();
        let server_accepted = Arc::clone(&accepted);
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = server_shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(_) => continue,
                    },
                };
                let accepted = Arc::clone(&server_accepted);
                tokio::spawn(async move {
                    if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                        accepted.fetch_add(1, Ordering::SeqCst);
                        drop(ws);
                    }
                });
            }
        });

        Self {
            port,
            shutdown,
            accepted,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for FlappingServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Id of a request frame
pub fn request_id(frame: &str) -> i64 {
    let value: Value = serde_json::from_str(frame).unwrap();
    value["id"].as_i64().unwrap()
}

/// Method of a request or notification frame
pub fn request_method(frame: &str) -> String {
    let value: Value = serde_json::from_str(frame).unwrap();
    value["method"].as_str().unwrap().to_string()
}

/// Helper to create a mock JSON-RPC response
pub fn mock_response(id: i64, result: Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
    .to_string()
}

/// Helper to create a mock JSON-RPC error response
pub fn mock_error_response(id: i64, code: i32, message: &str, data: Option<Value>) -> String {
    let mut error = serde_json::json!({
        "code": code,
        "message": message
    });
    if let Some(data) = data {
        error["data"] = data;
    }
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error
    })
    .to_string()
}

/// Helper to create a mock JSON-RPC notification
pub fn mock_notification(method: &str, params: Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
    .to_string()
}

/// Status listener that records everything it hears
#[derive(Default)]
pub struct RecordingListener {
    states: Mutex<Vec<ConnectionState>>,
    notifications: Mutex<Vec<(String, Value)>>,
    exceptions: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().unwrap().clone()
    }

    pub fn count_state(&self, state: ConnectionState) -> usize {
        self.states().into_iter().filter(|s| *s == state).count()
    }

    pub fn notifications(&self) -> Vec<(String, Value)> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn exceptions(&self) -> Vec<String> {
        self.exceptions.lock().unwrap().clone()
    }

    /// Poll until `count` transitions into `state` have been seen
    pub async fn wait_for_state(&self, state: ConnectionState, count: usize) -> bool {
        wait_until(|| self.count_state(state) >= count).await
    }
}

impl StatusListener for RecordingListener {
    fn on_state_changed(&self, state: ConnectionState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_notification(&self, method: &str, params: &Value) {
        self.notifications
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));
    }

    fn on_exception(&self, error: &Error) {
        self.exceptions.lock().unwrap().push(error.to_string());
    }
}

/// Poll a condition every 10ms for up to five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
