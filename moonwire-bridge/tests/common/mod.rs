//! Shared fixtures for bridge integration tests: a scripted Moonraker
//! endpoint and a publisher that records everything.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use moonwire_bridge::{Config, PublishError, Publisher};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// How the mock answers one request
pub enum Reply {
    Result(Value),
    Error(i32, &'static str),
    Silent,
}

type Responder = dyn Fn(&str, &Value) -> Reply + Send + Sync;

/// A WebSocket endpoint that answers requests through a responder
pub struct MockMoonraker {
    port: u16,
    shutdown: CancellationToken,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockMoonraker {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let responder: Arc<Responder> = Arc::new(responder);

        let server_shutdown = shutdown.clone();
        let server_calls = Arc::clone(&calls);
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = server_shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(_) => continue,
                    },
                };
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };

                let responder = Arc::clone(&responder);
                let calls = Arc::clone(&server_calls);
                let shutdown = server_shutdown.clone();
                tokio::spawn(async move {
                    let (mut write, mut read) = ws.split();
                    loop {
                        let frame = tokio::select! {
                            _ = shutdown.cancelled() => break,
                            frame = read.next() => frame,
                        };
                        let text = match frame {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(_)) => continue,
                            _ => break,
                        };

                        let request: Value = serde_json::from_str(&text).unwrap();
                        let method = request["method"].as_str().unwrap_or_default().to_string();
                        let params = request.get("params").cloned().unwrap_or(Value::Null);
                        calls.lock().unwrap().push((method.clone(), params.clone()));

                        let Some(id) = request.get("id").cloned() else {
                            continue;
                        };
                        let reply = match responder(&method, &params) {
                            Reply::Result(result) => {
                                json!({"jsonrpc": "2.0", "id": id, "result": result})
                            }
                            Reply::Error(code, message) => json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "error": {"code": code, "message": message}
                            }),
                            Reply::Silent => continue,
                        };
                        if write.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self {
            port,
            shutdown,
            calls,
        }
    }

    /// A Moonraker that answers the calls the bridge makes
    pub async fn healthy() -> Self {
        Self::start(|method, _params| standard_reply(method)).await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls().iter().filter(|(m, _)| m == method).count()
    }
}

impl Drop for MockMoonraker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn standard_reply(method: &str) -> Reply {
    match method {
        "server.info" => Reply::Result(json!({
            "klippy_connected": true,
            "klippy_state": "ready",
            "components": ["database", "file_manager"],
            "websocket_count": 1,
            "moonraker_version": "v0.8.0-1"
        })),
        "printer.info" => Reply::Result(json!({
            "state": "ready",
            "state_message": "Printer is ready",
            "hostname": "voron",
            "software_version": "v0.12.0"
        })),
        "printer.objects.query" => Reply::Result(json!({
            "eventtime": 578243.57,
            "status": {
                "print_stats": {"state": "standby"},
                "toolhead": {"position": [0.0, 0.0, 0.0, 0.0]},
                "extruder": {"temperature": 24.5, "target": 0.0}
            }
        })),
        _ => Reply::Error(-32601, "Method not found"),
    }
}

/// Publisher that keeps every message and can be told to fail by topic
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(String, String, bool)>>,
    failing: Mutex<Option<String>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject every topic containing `needle`
    pub fn fail_topics_containing(&self, needle: &str) {
        *self.failing.lock().unwrap() = Some(needle.to_string());
    }

    pub fn sent(&self) -> Vec<(String, String, bool)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, p, _)| p)
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        _qos: u8,
        retain: bool,
    ) -> Result<(), PublishError> {
        if let Some(ref needle) = *self.failing.lock().unwrap() {
            if topic.contains(needle.as_str()) {
                return Err(PublishError::Rejected {
                    topic: topic.to_string(),
                    reason: "scripted failure".to_string(),
                });
            }
        }
        self.sent.lock().unwrap().push((
            topic.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
            retain,
        ));
        Ok(())
    }
}

/// Default config pointed at a local port, tuned for tests
pub fn test_config(port: u16) -> Config {
    let mut config = Config::default();
    config.environment = "testing".to_string();
    config.moonraker.host = "127.0.0.1".to_string();
    config.moonraker.port = port;
    config.moonraker.timeout = 2;
    config.moonraker.call_interval = 1;
    config
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
