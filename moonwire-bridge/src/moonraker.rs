//! Typed Moonraker API over a moonwire client
//!
//! Every call uses the client's configured request timeout and is cancelled
//! by the token the API was created with.

use crate::error::{BridgeError, Result};
use moonwire_client::MoonwireClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// `server.info` result
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerInfo {
    pub klippy_connected: bool,
    pub klippy_state: String,
    pub components: Vec<String>,
    pub failed_components: Vec<String>,
    pub registered_directories: Vec<String>,
    pub warnings: Vec<String>,
    pub websocket_count: u32,
    pub moonraker_version: String,
    /// Fields this type does not model, kept for republishing
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `printer.info` result
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrinterInfo {
    pub state: String,
    pub state_message: String,
    pub hostname: String,
    pub klipper_path: String,
    pub python_path: String,
    pub log_file: String,
    pub config_file: String,
    pub software_version: String,
    pub cpu_info: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Command payload: `{"command": "gcode", "params": {"script": "G28"}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandMessage {
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// A printer action a command payload can request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Gcode(String),
    EmergencyStop,
    Restart,
    FirmwareRestart,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Gcode(_) => "gcode",
            Command::EmergencyStop => "emergency_stop",
            Command::Restart => "restart",
            Command::FirmwareRestart => "firmware_restart",
        }
    }

    /// Decode a raw command payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let message: CommandMessage = serde_json::from_slice(payload)
            .map_err(|e| BridgeError::InvalidCommand(format!("malformed payload: {}", e)))?;
        Command::try_from(message)
    }
}

impl TryFrom<CommandMessage> for Command {
    type Error = BridgeError;

    fn try_from(message: CommandMessage) -> Result<Self> {
        match message.command.as_str() {
            "gcode" => match message.params.get("script").and_then(Value::as_str) {
                Some(script) => Ok(Command::Gcode(script.to_string())),
                None => Err(BridgeError::InvalidCommand(
                    "gcode requires a string 'script' parameter".to_string(),
                )),
            },
            "emergency_stop" => Ok(Command::EmergencyStop),
            "restart" => Ok(Command::Restart),
            "firmware_restart" => Ok(Command::FirmwareRestart),
            other => Err(BridgeError::InvalidCommand(format!("unknown command: {}", other))),
        }
    }
}

#[derive(Clone)]
pub struct MoonrakerApi {
    client: MoonwireClient,
    cancel: CancellationToken,
}

impl MoonrakerApi {
    pub fn new(client: MoonwireClient, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    pub fn client(&self) -> &MoonwireClient {
        &self.client
    }

    async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let timeout = self.client.config().request_timeout;
        Ok(self
            .client
            .request_cancellable(method, params, timeout, &self.cancel)
            .await?)
    }

    pub async fn server_info(&self) -> Result<ServerInfo> {
        self.call("server.info", ()).await
    }

    pub async fn printer_info(&self) -> Result<PrinterInfo> {
        self.call("printer.info", ()).await
    }

    /// Klippy state as reported by `server.info`
    pub async fn klippy_state(&self) -> Result<String> {
        Ok(self.server_info().await?.klippy_state)
    }

    /// Names of every loaded printer object
    pub async fn list_objects(&self) -> Result<Vec<String>> {
        let result: Value = self.call("printer.objects.list", ()).await?;
        let objects = result
            .get("objects")
            .and_then(Value::as_array)
            .ok_or_else(|| unexpected("printer.objects.list", "missing objects array"))?;
        Ok(objects
            .iter()
            .filter_map(|o| o.as_str().map(str::to_string))
            .collect())
    }

    /// Query printer objects; `objects` maps names to `null` or field lists
    ///
    /// Returns the per-object status with `eventtime` removed.
    pub async fn query_objects(&self, objects: &Value) -> Result<Map<String, Value>> {
        let result: Value = self
            .call("printer.objects.query", json!({ "objects": objects }))
            .await?;
        object_status("printer.objects.query", result)
    }

    /// Subscribe to status updates; the current values are returned
    pub async fn subscribe_objects(&self, objects: &Value) -> Result<Map<String, Value>> {
        let result: Value = self
            .call("printer.objects.subscribe", json!({ "objects": objects }))
            .await?;
        object_status("printer.objects.subscribe", result)
    }

    pub async fn websocket_id(&self) -> Result<u64> {
        let result: Value = self.call("server.websocket.id", ()).await?;
        result
            .get("websocket_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| unexpected("server.websocket.id", "missing websocket_id"))
    }

    pub async fn run_gcode(&self, script: &str) -> Result<()> {
        let _: Value = self
            .call("printer.gcode.script", json!({ "script": script }))
            .await?;
        Ok(())
    }

    pub async fn emergency_stop(&self) -> Result<()> {
        let _: Value = self.call("printer.emergency_stop", ()).await?;
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        let _: Value = self.call("printer.restart", ()).await?;
        Ok(())
    }

    pub async fn firmware_restart(&self) -> Result<()> {
        let _: Value = self.call("printer.firmware_restart", ()).await?;
        Ok(())
    }

    /// Parse a command payload and run it
    ///
    /// Unknown commands and a `gcode` command without a script are rejected
    /// before anything is sent.
    pub async fn handle_command(&self, payload: &[u8]) -> Result<()> {
        let command = match Command::parse(payload) {
            Ok(command) => command,
            Err(e) => {
                tracing::error!(error = %e, "Rejected command");
                return Err(e);
            }
        };
        let name = command.name();

        let result = self.execute(command).await;
        match &result {
            Ok(()) => tracing::info!(command = name, "Executed command"),
            Err(e) => tracing::error!(command = name, error = %e, "Command failed"),
        }
        result
    }

    pub async fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::Gcode(script) => self.run_gcode(&script).await,
            Command::EmergencyStop => self.emergency_stop().await,
            Command::Restart => self.restart().await,
            Command::FirmwareRestart => self.firmware_restart().await,
        }
    }
}

fn unexpected(method: &str, reason: &str) -> BridgeError {
    BridgeError::UnexpectedResponse {
        method: method.to_string(),
        reason: reason.to_string(),
    }
}

/// Unwrap `{"eventtime": .., "status": {..}}`, tolerating a bare map
fn object_status(method: &str, result: Value) -> Result<Map<String, Value>> {
    let Value::Object(mut top) = result else {
        return Err(unexpected(method, "result is not an object"));
    };

    let mut status = match top.remove("status") {
        Some(Value::Object(status)) => status,
        Some(_) => return Err(unexpected(method, "status is not an object")),
        None => top,
    };
    status.remove("eventtime");
    Ok(status)
}
