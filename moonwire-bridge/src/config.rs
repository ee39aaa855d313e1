//! Bridge configuration
//!
//! Settings live in a TOML file (default `moonwire.toml`) with three
//! sections plus a top-level `environment`:
//!
//! ```toml
//! environment = "development"
//!
//! [moonraker]
//! host = "localhost"
//! port = 7125
//! ssl = false
//! timeout = 30
//! auto_reconnect = true
//! max_reconnect_attempts = 10
//! call_interval = 2
//!
//! [moonraker.monitored_objects]
//! print_stats = []
//! toolhead = ["position"]
//!
//! [publish]
//! topic_prefix = "moonraker"
//! qos = 0
//! retain = false
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```
//!
//! An empty field list for a monitored object means "every field" and is
//! sent to Moonraker as `null`. Environment variables override the file;
//! values that do not parse are ignored.

use moonwire_client::{ClientConfig, ExponentialBackoff};
use moonwire_core::{LogFormat, ObservabilityConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "moonwire.toml";

const VALID_ENVIRONMENTS: &[&str] = &["development", "production", "testing"];
const VALID_LEVELS: &[&str] = &["debug", "info", "warn", "warning", "error"];
const VALID_FORMATS: &[&str] = &["text", "json"];

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration format: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub environment: String,
    pub moonraker: MoonrakerConfig,
    pub publish: PublishConfig,
    pub logging: LoggingConfig,
}

/// Where Moonraker lives and how to talk to it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MoonrakerConfig {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub ssl: bool,
    /// Request timeout in seconds
    pub timeout: u64,
    pub auto_reconnect: bool,
    /// 0 means unlimited
    pub max_reconnect_attempts: u32,
    /// Poll interval in seconds
    pub call_interval: u64,
    /// Object name to the fields to query; empty means all fields
    pub monitored_objects: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    pub topic_prefix: String,
    pub qos: u8,
    pub retain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            moonraker: MoonrakerConfig::default(),
            publish: PublishConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for MoonrakerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: moonwire_client::DEFAULT_PORT,
            api_key: None,
            ssl: false,
            timeout: moonwire_client::DEFAULT_REQUEST_TIMEOUT.as_secs(),
            auto_reconnect: true,
            max_reconnect_attempts: moonwire_client::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            call_interval: 2,
            monitored_objects: default_monitored_objects(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "moonraker".to_string(),
            qos: 0,
            retain: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

fn default_monitored_objects() -> BTreeMap<String, Vec<String>> {
    let fields = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    BTreeMap::from([
        ("print_stats".to_string(), Vec::new()),
        ("toolhead".to_string(), fields(&["position"])),
        ("extruder".to_string(), fields(&["temperature", "target"])),
        ("heater_bed".to_string(), fields(&["temperature", "target"])),
    ])
}

impl Config {
    /// Parse `path` with environment overrides applied, then validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, writing the defaults there first if it does not exist
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::default();
        config.validate()?;
        config.save(path)?;
        tracing::info!(path = %path.display(), "Created default configuration");

        let mut config = config;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Write the defaults to `path`, replacing whatever is there
    pub fn generate_default(path: impl AsRef<Path>) -> Result<()> {
        Self::default().save(path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup; empty and unparseable values
    /// are ignored
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ENVIRONMENT") {
            self.environment = v;
        }

        let m = &mut self.moonraker;
        if let Some(v) = get("MOONRAKER_HOST") {
            m.host = v;
        }
        if let Some(v) = get("MOONRAKER_PORT").and_then(|v| v.trim().parse().ok()) {
            m.port = v;
        }
        if let Some(v) = get("MOONRAKER_API_KEY") {
            m.api_key = Some(v);
        }
        if let Some(v) = get("MOONRAKER_SSL").and_then(|v| parse_bool(&v)) {
            m.ssl = v;
        }
        if let Some(v) = get("MOONRAKER_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
            m.timeout = v;
        }
        if let Some(v) = get("MOONRAKER_AUTO_RECONNECT").and_then(|v| parse_bool(&v)) {
            m.auto_reconnect = v;
        }
        if let Some(v) = get("MOONRAKER_MAX_RECONNECT_ATTEMPTS").and_then(|v| v.trim().parse().ok()) {
            m.max_reconnect_attempts = v;
        }
        if let Some(v) = get("MOONRAKER_CALL_INTERVAL").and_then(|v| v.trim().parse().ok()) {
            m.call_interval = v;
        }
        if let Some(raw) = get("MOONRAKER_MONITORED_OBJECTS") {
            match parse_monitored_objects(&raw) {
                Some(objects) => m.monitored_objects = objects,
                None => tracing::warn!(
                    value = %raw,
                    "Ignoring MOONRAKER_MONITORED_OBJECTS: expected a JSON object of null or string arrays"
                ),
            }
        }

        let p = &mut self.publish;
        if let Some(v) = get("PUBLISH_TOPIC_PREFIX") {
            p.topic_prefix = v;
        }
        if let Some(v) = get("PUBLISH_QOS").and_then(|v| v.trim().parse().ok()) {
            p.qos = v;
        }
        if let Some(v) = get("PUBLISH_RETAIN").and_then(|v| parse_bool(&v)) {
            p.retain = v;
        }

        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.logging.format = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.moonraker.validate()?;
        self.publish.validate()?;
        self.logging.validate()?;

        if !VALID_ENVIRONMENTS.contains(&self.environment.as_str()) {
            return Err(ConfigError::Validation(format!(
                "invalid environment '{}', must be one of: {}",
                self.environment,
                VALID_ENVIRONMENTS.join(", ")
            )));
        }
        Ok(())
    }

    /// Observability settings for this configuration
    pub fn observability(&self) -> ObservabilityConfig {
        let format = self.logging.format.parse().unwrap_or(LogFormat::Text);
        ObservabilityConfig::new("moonwire")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_log_level(self.logging.level.to_lowercase())
            .with_log_format(format)
    }
}

impl MoonrakerConfig {
    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(invalid("moonraker host cannot be empty"));
        }
        if self.port == 0 {
            return Err(invalid("moonraker port must be between 1 and 65535, got 0"));
        }
        if self.timeout == 0 {
            return Err(invalid("moonraker timeout must be positive"));
        }
        if self.call_interval == 0 {
            return Err(invalid("moonraker call interval must be positive"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn call_interval(&self) -> Duration {
        Duration::from_secs(self.call_interval)
    }

    /// `printer.objects.query` argument: empty field lists become `null`
    pub fn monitored_objects_value(&self) -> Value {
        let objects = self
            .monitored_objects
            .iter()
            .map(|(name, fields)| {
                let value = if fields.is_empty() {
                    Value::Null
                } else {
                    Value::from(fields.clone())
                };
                (name.clone(), value)
            })
            .collect();
        Value::Object(objects)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            port: self.port,
            tls: self.ssl,
            api_key: self.api_key.clone(),
            request_timeout: self.request_timeout(),
            auto_reconnect: self.auto_reconnect,
            max_reconnect_attempts: self.max_reconnect_attempts,
            backoff: Arc::new(ExponentialBackoff::default()),
            ..ClientConfig::default()
        }
    }
}

impl PublishConfig {
    fn validate(&self) -> Result<()> {
        if self.topic_prefix.trim().is_empty() {
            return Err(invalid("topic prefix cannot be empty"));
        }
        if self.topic_prefix.starts_with('/') || self.topic_prefix.ends_with('/') {
            return Err(ConfigError::Validation(format!(
                "topic prefix should not start or end with '/', got '{}'",
                self.topic_prefix
            )));
        }
        if self.qos > 2 {
            return Err(ConfigError::Validation(format!(
                "qos must be 0, 1, or 2, got {}",
                self.qos
            )));
        }
        Ok(())
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        let level = self.level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "invalid log level '{}', must be one of: {}",
                self.level,
                VALID_LEVELS.join(", ")
            )));
        }
        let format = self.format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "invalid log format '{}', must be one of: {}",
                self.format,
                VALID_FORMATS.join(", ")
            )));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation(message.to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

/// `{"name": null | ["field", ...]}`; null becomes an empty field list
fn parse_monitored_objects(raw: &str) -> Option<BTreeMap<String, Vec<String>>> {
    let parsed: BTreeMap<String, Option<Vec<String>>> = serde_json::from_str(raw.trim()).ok()?;
    Some(
        parsed
            .into_iter()
            .map(|(name, fields)| (name, fields.unwrap_or_default()))
            .collect(),
    )
}
