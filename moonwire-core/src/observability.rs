//! Logging, tracing and metrics initialization
//!
//! Every crate in the workspace logs through `tracing` macros. This module
//! installs the one subscriber that turns those events into output:
//!
//! 1. **EnvFilter**: `RUST_LOG` when set, otherwise the configured level
//! 2. **fmt layer**: human-readable text or one JSON object per line
//! 3. **OpenTelemetry layer** (optional): spans exported over OTLP/gRPC
//!
//! When an OTLP endpoint is configured a meter provider is registered
//! globally as well, so `ClientMetrics` instruments export to the collector.
//! Without an endpoint the global meter is a no-op and only logs are emitted.
//!
//! # Usage Pattern
//!
//! ```rust,no_run
//! use moonwire_core::{LogFormat, ObservabilityConfig};
//!
//! let config = ObservabilityConfig::new("moonwire")
//!     .with_log_level("debug")
//!     .with_log_format(LogFormat::Json);
//!
//! moonwire_core::init_observability(config).expect("observability");
//! tracing::info!("bridge starting");
//! moonwire_core::shutdown_observability();
//! ```

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();
static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Output format of the local log stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line text
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Observability configuration
///
/// # Defaults
///
/// - Service name: "moonwire"
/// - Service version: the crate version
/// - OTLP endpoint: `$OTEL_EXPORTER_OTLP_ENDPOINT` if set, otherwise none
/// - Traces and metrics enabled (only effective with an endpoint)
/// - Log level: "info"
/// - Log format: text
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to exported spans and metrics
    pub service_name: String,

    /// Service version attached to exported spans and metrics
    pub service_version: String,

    /// OTLP/gRPC collector endpoint; `None` disables export entirely
    pub otlp_endpoint: Option<String>,

    /// Export spans when an endpoint is set
    pub enable_traces: bool,

    /// Export metrics when an endpoint is set
    pub enable_metrics: bool,

    /// Level used when `RUST_LOG` is not set ("debug", "info", "warn", "error")
    pub log_level: String,

    /// Local log output format
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "moonwire".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            enable_traces: true,
            enable_metrics: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ObservabilityConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the OTLP collector endpoint (e.g. "http://collector:4317")
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Disable OTLP export regardless of the environment
    pub fn without_export(mut self) -> Self {
        self.otlp_endpoint = None;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// The `EnvFilter` directive for the configured level
    ///
    /// "warning" is accepted as a synonym for "warn".
    pub fn filter_directive(&self) -> String {
        match self.log_level.to_ascii_lowercase().as_str() {
            "warning" => "warn".to_string(),
            other => other.to_string(),
        }
    }

    fn resource(&self) -> opentelemetry_sdk::Resource {
        opentelemetry_sdk::Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Install the global subscriber and, with an endpoint, the OTLP providers
///
/// Call once at startup. A second call fails because the global subscriber
/// is already set.
///
/// # Errors
///
/// - the log level is not a valid filter directive
/// - an OTLP exporter could not be built
/// - a global subscriber is already installed
pub fn init_observability(config: ObservabilityConfig) -> Result<(), BoxError> {
    let endpoint = config.otlp_endpoint.clone();

    let tracer = match (&endpoint, config.enable_traces) {
        (Some(endpoint), true) => Some(init_tracer(&config, endpoint)?),
        _ => None,
    };

    if let (Some(endpoint), true) = (&endpoint, config.enable_metrics) {
        init_metrics(&config, endpoint)?;
    }

    init_tracing_subscriber(&config, tracer)?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = endpoint.as_deref().unwrap_or("none"),
        log_format = %config.log_format,
        "Observability initialized"
    );

    Ok(())
}

fn init_tracer(
    config: &ObservabilityConfig,
    endpoint: &str,
) -> Result<opentelemetry_sdk::trace::Tracer, BoxError> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();

    // The tracer must be taken before the provider is handed to the global.
    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider.clone());
    let _ = TRACER_PROVIDER.set(provider);

    Ok(tracer)
}

fn init_metrics(config: &ObservabilityConfig, endpoint: &str) -> Result<(), BoxError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(30))
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build();

    global::set_meter_provider(provider.clone());
    let _ = METER_PROVIDER.set(provider);
    Ok(())
}

fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> Result<(), BoxError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directive()))?;

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .json()
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed(),
    };

    let telemetry_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(telemetry_layer)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

/// Flush and shut down the OTLP providers, if any were installed
///
/// Safe to call more than once and safe to call when nothing was exported.
pub fn shutdown_observability() {
    tracing::info!("Shutting down observability");

    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::debug!(error = %e, "Tracer provider shutdown");
        }
    }
    if let Some(provider) = METER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::debug!(error = %e, "Meter provider shutdown");
        }
    }
}
