//! Logging and Tracing Pipeline
//!
//! Wires the bridge's `tracing` output: a console layer in either plain text
//! or JSON lines (the format the bridge's log tooling ingests), plus an
//! optional OpenTelemetry OTLP span exporter. Export is best-effort: if the
//! exporter cannot be built the bridge keeps running with local logging
//! only, because telemetry delivery must never gate trade flow.
//!
//! # Environment Variables
//!
//! - `BRIDGE_LOG_FORMAT`: "text" | "json" (default: text)
//! - `OTEL_ENABLED`: Set to "false" to disable span export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: hedge-bridge)
//! - `RUST_LOG`: Full filter override; when set it replaces the built-in
//!   defaults entirely

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Service name for OpenTelemetry traces.
const DEFAULT_SERVICE_NAME: &str = "hedge-bridge";

/// Default OTLP endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Transport crates whose info-level output drowns the bridge's own logs.
/// Capped at warn unless `RUST_LOG` takes over.
const NOISY_DEPS: &[&str] = &["h2", "hyper", "tower", "tonic"];

// =============================================================================
// Configuration
// =============================================================================

/// Console log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line text.
    #[default]
    Text,
    /// JSON lines, one event per line, for the unified log pipeline.
    Json,
}

impl LogFormat {
    /// Parse a format name, case-insensitively. Unknown names fall back to
    /// text.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" | "jsonl" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Console log format.
    pub log_format: LogFormat,
    /// Whether OpenTelemetry span export is enabled.
    pub otel_enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            otel_enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_format: std::env::var("BRIDGE_LOG_FORMAT")
                .map(|v| LogFormat::from_str_case_insensitive(&v))
                .unwrap_or(defaults.log_format),
            otel_enabled: std::env::var("OTEL_ENABLED")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(defaults.otel_enabled),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or(defaults.otlp_endpoint),
            service_name: std::env::var("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }
}

// =============================================================================
// Guard
// =============================================================================

/// Flushes and shuts down the span exporter when dropped. Hold it for the
/// lifetime of the process.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(provider) = self.tracer_provider.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            eprintln!("span exporter shutdown failed: {e}");
        }
    }
}

// =============================================================================
// Initialization
// =============================================================================

/// Initialize telemetry with configuration from the environment.
///
/// Returns a guard that must be kept alive for the duration of the program.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize telemetry with custom configuration.
///
/// Returns a guard that must be kept alive for the duration of the program.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let fmt_layer = match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .boxed(),
    };

    let tracer_provider = if config.otel_enabled {
        build_tracer_provider(&config)
    } else {
        None
    };
    let otel_layer = tracer_provider.as_ref().map(|provider| {
        let tracer = provider.tracer(config.service_name.clone());
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    TelemetryGuard { tracer_provider }
}

/// Default filter: the bridge at info, transport crates capped at warn.
/// `RUST_LOG`, when present, replaces the defaults wholesale so operators
/// can raise transport logging without fighting the built-ins.
fn build_env_filter() -> EnvFilter {
    if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
        return EnvFilter::from_default_env();
    }
    let mut filter = EnvFilter::new("info");
    for dep in NOISY_DEPS {
        if let Ok(directive) = format!("{dep}=warn").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Build the OTLP tracer provider, or `None` when the exporter cannot be
/// constructed. The bridge falls back to local logging rather than refusing
/// to start.
fn build_tracer_provider(config: &TelemetryConfig) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("OTLP exporter unavailable, continuing without span export: {e}");
            return None;
        }
    };

    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                opentelemetry_sdk::Resource::builder()
                    .with_service_name(config.service_name.clone())
                    .build(),
            )
            .build(),
    )
}

// =============================================================================
// Tests
// =============================================================================
