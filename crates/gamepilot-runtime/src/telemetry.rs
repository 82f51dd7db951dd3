//! Logging and trace export for gamepilot processes.
//!
//! [`init_tracing`] installs the global `tracing` subscriber once at startup.
//! Navigation, recovery and recognition all log through `tracing`, and the
//! spans opened by `#[instrument]` on [`Navigator::navigate_to`] and
//! [`RecoveryRunner::recover`] can be shipped to an OTLP collector.
//!
//! [`Navigator::navigate_to`]: crate::Navigator::navigate_to
//! [`RecoveryRunner::recover`]: crate::RecoveryRunner::recover
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector URL. Span export is enabled only when set. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `GAMEPILOT_LOG_FORMAT` | `json` for newline-delimited JSON, `pretty` for multi-line output, anything else for compact lines. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = gamepilot_runtime::telemetry::init_tracing("gamepilot");
//! tracing::info!("ready");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const TRACER_NAME: &str = "gamepilot";

// ─────────────────────────────────────────────────────────────────────────────
// Log format
// ─────────────────────────────────────────────────────────────────────────────

/// Console output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    /// Parse a `GAMEPILOT_LOG_FORMAT` value; unknown values fall back to
    /// [`LogFormat::Compact`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        }
    }

    pub fn from_env() -> Self {
        std::env::var("GAMEPILOT_LOG_FORMAT")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global subscriber with the format from `GAMEPILOT_LOG_FORMAT`.
///
/// Hold the returned guard for the lifetime of the process; dropping it
/// flushes pending spans.  A second call leaves the first subscriber in
/// place.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    init_tracing_with(service_name, LogFormat::from_env())
}

/// Like [`init_tracing`] with an explicit console format.
pub fn init_tracing_with(service_name: &str, format: LogFormat) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = build_provider(service_name);

    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(TRACER_NAME)));
    let compact = (format == LogFormat::Compact).then(|| fmt::layer().compact());
    let pretty = (format == LogFormat::Pretty).then(|| fmt::layer().pretty());
    let json = (format == LogFormat::Json).then(|| fmt::layer().json());

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(compact)
        .with(pretty)
        .with(json)
        .try_init();
    if let Err(e) = installed {
        eprintln!("[gamepilot] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts the span exporter down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Whether spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[gamepilot] span exporter shutdown failed: {e}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `None` when no endpoint is configured or the exporter cannot be built.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[gamepilot] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: the CLI installs tracing before its Tokio runtime exists.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Compact);
    }

    #[test]
    fn no_provider_without_endpoint() {
        // SAFETY: no other test in this crate reads this variable.
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        assert!(build_provider("gamepilot-test").is_none());
    }

    #[test]
    fn empty_guard_drops_quietly() {
        let guard = TracerProviderGuard(None);
        assert!(!guard.is_exporting());
        drop(guard);
    }
}
