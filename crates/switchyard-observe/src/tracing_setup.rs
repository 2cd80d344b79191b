//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! The gateway's spans (`gen_ai.dispatch`, `gen_ai.stream.open`,
//! `gen_ai.stream.relay`, `gen_ai.completion`) carry `gen_ai.*` fields named
//! after the OTel GenAI semantic conventions, so they export as-is.
//!
//! # Usage
//!
//! ```no_run
//! use switchyard_observe::tracing_setup::{TracingOptions, init_tracing};
//!
//! init_tracing(&TracingOptions::default()).unwrap();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const TRACER_NAME: &str = "switchyard";

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: String,
    /// Emit JSON lines instead of human-readable logs.
    pub json: bool,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    pub otel: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            default_filter: "warn".to_string(),
            json: false,
            otel: false,
        }
    }
}

/// Resolve the log filter: `RUST_LOG` wins over the default.
fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Initialize the global tracing subscriber.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = env_filter(&options.default_filter);

    // Sits directly on the registry so both fmt branches share its type.
    let otel_layer = options.otel.then(|| {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer(TRACER_NAME);

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    if options.json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE);
        tracing_subscriber::registry()
            .with(otel_layer)
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE);
        tracing_subscriber::registry()
            .with(otel_layer)
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// A no-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_quiet_text_logs() {
        let options = TracingOptions::default();
        assert_eq!(options.default_filter, "warn");
        assert!(!options.json);
        assert!(!options.otel);
    }

    #[test]
    fn second_init_is_an_error() {
        let options = TracingOptions::default();
        // The first call may race with another test's subscriber; only the
        // second is guaranteed to fail.
        let _ = init_tracing(&options);
        assert!(init_tracing(&options).is_err());
    }

    #[test]
    fn shutdown_without_otel_is_noop() {
        shutdown_tracing();
    }
}
