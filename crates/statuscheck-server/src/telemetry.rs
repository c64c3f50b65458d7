//! Process logging and optional OpenTelemetry export.
//!
//! Logs go to stdout as pretty or JSON records. When telemetry is enabled,
//! spans are additionally exported over OTLP/gRPC.

use crate::config::{LoggingSettings, TelemetrySettings};
use common::LogFormat;
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Default log level when neither RUST_LOG nor the config sets one
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// OpenTelemetry tracer guard
///
/// When dropped, flushes all pending spans and shuts down the provider
pub struct TelemetryGuard {
    provider: TracerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("Failed to shut down tracer provider: {}", e);
        }
    }
}

/// Build an OTLP tracer provider
pub fn init_tracer_provider(
    service_name: &str,
    otlp_endpoint: &str,
) -> Result<TracerProvider, Box<dyn std::error::Error>> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .build()?;

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .build())
}

/// Install the global tracing subscriber.
///
/// RUST_LOG overrides the configured level. The returned guard, when
/// present, must live until the process exits.
pub fn init_tracing(
    logging: &LoggingSettings,
    telemetry: &TelemetrySettings,
) -> Result<Option<TelemetryGuard>, Box<dyn std::error::Error>> {
    let level = logging.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);

    let fmt_layer = match logging.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    let provider = if telemetry.enabled {
        Some(init_tracer_provider(
            &telemetry.service_name,
            &telemetry.otlp_endpoint,
        )?)
    } else {
        None
    };

    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer("statuscheck-server"))
    });

    tracing_subscriber::registry()
        .with(common::logging::env_filter(level))
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    match provider {
        Some(provider) => {
            opentelemetry::global::set_tracer_provider(provider.clone());
            tracing::info!(
                service_name = %telemetry.service_name,
                otlp_endpoint = %telemetry.otlp_endpoint,
                format = %logging.format,
                "Tracing initialized with OpenTelemetry export"
            );
            Ok(Some(TelemetryGuard { provider }))
        }
        None => {
            tracing::info!(format = %logging.format, level, "Tracing initialized");
            Ok(None)
        }
    }
}
