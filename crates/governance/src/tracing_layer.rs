//! Logging and distributed tracing setup.

use cowork_core::{Error, Result};
use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Install the global subscriber.
///
/// `RUST_LOG` controls filtering. When `OTEL_EXPORTER_OTLP_ENDPOINT` is set,
/// spans are also exported over OTLP.
pub fn configure_tracing(json: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,cowork=debug".into()),
    );

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let provider = otlp_provider(&endpoint)?;
        let tracer = provider.tracer("cowork");
        opentelemetry::global::set_tracer_provider(provider);

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        registry
            .with(otel_layer)
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install subscriber: {}", e)))?;
        tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
    } else {
        registry
            .try_init()
            .map_err(|e| Error::internal(format!("Failed to install subscriber: {}", e)))?;
    }

    Ok(())
}

/// Batch OTLP exporter. The collector connection is made lazily.
fn otlp_provider(endpoint: &str) -> Result<sdktrace::TracerProvider> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(
            sdktrace::Config::default().with_resource(Resource::new(vec![KeyValue::new(
                "service.name",
                "cowork",
            )])),
        )
        .install_batch(runtime::Tokio)
        .map_err(|e| Error::Config(format!("Failed to install OTLP pipeline: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Batch shutdown on drop needs a second worker thread.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_otlp_provider_yields_tracer_without_collector() {
        let provider = otlp_provider("http://127.0.0.1:4317").unwrap();
        let tracer = provider.tracer("cowork");
        let _layer = tracing_opentelemetry::layer::<tracing_subscriber::Registry>().with_tracer(tracer);
    }
}
