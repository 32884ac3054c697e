//! Telemetry setup for OpenTelemetry integration

use anyhow::Result;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Service name reported when OTEL_SERVICE_NAME is unset
#[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
const SERVICE_NAME: &str = "volley";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Build the OpenTelemetry layer if enabled
///
/// # Environment Variables
///
/// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317)
/// - `OTEL_SERVICE_NAME`: Service name (default: volley)
///
/// Must be called inside the tokio runtime; spans are exported in batches.
pub fn layer<S>() -> Result<Option<BoxedLayer<S>>>
where
    S: Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
{
    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok(None);
    };

    otel_layer(&endpoint)
}

#[cfg(not(feature = "telemetry"))]
fn otel_layer<S>(endpoint: &str) -> Result<Option<BoxedLayer<S>>>
where
    S: Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
{
    // The subscriber is not installed yet
    eprintln!(
        "OTEL_EXPORTER_OTLP_ENDPOINT={} ignored: rebuild with --features telemetry",
        endpoint
    );
    Ok(None)
}

#[cfg(feature = "telemetry")]
fn otel_layer<S>(endpoint: &str) -> Result<Option<BoxedLayer<S>>>
where
    S: Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
{
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| SERVICE_NAME.to_string());

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();
    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer).boxed()))
}

/// Flush pending spans
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}
