use std::borrow::Cow;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer};

/// Flushes the global tracer provider when dropped. Keep it alive for the
/// lifetime of `main`.
pub struct OtelGuard {
    _private: (),
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Counts ERROR events so degraded runs show up on dashboards, not only in logs.
struct ErrorCounterLayer;

impl<S> Layer<S> for ErrorCounterLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::ERROR {
            metrics::counter!("walletgraph_tracing_error_events").increment(1);
        }
    }
}

/// Build the process `tracing` dispatcher:
/// - JSON logs to stdout
/// - `RUST_LOG` filter, falling back to `default_level`
/// - `walletgraph_tracing_error_events` counter
/// - OTLP span export when `OTEL_EXPORTER_OTLP_ENDPOINT` is set
pub fn build_dispatch(
    service_name: impl Into<Cow<'static, str>>,
    default_level: &str,
) -> (tracing::Dispatch, Option<OtelGuard>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .json();

    let tracer = otlp_tracer(service_name.into());
    let guard = tracer.as_ref().map(|_| OtelGuard { _private: () });
    let otel_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(ErrorCounterLayer)
        .with(otel_layer);

    (tracing::Dispatch::new(subscriber), guard)
}

/// OTLP/HTTP tracer, or `None` when export is not configured or the exporter
/// cannot be built. Must be called inside a Tokio runtime.
fn otlp_tracer(service_name: Cow<'static, str>) -> Option<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_otlp::WithExportConfig;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            // The subscriber is not installed yet, so stderr is the only sink.
            eprintln!("walletgraph: OTLP exporter disabled: {e}");
            return None;
        }
    };

    let resource = Resource::new(vec![KeyValue::new(
        "service.name",
        service_name.into_owned(),
    )]);

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("walletgraph");
    let _ = opentelemetry::global::set_tracer_provider(provider);
    Some(tracer)
}
