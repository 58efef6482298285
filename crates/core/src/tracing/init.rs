//! Subscriber setup: an `EnvFilter`, a fmt layer, and an OTLP span exporter
//! when the configuration names an endpoint

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::tracing::config::{InstrumentationConfig, OtlpConfig};

/// Install the global subscriber described by `config`
///
/// `RUST_LOG` wins over `config.log_level`. Fails if a subscriber is already set.
pub fn init_tracing(config: &InstrumentationConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let export = config
        .otlp
        .as_ref()
        .map(|otlp| otlp_layer(&config.service_name, otlp))
        .transpose()?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_names(true))
        .with(export)
        .try_init()?;

    #[cfg(not(feature = "tracing-otlp"))]
    if config.otlp.is_some() {
        tracing::warn!("OTLP endpoint configured but the tracing-otlp feature is disabled");
    }

    Ok(())
}

#[cfg(feature = "tracing-otlp")]
fn otlp_layer<S>(
    service_name: &str,
    otlp: &OtlpConfig,
) -> Result<tracing_opentelemetry::OpenTelemetryLayer<S, opentelemetry_sdk::trace::SdkTracer>>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::trace::SdkTracerProvider;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(&otlp.endpoint)
        .with_headers(otlp.headers.clone().unwrap_or_default())
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_string())
                .build(),
        )
        .build();

    Ok(tracing_opentelemetry::layer().with_tracer(provider.tracer("burrow")))
}

#[cfg(not(feature = "tracing-otlp"))]
#[allow(clippy::unnecessary_wraps)]
fn otlp_layer(
    _service_name: &str,
    _otlp: &OtlpConfig,
) -> Result<tracing_subscriber::layer::Identity> {
    Ok(tracing_subscriber::layer::Identity::new())
}
