use std::io::IsTerminal;

use anyhow::Result;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{SpanExporter as OtlpSpanExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    trace::{BatchSpanProcessor, SdkTracerProvider, TracerProviderBuilder},
    Resource,
};
use opentelemetry_stdout::SpanExporter as StdoutSpanExporter;
use tracing::Metadata;
use tracing_subscriber::{
    filter::FilterExt,
    layer::{self, Filter, SubscriberExt},
    Layer,
};

use crate::config::{AgentConfig, TracingExporter};

const SERVICE_NAME: &str = "netsync-agent";

/// Keeps spans of the HTTP and runtime plumbing out of exported traces.
struct NoisyModulesFilter;

impl<S> Filter<S> for NoisyModulesFilter {
    fn enabled(&self, metadata: &Metadata<'_>, _: &layer::Context<'_, S>) -> bool {
        let target = metadata.target();
        !target.starts_with("h2::") && !target.starts_with("tokio::") && !target.starts_with("hyper")
    }
}

pub fn get_env_filter() -> tracing_subscriber::EnvFilter {
    // RUST_LOG used to control logging level.
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::default()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    })
}

pub fn get_log_layer<S>(config: &AgentConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    S: tracing::Subscriber,
{
    if config.structured_logging() {
        return Box::new(
            json_subscriber::fmt::layer()
                .with_span_list(false)
                .flatten_event(true)
                .flatten_current_span_on_top_level(true),
        );
    }

    Box::new(
        tracing_subscriber::fmt::layer()
            .with_ansi(std::io::stderr().is_terminal())
            .compact(),
    )
}

fn tracer_provider(exporter: &TracingExporter, endpoint: Option<&str>) -> Result<SdkTracerProvider> {
    let builder = TracerProviderBuilder::default().with_resource(
        Resource::builder_empty()
            .with_service_name(SERVICE_NAME)
            .build(),
    );
    let provider = match exporter {
        TracingExporter::Otlp => {
            let mut otlp = OtlpSpanExporter::builder()
                .with_tonic()
                .with_compression(opentelemetry_otlp::Compression::Gzip);
            if let Some(endpoint) = endpoint {
                otlp = otlp.with_endpoint(endpoint);
            }
            let batch_processor = BatchSpanProcessor::builder(otlp.build()?).build();
            builder.with_span_processor(batch_processor).build()
        }
        TracingExporter::Stdout => builder
            .with_simple_exporter(StdoutSpanExporter::default())
            .build(),
    };
    Ok(provider)
}

/// Installs the global subscriber. The returned provider must be flushed and
/// shut down before exit so buffered spans are exported.
pub fn setup_tracing(config: &AgentConfig) -> Result<Option<SdkTracerProvider>> {
    let env_filter_layer = get_env_filter();
    let base = tracing_subscriber::Registry::default();

    let Some(exporter) = &config.telemetry.tracing_exporter else {
        let log_layer = get_log_layer(config).with_filter(env_filter_layer);
        tracing::subscriber::set_global_default(base.with(log_layer))?;
        return Ok(None);
    };

    let provider = tracer_provider(exporter, config.telemetry.endpoint.as_deref())?;
    let span_layer = tracing_opentelemetry::layer()
        .with_tracer(provider.tracer(SERVICE_NAME))
        .with_filter(NoisyModulesFilter.and(get_env_filter()));
    let log_layer = get_log_layer(config).with_filter(env_filter_layer);
    tracing::subscriber::set_global_default(base.with(span_layer).with(log_layer))?;
    Ok(Some(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exporter_config(yaml: &str) -> Result<AgentConfig> {
        AgentConfig::from_yaml_str(yaml)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_otlp_exporter_builds_with_compression() -> Result<()> {
        let config = exporter_config(
            r#"
telemetry:
  tracing_exporter: otlp
  endpoint: http://127.0.0.1:4317
"#,
        )?;
        let exporter = config
            .telemetry
            .tracing_exporter
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("exporter not set"))?;
        let provider = tracer_provider(exporter, config.telemetry.endpoint.as_deref())?;
        let _tracer = provider.tracer(SERVICE_NAME);
        Ok(())
    }

    #[test]
    fn test_stdout_exporter_builds() -> Result<()> {
        let config = exporter_config("telemetry:\n  tracing_exporter: stdout\n")?;
        let exporter = config
            .telemetry
            .tracing_exporter
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("exporter not set"))?;
        tracer_provider(exporter, None)?;
        Ok(())
    }
}
