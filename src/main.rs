use std::path::PathBuf;

use ::tracing::{error, info_span};
use clap::Parser;
use service::Service;

mod config;
mod configurator;
mod http_objects;
mod routes;
mod service;
mod tracing;
use crate::tracing::setup_tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => match config::AgentConfig::from_path(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error loading config {}: {err:#}", path.display());
                std::process::exit(1);
            }
        },
        None => config::AgentConfig::default(),
    };

    let tracing_provider = match setup_tracing(&config) {
        Ok(provider) => provider,
        Err(err) => {
            eprintln!("error setting up tracing: {err:#}");
            std::process::exit(1);
        }
    };

    let instance_id = config.instance_id();
    let root_span = info_span!(
        "netsync-agent",
        env = config.env,
        "netsync-instance" = instance_id
    );
    let _guard = root_span.enter();

    if config.telemetry.enable_metrics {
        if let Err(err) = metrics::init_provider(
            config.telemetry.endpoint.as_deref(),
            config.telemetry.metrics_interval,
            &instance_id,
        ) {
            error!("Error initializing metrics: {:?}", err);
        }
    }

    match Service::new(config) {
        Ok(service) => {
            if let Err(err) = service.start().await {
                error!("Error starting service: {:?}", err);
            }
        }
        Err(err) => error!("Error creating service: {:?}", err),
    }

    // export traces before shutdown
    if let Some(tracer_provider) = tracing_provider {
        if let Err(err) = tracer_provider.force_flush() {
            error!("Error flushing traces: {:?}", err);
        }
        if let Err(err) = tracer_provider.shutdown() {
            error!("Error shutting down tracer provider: {:?}", err);
        }
    }
}
