use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum_server::Handle;
use metrics::tracer::{InMemoryTracer, Tracer};
use reconciler::{iproute2::Iproute2, memory::MemoryDataplane, Drivers, Orchestrator};
use tokio::signal;
use tracing::{error, info};

use crate::{
    config::{AgentConfig, DataplaneDriverConfig, HostNetworkDriverConfig},
    configurator::Configurator,
    routes::{create_routes, RouteState},
};

fn build_drivers(config: &AgentConfig) -> Drivers {
    let mut drivers = match config.dataplane {
        DataplaneDriverConfig::Memory => MemoryDataplane::new().drivers(),
    };
    if let HostNetworkDriverConfig::Iproute2 { .. } = &config.host_network {
        let ip_binary = config.host_network.ip_binary().unwrap_or("ip");
        info!(ip_binary = ip_binary, "programming host networking through iproute2");
        let host = Arc::new(Iproute2::new(ip_binary));
        drivers.linux_routes = host.clone();
        drivers.linux_arps = host;
    }
    drivers
}

#[derive(Clone)]
pub struct Service {
    pub config: AgentConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub configurator: Arc<Configurator>,
}

impl Service {
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_drivers(config.clone(), build_drivers(&config)))
    }

    pub fn with_drivers(config: AgentConfig, drivers: Drivers) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            drivers,
            config.reconciler.prune_unowned,
        ));
        let tracer = config
            .diagnostics
            .enabled
            .then(|| {
                Arc::new(InMemoryTracer::with_capacity(
                    "configurator",
                    config.diagnostics.max_entries,
                )) as Arc<dyn Tracer>
            });
        let configurator = Arc::new(Configurator::new(orchestrator.clone(), tracer));
        Self {
            config,
            orchestrator,
            configurator,
        }
    }

    pub fn route_state(&self) -> RouteState {
        RouteState {
            configurator: self.configurator.clone(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("agent api listening on {}", self.config.listen_addr);
        let routes = create_routes(self.route_state());
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        info!(last_seq_num = self.orchestrator.last_seq_num(), "agent stopped");
        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    handle.graceful_shutdown(None);
    info!("signal received, shutting down agent gracefully");
}

#[cfg(test)]
mod tests {
    use reconciler::ResourceDriver;

    use super::*;

    #[test]
    fn test_iproute2_replaces_host_drivers() {
        let config = AgentConfig {
            host_network: HostNetworkDriverConfig::Iproute2 {
                ip_binary: Some("/nonexistent/ip".to_string()),
            },
            ..Default::default()
        };
        let drivers = build_drivers(&config);
        assert!(drivers.linux_routes.supports_dump());
        assert!(drivers.linux_arps.supports_dump());
        assert!(!drivers.proxy_arp_ranges.supports_dump());
    }

    #[test]
    fn test_diagnostics_can_be_disabled() -> Result<()> {
        let mut config = AgentConfig::default();
        config.diagnostics.enabled = false;
        let service = Service::new(config)?;
        assert!(service.configurator.tracer().is_none());
        Ok(())
    }

    #[test]
    fn test_diagnostics_keep_most_recent_entries() -> Result<()> {
        let mut config = AgentConfig::default();
        config.diagnostics.max_entries = 2;
        let service = Service::new(config)?;
        for _ in 0..5 {
            service.configurator.get();
        }
        let tracer = service
            .configurator
            .tracer()
            .ok_or_else(|| anyhow::anyhow!("diagnostics enabled by default"))?;
        let trace = tracer.get();
        assert_eq!(trace.entries.len(), 2);
        assert_eq!(trace.entries[1].index, 5);
        assert_eq!(trace.averages.len(), 1);
        Ok(())
    }
}
