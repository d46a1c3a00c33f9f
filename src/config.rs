use std::{fmt::Debug, net::SocketAddr, path::Path, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use metrics::tracer::DEFAULT_MAX_ENTRIES;
use serde_inline_default::serde_inline_default;
use uuid::Uuid;

const LOCAL_ENV: &str = "local";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9191";
const DEFAULT_IP_BINARY: &str = "ip";
const DEFAULT_METRICS_INTERVAL_SECS: u64 = 10;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingExporter {
    Stdout,
    Otlp,
}

/// Driver programming the software switch/router.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DataplaneDriverConfig {
    /// In-process simulated dataplane. Nothing leaves the agent.
    #[default]
    Memory,
}

/// Driver programming host routes and neighbor entries.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum HostNetworkDriverConfig {
    #[default]
    Memory,
    Iproute2 {
        /// Path to the `ip` binary. Default: "ip" (PATH lookup).
        #[serde(default)]
        ip_binary: Option<String>,
    },
}

impl HostNetworkDriverConfig {
    pub fn ip_binary(&self) -> Option<&str> {
        match self {
            HostNetworkDriverConfig::Memory => None,
            HostNetworkDriverConfig::Iproute2 { ip_binary } => {
                Some(ip_binary.as_deref().unwrap_or(DEFAULT_IP_BINARY))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Delete dumped entries that no desired item claims during a full
    /// resync. Off by default, so state created by other tools survives.
    #[serde(default)]
    pub prune_unowned: bool,
}

#[serde_inline_default]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Record elapsed time of every API operation.
    #[serde_inline_default(true)]
    pub enabled: bool,
    /// Most recent operations kept for `/diagnostics/trace`.
    #[serde_inline_default(DEFAULT_MAX_ENTRIES)]
    pub max_entries: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[serde_inline_default]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enable_metrics: bool,
    /// OpenTelemetry collector grpc endpoint for traces and metrics.
    /// Defaults to OTEL_EXPORTER_OTLP_ENDPOINT or localhost:4317.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Exporter for spans. Spans are not exported when unset.
    #[serde(default)]
    pub tracing_exporter: Option<TracingExporter>,
    /// Metrics export interval in seconds.
    #[serde_inline_default(Duration::from_secs(DEFAULT_METRICS_INTERVAL_SECS))]
    #[serde(with = "duration_serde")]
    pub metrics_interval: Duration,
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            endpoint: None,
            tracing_exporter: None,
            metrics_interval: Duration::from_secs(DEFAULT_METRICS_INTERVAL_SECS),
            instance_id: None,
        }
    }
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}

#[serde_inline_default]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Environment name (e.g., "local", "staging", "production").
    #[serde_inline_default(LOCAL_ENV.to_string())]
    pub env: String,
    #[serde_inline_default(DEFAULT_LISTEN_ADDR.to_string())]
    pub listen_addr: String,
    #[serde(default)]
    pub dataplane: DataplaneDriverConfig,
    #[serde(default)]
    pub host_network: HostNetworkDriverConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            env: LOCAL_ENV.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            dataplane: DataplaneDriverConfig::default(),
            host_network: HostNetworkDriverConfig::default(),
            reconciler: ReconcilerConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<AgentConfig> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(config_str: &str) -> Result<AgentConfig> {
        let config: AgentConfig = Figment::new().merge(Yaml::string(config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        if self.host_network.ip_binary() == Some("") {
            return Err(anyhow::anyhow!("host_network.ip_binary must not be empty"));
        }
        if self.telemetry.metrics_interval.is_zero() {
            return Err(anyhow::anyhow!("telemetry.metrics_interval must be positive"));
        }
        if self.diagnostics.max_entries == 0 {
            return Err(anyhow::anyhow!("diagnostics.max_entries must be positive"));
        }
        Ok(())
    }

    pub fn structured_logging(&self) -> bool {
        self.env != LOCAL_ENV
    }

    pub fn instance_id(&self) -> String {
        self.telemetry
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("netsync-agent-{}-{}", self.env, Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.env, "local");
        assert_eq!(config.listen_addr, "0.0.0.0:9191");
        assert_eq!(config.dataplane, DataplaneDriverConfig::Memory);
        assert_eq!(config.host_network, HostNetworkDriverConfig::Memory);
        assert!(!config.reconciler.prune_unowned);
        assert!(config.diagnostics.enabled);
        assert!(!config.structured_logging());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = AgentConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.telemetry.metrics_interval, Duration::from_secs(10));
        assert!(config.diagnostics.enabled);
    }

    #[test]
    fn test_production_config() {
        let yaml = r#"
env: production
listen_addr: "127.0.0.1:9000"
host_network:
  type: iproute2
  ip_binary: /usr/sbin/ip
reconciler:
  prune_unowned: true
diagnostics:
  enabled: false
  max_entries: 64
telemetry:
  enable_metrics: true
  endpoint: "http://otel-collector:4317"
  tracing_exporter: otlp
  metrics_interval: 30
  instance_id: agent-7
"#;
        let config = AgentConfig::from_yaml_str(yaml).unwrap();
        assert!(config.structured_logging());
        assert_eq!(config.host_network.ip_binary(), Some("/usr/sbin/ip"));
        assert!(config.reconciler.prune_unowned);
        assert!(!config.diagnostics.enabled);
        assert_eq!(config.diagnostics.max_entries, 64);
        assert_eq!(config.telemetry.tracing_exporter, Some(TracingExporter::Otlp));
        assert_eq!(config.telemetry.metrics_interval, Duration::from_secs(30));
        assert_eq!(config.instance_id(), "agent-7");
    }

    #[test]
    fn test_iproute2_defaults_to_path_lookup() {
        let yaml = r#"
host_network:
  type: iproute2
"#;
        let config = AgentConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.host_network.ip_binary(), Some("ip"));
    }

    #[test]
    fn test_invalid_listen_addr() {
        let err = AgentConfig::from_yaml_str("listen_addr: not-an-address").unwrap_err();
        assert!(err.to_string().contains("invalid listen address"));
    }

    #[test]
    fn test_unknown_driver_type() {
        let yaml = r#"
dataplane:
  type: vpp_binapi
"#;
        assert!(AgentConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_generated_instance_id() {
        let config = AgentConfig::default();
        assert!(config.instance_id().starts_with("netsync-agent-local-"));
    }

    #[test]
    fn test_from_path() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "env: staging")?;
        writeln!(file, "listen_addr: \"127.0.0.1:0\"")?;
        let config = AgentConfig::from_path(file.path())?;
        assert_eq!(config.env, "staging");
        assert_eq!(config.listen_addr, "127.0.0.1:0");

        assert!(AgentConfig::from_path(file.path().with_extension("missing")).is_err());
        Ok(())
    }
}
