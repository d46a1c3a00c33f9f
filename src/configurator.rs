//! Ingestion boundary between API clients and the reconciliation engine.

use std::{sync::Arc, time::Instant};

use anyhow::anyhow;
use data_model::{Config, KeyResult, KeyVal, ModelError};
use metrics::{api_stats, tracer::Tracer, Timer};
use opentelemetry::KeyValue;
use reconciler::{Notification, Orchestrator, PushError, PushOptions};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Data source reported for batches submitted through the API.
pub const HTTP_DATA_SRC: &str = "http";

#[derive(Debug, thiserror::Error)]
pub enum ConfiguratorError {
    #[error("{0}")]
    InvalidArgument(String),
    /// The batch was applied but at least one item failed. `results` says
    /// which ones.
    #[error("{message}")]
    FailedPrecondition {
        message: String,
        seq_num: u64,
        results: Vec<KeyResult>,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ModelError> for ConfiguratorError {
    fn from(err: ModelError) -> Self {
        ConfiguratorError::InvalidArgument(err.to_string())
    }
}

impl From<PushError> for ConfiguratorError {
    fn from(err: PushError) -> Self {
        match err {
            PushError::InvalidItem(err) => err.into(),
            PushError::Aborted(reason) => ConfiguratorError::Internal(anyhow!(reason)),
        }
    }
}

impl ConfiguratorError {
    /// Sequence number of the batch the error belongs to, if one was started.
    pub fn seq_num(&self) -> Option<u64> {
        match self {
            ConfiguratorError::FailedPrecondition { seq_num, .. } => Some(*seq_num),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Applied {
    pub seq_num: u64,
    pub results: Vec<KeyResult>,
}

/// Records how long an API operation took, on drop.
struct Tracked<'a> {
    tracer: Option<&'a dyn Tracer>,
    label: &'static str,
    started: Instant,
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        if let Some(tracer) = self.tracer {
            tracer.log_time(self.label, self.started);
        }
    }
}

pub struct Configurator {
    orchestrator: Arc<Orchestrator>,
    tracer: Option<Arc<dyn Tracer>>,
    stats: Arc<api_stats::Metrics>,
}

impl Configurator {
    pub fn new(orchestrator: Arc<Orchestrator>, tracer: Option<Arc<dyn Tracer>>) -> Self {
        Self {
            orchestrator,
            tracer,
            stats: Arc::new(api_stats::Metrics::new()),
        }
    }

    pub fn tracer(&self) -> Option<&Arc<dyn Tracer>> {
        self.tracer.as_ref()
    }

    fn track(&self, label: &'static str) -> (Tracked<'_>, Timer<'_, opentelemetry::metrics::Histogram<f64>>) {
        self.stats
            .requests
            .add(1, &[KeyValue::new("operation", label)]);
        let tracked = Tracked {
            tracer: self.tracer.as_deref(),
            label,
            started: Instant::now(),
        };
        let timer = Timer::start_with_labels(
            &self.stats.request_latency,
            vec![KeyValue::new("operation", label)],
        );
        (tracked, timer)
    }

    /// Everything currently registered, grouped by domain.
    pub fn get(&self) -> Config {
        let _tracked = self.track("Get");
        self.orchestrator.list_data().into_iter().collect()
    }

    /// Actual state of every kind the dataplane can dump.
    pub async fn dump(&self) -> Result<Config, ConfiguratorError> {
        let _tracked = self.track("Dump");
        let items = self.orchestrator.dump_data().await?;
        Ok(items.into_iter().collect())
    }

    pub async fn update(
        &self,
        config: Config,
        full_resync: bool,
    ) -> Result<Applied, ConfiguratorError> {
        let _tracked = self.track("Update");
        let batch = config
            .extract_items()
            .into_iter()
            .map(KeyVal::put)
            .collect::<Result<Vec<_>, _>>()?;
        let options = if full_resync {
            PushOptions::full_resync(HTTP_DATA_SRC)
        } else {
            PushOptions::incremental(HTTP_DATA_SRC)
        };
        self.push(batch, options).await
    }

    pub async fn delete(&self, config: Config) -> Result<Applied, ConfiguratorError> {
        let _tracked = self.track("Delete");
        let batch = config
            .extract_items()
            .iter()
            .map(|item| item.key().map(KeyVal::delete))
            .collect::<Result<Vec<_>, _>>()?;
        self.push(batch, PushOptions::incremental(HTTP_DATA_SRC)).await
    }

    pub fn notify(&self) -> broadcast::Receiver<Notification> {
        self.orchestrator.subscribe()
    }

    async fn push(
        &self,
        batch: Vec<KeyVal>,
        options: PushOptions,
    ) -> Result<Applied, ConfiguratorError> {
        let items = batch.len();
        let outcome = self.orchestrator.push_data(batch, options).await?;
        if let Some(err) = outcome.error {
            warn!(seq_num = outcome.seq_num, error = %err, "configuration applied with errors");
            return Err(ConfiguratorError::FailedPrecondition {
                message: err.to_string(),
                seq_num: outcome.seq_num,
                results: outcome.results,
            });
        }
        info!(seq_num = outcome.seq_num, items = items, "configuration applied");
        Ok(Applied {
            seq_num: outcome.seq_num,
            results: outcome.results,
        })
    }
}
