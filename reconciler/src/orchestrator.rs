//! Applies batches of desired changes across all resource kinds.
//!
//! Every batch is a transaction with its own sequence number. Transactions
//! run one at a time on a spawned task, so a caller going away mid-batch
//! never leaves the registries out of step with the dataplane.
//!
//! Incremental batches delete first, in reverse kind order, then upsert in
//! kind order. Full resync batches correlate each kind present in the batch
//! against dumped state, then prune stale entries in reverse kind order.

use std::{
    cmp::Reverse,
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context, Result};
use data_model::{ConfigItem, Dependency, ItemStatus, KeyResult, KeyVal, ModelError, ResourceKind};
use itertools::Itertools;
use metrics::{reconciler_stats, Timer};
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{
    driver::Drivers,
    kind::{KindHandler, KindReconciler},
    Op,
    Outcome,
};

const NOTIFICATION_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct PushOptions {
    pub full_resync: bool,
    /// Who submitted the batch, e.g. `http`.
    pub data_src: String,
}

impl PushOptions {
    pub fn incremental(data_src: &str) -> Self {
        Self {
            full_resync: false,
            data_src: data_src.to_string(),
        }
    }

    pub fn full_resync(data_src: &str) -> Self {
        Self {
            full_resync: true,
            data_src: data_src.to_string(),
        }
    }

    fn mode(&self) -> &'static str {
        if self.full_resync {
            "full_resync"
        } else {
            "incremental"
        }
    }
}

/// The last item failure of a batch.
#[derive(Debug, thiserror::Error)]
#[error("{op} {key} failed: {source:#}")]
pub struct ApplyError {
    pub key: String,
    pub op: Op,
    pub source: anyhow::Error,
}

/// A batch that could not be applied at all.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error(transparent)]
    InvalidItem(#[from] ModelError),
    #[error("reconciliation task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug)]
pub struct PushOutcome {
    pub seq_num: u64,
    /// One result per submitted item, then results of pruned entries, then
    /// the `seqnum` result.
    pub results: Vec<KeyResult>,
    pub error: Option<ApplyError>,
}

/// Outcome of a finished batch, pushed to every subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub seq_num: u64,
    pub data_src: String,
    pub full_resync: bool,
    pub results: Vec<KeyResult>,
    pub error: Option<String>,
}

/// Results of one transaction, with the last failure seen.
struct Txn {
    results: Vec<Option<KeyResult>>,
    pruned: Vec<KeyResult>,
    error: Option<ApplyError>,
}

impl Txn {
    fn new(len: usize) -> Self {
        Self {
            results: (0..len).map(|_| None).collect(),
            pruned: Vec::new(),
            error: None,
        }
    }

    fn status(&mut self, key: &str, op: Op, result: Result<Outcome>) -> ItemStatus {
        match result {
            Ok(outcome) => ItemStatus::ok(outcome.as_ref()),
            Err(source) => {
                let status = ItemStatus::failed(format!("{source:#}"));
                self.error = Some(ApplyError {
                    key: key.to_string(),
                    op,
                    source,
                });
                status
            }
        }
    }

    fn record(&mut self, pos: usize, key: String, op: Op, result: Result<Outcome>) {
        let status = self.status(&key, op, result);
        self.results[pos] = Some(KeyResult { key, status });
    }

    fn record_pruned(&mut self, key: String, result: Result<Outcome>) {
        let status = self.status(&key, Op::Prune, result);
        self.pruned.push(KeyResult { key, status });
    }

    fn finish(self, seq_num: u64) -> (Vec<KeyResult>, Option<ApplyError>) {
        let mut results: Vec<KeyResult> = self.results.into_iter().flatten().collect();
        results.extend(self.pruned);
        results.push(KeyResult::seqnum(seq_num));
        (results, self.error)
    }
}

pub struct Orchestrator {
    // Indexed by `ResourceKind::position`.
    handlers: Vec<Arc<dyn KindReconciler>>,
    txn_lock: Mutex<()>,
    last_seq: AtomicU64,
    notifications: broadcast::Sender<Notification>,
    prune_unowned: bool,
    stats: Arc<reconciler_stats::Metrics>,
}

impl Orchestrator {
    pub fn new(drivers: Drivers, prune_unowned: bool) -> Self {
        let stats = Arc::new(reconciler_stats::Metrics::new());
        let handlers: Vec<Arc<dyn KindReconciler>> = vec![
            Arc::new(KindHandler::new(drivers.vpp_interfaces, stats.clone())),
            Arc::new(KindHandler::new(drivers.vpp_routes, stats.clone())),
            Arc::new(KindHandler::new(drivers.vpp_arps, stats.clone())),
            Arc::new(KindHandler::new(drivers.proxy_arp_interfaces, stats.clone())),
            Arc::new(KindHandler::new(drivers.proxy_arp_ranges, stats.clone())),
            Arc::new(KindHandler::new(drivers.linux_routes, stats.clone())),
            Arc::new(KindHandler::new(drivers.linux_arps, stats.clone())),
            Arc::new(KindHandler::new(drivers.ip_allocations, stats.clone())),
        ];
        debug_assert!(handlers
            .iter()
            .enumerate()
            .all(|(pos, handler)| handler.kind().position() == pos));
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            handlers,
            txn_lock: Mutex::new(()),
            last_seq: AtomicU64::new(0),
            notifications,
            prune_unowned,
            stats,
        }
    }

    fn handler(&self, kind: ResourceKind) -> &Arc<dyn KindReconciler> {
        &self.handlers[kind.position()]
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Sequence number of the last started batch, 0 before the first.
    pub fn last_seq_num(&self) -> u64 {
        self.last_seq.load(Ordering::SeqCst)
    }

    /// Everything currently registered, in kind order.
    pub fn list_data(&self) -> Vec<ConfigItem> {
        self.handlers
            .iter()
            .flat_map(|handler| handler.registered())
            .collect()
    }

    /// Actual dataplane state of every kind that can be dumped.
    pub async fn dump_data(&self) -> Result<Vec<ConfigItem>> {
        let mut items = Vec::new();
        for handler in self.handlers.iter().filter(|h| h.supports_dump()) {
            let dumped = handler
                .dump()
                .await
                .with_context(|| format!("dump of {} failed", handler.kind()))?;
            items.extend(dumped);
        }
        Ok(items)
    }

    /// Checks every key and value of `batch` before anything is applied.
    fn validate(batch: &[KeyVal]) -> Result<Vec<ResourceKind>, ModelError> {
        batch
            .iter()
            .map(|kv| {
                let kind = ResourceKind::from_key(&kv.key)?;
                if let Some(item) = &kv.value {
                    if item.kind() != kind || item.key()? != kv.key {
                        return Err(ModelError::KeyMismatch {
                            key: kv.key.clone(),
                            kind: item.kind(),
                        });
                    }
                }
                Ok(kind)
            })
            .collect()
    }

    pub async fn push_data(
        self: &Arc<Self>,
        batch: Vec<KeyVal>,
        options: PushOptions,
    ) -> Result<PushOutcome, PushError> {
        let kinds = Self::validate(&batch)?;
        let this = self.clone();
        tokio::spawn(async move { this.run(batch, kinds, options).await })
            .await
            .map_err(|e| PushError::Aborted(e.to_string()))
    }

    async fn run(&self, batch: Vec<KeyVal>, kinds: Vec<ResourceKind>, options: PushOptions) -> PushOutcome {
        let _txn_guard = self.txn_lock.lock().await;
        let seq_num = self.last_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mode = options.mode();
        let _timer = Timer::start_with_labels(&self.stats.batch_latency, vec![KeyValue::new("mode", mode)]);
        info!(
            seq_num = seq_num,
            data_src = %options.data_src,
            mode = mode,
            items = batch.len(),
            "applying batch"
        );

        let mut txn = Txn::new(batch.len());
        if options.full_resync {
            self.resync(batch, &kinds, &mut txn).await;
        } else {
            self.incremental(batch, &kinds, &mut txn).await;
        }
        let (results, error) = txn.finish(seq_num);

        self.stats.batches.add(1, &[KeyValue::new("mode", mode)]);
        match &error {
            Some(err) => warn!(seq_num = seq_num, error = %err, "batch finished with errors"),
            None => info!(seq_num = seq_num, "batch applied"),
        }
        // No subscribers is fine.
        let _ = self.notifications.send(Notification {
            seq_num,
            data_src: options.data_src,
            full_resync: options.full_resync,
            results: results.clone(),
            error: error.as_ref().map(|e| e.to_string()),
        });

        PushOutcome {
            seq_num,
            results,
            error,
        }
    }

    fn missing_dependency(&self, item: &ConfigItem) -> Option<Dependency> {
        item.dependencies()
            .into_iter()
            .find(|dep| !self.handler(dep.kind).is_registered(&dep.name))
    }

    fn dependency_error(&self, dep: &Dependency) -> anyhow::Error {
        self.stats
            .missing_dependencies
            .add(1, &[KeyValue::new("kind", dep.kind.to_string())]);
        anyhow!("missing dependency: {} {:?} is not configured", dep.kind, dep.name)
    }

    async fn incremental(&self, batch: Vec<KeyVal>, kinds: &[ResourceKind], txn: &mut Txn) {
        let (deletes, upserts): (Vec<usize>, Vec<usize>) =
            (0..batch.len()).partition(|&pos| batch[pos].value.is_none());
        let deletes = deletes.into_iter().sorted_by_key(|&pos| Reverse(kinds[pos]));
        let upserts = upserts.into_iter().sorted_by_key(|&pos| kinds[pos]);
        let mut slots: Vec<Option<KeyVal>> = batch.into_iter().map(Some).collect();

        for pos in deletes.chain(upserts) {
            let Some(KeyVal { key, value }) = slots[pos].take() else {
                continue;
            };
            let kind = kinds[pos];
            let handler = self.handler(kind);
            match value {
                None => {
                    let name = &key[kind.key_prefix().len()..];
                    let result = handler.remove(name).await;
                    txn.record(pos, key, Op::Delete, result);
                }
                Some(item) => {
                    let result = match self.missing_dependency(&item) {
                        Some(dep) => Err(self.dependency_error(&dep)),
                        None => handler.upsert(item).await,
                    };
                    txn.record(pos, key, Op::Configure, result);
                }
            }
        }
    }

    async fn resync(&self, batch: Vec<KeyVal>, kinds: &[ResourceKind], txn: &mut Txn) {
        let mut by_kind: BTreeMap<ResourceKind, Vec<(usize, KeyVal)>> = BTreeMap::new();
        for (pos, kv) in batch.into_iter().enumerate() {
            by_kind.entry(kinds[pos]).or_default().push((pos, kv));
        }

        let mut pruning = Vec::new();
        for (kind, items) in by_kind {
            let handler = self.handler(kind).clone();
            let mut desired = Vec::new();
            let mut desired_keys = Vec::new();
            // Submitted but not applied; whatever is registered under these
            // names stays.
            let mut held = Vec::new();
            for (pos, KeyVal { key, value }) in items {
                let name = key[kind.key_prefix().len()..].to_string();
                match value {
                    None => {
                        held.push(name);
                        txn.record(pos, key, Op::Resync, Ok(Outcome::Omitted));
                    }
                    Some(item) => match self.missing_dependency(&item) {
                        Some(dep) => {
                            held.push(name);
                            let err = self.dependency_error(&dep);
                            txn.record(pos, key, Op::Resync, Err(err));
                        }
                        None => {
                            desired.push(item);
                            desired_keys.push((pos, key));
                        }
                    },
                }
            }

            let report = handler.resync(desired, held, self.prune_unowned).await;
            for ((pos, key), outcome) in desired_keys.into_iter().zip(report.outcomes) {
                txn.record(pos, key, Op::Resync, outcome);
            }
            pruning.push((handler, report.stale, report.unowned));
        }

        for (handler, stale, unowned) in pruning.into_iter().rev() {
            if stale.is_empty() && unowned.is_empty() {
                continue;
            }
            let prefix = handler.kind().key_prefix();
            for (name, result) in handler.prune(stale, unowned).await {
                txn.record_pruned(format!("{prefix}{name}"), result);
            }
        }
    }
}
