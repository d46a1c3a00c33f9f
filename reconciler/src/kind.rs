use std::{collections::HashSet, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use data_model::{ConfigItem, Resource, ResourceKind};
use metrics::{create_timed_future, reconciler_stats};
use opentelemetry::KeyValue;
use tracing::{info, warn};

use crate::{
    correlator::Correlator,
    driver::ResourceDriver,
    registry::NameIndex,
    Outcome,
};

/// What a full resync of one kind leaves behind for the pruning phase.
pub struct ResyncReport {
    /// One outcome per desired item, in the order given.
    pub outcomes: Vec<Result<Outcome>>,
    /// Previously registered items the new desired set no longer contains.
    pub stale: Vec<ConfigItem>,
    /// Dumped items no desired item claims.
    pub unowned: Vec<ConfigItem>,
}

/// Kind-erased view of a [`KindHandler`], so the orchestrator can walk all
/// kinds in order.
#[async_trait]
pub trait KindReconciler: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn is_registered(&self, name: &str) -> bool;

    /// Registered items in registration order.
    fn registered(&self) -> Vec<ConfigItem>;

    fn supports_dump(&self) -> bool;

    async fn dump(&self) -> Result<Vec<ConfigItem>>;

    /// Supersedes the registered state of this kind with `desired`.
    ///
    /// `held` names were submitted with the batch but not applied. Their
    /// registered entries are kept and never reported stale or unowned.
    async fn resync(
        &self,
        desired: Vec<ConfigItem>,
        held: Vec<String>,
        collect_unowned: bool,
    ) -> ResyncReport;

    /// Deletes stale and unowned items. Stale items whose delete fails are
    /// registered again.
    async fn prune(
        &self,
        stale: Vec<ConfigItem>,
        unowned: Vec<ConfigItem>,
    ) -> Vec<(String, Result<Outcome>)>;

    async fn upsert(&self, item: ConfigItem) -> Result<Outcome>;

    async fn remove(&self, name: &str) -> Result<Outcome>;
}

pub struct KindHandler<R: Resource> {
    index: NameIndex<R>,
    driver: Arc<dyn ResourceDriver<R>>,
    stats: Arc<reconciler_stats::Metrics>,
}

impl<R: Resource> KindHandler<R> {
    pub fn new(driver: Arc<dyn ResourceDriver<R>>, stats: Arc<reconciler_stats::Metrics>) -> Self {
        Self {
            index: NameIndex::new(R::KIND.to_string()),
            driver,
            stats,
        }
    }

    pub fn index(&self) -> &NameIndex<R> {
        &self.index
    }

    fn typed(item: ConfigItem) -> Result<R> {
        let kind = item.kind();
        R::from_item(item).ok_or_else(|| anyhow!("expected a {} item, got {kind}", R::KIND))
    }

    fn observe_latency(&self, op: &'static str, elapsed: std::time::Duration) {
        self.stats.driver_latency.record(
            elapsed.as_secs_f64(),
            &[
                KeyValue::new("kind", R::KIND.to_string()),
                KeyValue::new("op", op),
            ],
        );
    }

    fn count(&self, op: &'static str, result: &Result<()>) {
        let outcome = if result.is_ok() { "ok" } else { "error" };
        self.stats.driver_operations.add(
            1,
            &[
                KeyValue::new("kind", R::KIND.to_string()),
                KeyValue::new("op", op),
                KeyValue::new("outcome", outcome),
            ],
        );
    }

    async fn configure(&self, resource: &R) -> Result<()> {
        let result = create_timed_future(self.driver.configure(resource), |elapsed| {
            self.observe_latency("configure", elapsed)
        })
        .await;
        self.count("configure", &result);
        result
    }

    async fn delete(&self, resource: &R) -> Result<()> {
        let result = create_timed_future(self.driver.delete(resource), |elapsed| {
            self.observe_latency("delete", elapsed)
        })
        .await;
        self.count("delete", &result);
        result
    }

    fn typed_all(items: Vec<ConfigItem>) -> Vec<R> {
        items.into_iter().filter_map(R::from_item).collect()
    }
}

#[async_trait]
impl<R: Resource> KindReconciler for KindHandler<R> {
    fn kind(&self) -> ResourceKind {
        R::KIND
    }

    fn is_registered(&self, name: &str) -> bool {
        self.index.contains(name)
    }

    fn registered(&self) -> Vec<ConfigItem> {
        self.index
            .list()
            .into_iter()
            .map(|entry| entry.metadata.into_item())
            .collect()
    }

    fn supports_dump(&self) -> bool {
        self.driver.supports_dump()
    }

    async fn dump(&self) -> Result<Vec<ConfigItem>> {
        let actual = self.driver.dump().await?;
        Ok(actual
            .into_iter()
            .map(|r| r.normalized().into_item())
            .collect())
    }

    async fn resync(
        &self,
        desired: Vec<ConfigItem>,
        held: Vec<String>,
        collect_unowned: bool,
    ) -> ResyncReport {
        let mut typed = Vec::with_capacity(desired.len());
        let mut conversion_errors = Vec::new();
        for (pos, item) in desired.into_iter().enumerate() {
            match Self::typed(item) {
                Ok(r) => typed.push(r),
                Err(err) => conversion_errors.push((pos, err)),
            }
        }

        let correlation = Correlator::new(&self.index, self.driver.as_ref())
            .correlate(typed)
            .await;

        let mut outcomes = correlation.outcomes;
        for (pos, err) in conversion_errors {
            outcomes.insert(pos, Err(err));
        }

        let held: HashSet<String> = held.into_iter().collect();
        let mut stale = Vec::new();
        for entry in correlation.leftover {
            if held.contains(&entry.name) {
                self.index.restore(entry);
            } else {
                stale.push(entry.metadata.into_item());
            }
        }

        let unowned: Vec<ConfigItem> = if collect_unowned {
            let stale_names = stale_names(&stale);
            correlation
                .unclaimed
                .into_iter()
                .filter(|r| {
                    r.identity()
                        .map(|name| !stale_names.contains(&name) && !held.contains(&name))
                        .unwrap_or(false)
                })
                .map(Resource::into_item)
                .collect()
        } else {
            Vec::new()
        };

        info!(
            kind = %R::KIND,
            registered = self.index.len(),
            stale = stale.len(),
            unowned = unowned.len(),
            "kind resynced"
        );

        ResyncReport {
            outcomes,
            stale,
            unowned,
        }
    }

    async fn prune(
        &self,
        stale: Vec<ConfigItem>,
        unowned: Vec<ConfigItem>,
    ) -> Vec<(String, Result<Outcome>)> {
        let mut results = Vec::new();
        for resource in Self::typed_all(stale) {
            let name = match resource.identity() {
                Ok(name) => name,
                Err(err) => {
                    results.push((format!("{resource:?}"), Err(err.into())));
                    continue;
                }
            };
            match self.delete(&resource).await {
                Ok(()) => results.push((name, Ok(Outcome::Deleted))),
                Err(err) => {
                    warn!(kind = %R::KIND, name = %name, error = %err, "stale delete failed");
                    self.index.register(&name, resource);
                    results.push((name, Err(err)));
                }
            }
        }
        for resource in Self::typed_all(unowned) {
            let Ok(name) = resource.identity() else {
                continue;
            };
            let result = self.delete(&resource).await.map(|()| Outcome::Deleted);
            results.push((name, result));
        }
        results
    }

    async fn upsert(&self, item: ConfigItem) -> Result<Outcome> {
        let resource = Self::typed(item)?.normalized();
        let name = resource.identity()?;
        match self.index.lookup_by_name(&name) {
            Some((_, current)) if current == resource => Ok(Outcome::InSync),
            Some((_, current)) => {
                self.delete(&current).await?;
                self.index.unregister(&name);
                self.configure(&resource).await?;
                self.index.register(&name, resource);
                Ok(Outcome::Reconfigured)
            }
            None => {
                self.configure(&resource).await?;
                self.index.register(&name, resource);
                Ok(Outcome::Configured)
            }
        }
    }

    async fn remove(&self, name: &str) -> Result<Outcome> {
        let Some((_, current)) = self.index.lookup_by_name(name) else {
            return Ok(Outcome::NotFound);
        };
        self.delete(&current).await?;
        self.index.unregister(name);
        Ok(Outcome::Deleted)
    }
}

/// Identities of stale items; they are pruned as stale, not as unowned.
fn stale_names(stale: &[ConfigItem]) -> HashSet<String> {
    stale.iter().filter_map(|item| item.identity().ok()).collect()
}

#[cfg(test)]
mod tests {
    use data_model::{test_objects::tests::mock_route, Route};

    use super::*;
    use crate::memory::MemoryDriver;

    fn handler() -> (Arc<MemoryDriver<Route>>, KindHandler<Route>) {
        let driver = Arc::new(MemoryDriver::new(true));
        let handler = KindHandler::new(
            driver.clone() as Arc<dyn ResourceDriver<Route>>,
            Arc::new(reconciler_stats::Metrics::new()),
        );
        (driver, handler)
    }

    #[tokio::test]
    async fn test_upsert_of_equal_value_is_a_noop() -> Result<()> {
        let (driver, handler) = handler();
        let item = ConfigItem::VppRoute(mock_route("10.0.0.0/24", "10.0.0.1"));
        assert_eq!(handler.upsert(item.clone()).await?, Outcome::Configured);
        assert_eq!(handler.upsert(item).await?, Outcome::InSync);
        assert_eq!(driver.configure_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_of_changed_value_replaces_it() -> Result<()> {
        let (driver, handler) = handler();
        let route = mock_route("10.0.0.0/24", "10.0.0.1");
        handler.upsert(ConfigItem::VppRoute(route.clone())).await?;

        let mut heavier = route;
        heavier.weight = 5;
        assert_eq!(
            handler.upsert(ConfigItem::VppRoute(heavier.clone())).await?,
            Outcome::Reconfigured
        );
        assert_eq!(driver.delete_calls(), 1);
        assert_eq!(driver.entries(), vec![heavier.clone().normalized()]);
        let name = heavier.identity()?;
        assert_eq!(
            handler.index().lookup_by_name(&name).map(|(_, r)| r.weight),
            Some(5)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_entry() -> Result<()> {
        let (driver, handler) = handler();
        let route = mock_route("10.0.0.0/24", "10.0.0.1");
        let name = route.identity()?;
        handler.upsert(ConfigItem::VppRoute(route)).await?;

        driver.fail_delete(&name, "busy");
        assert!(handler.remove(&name).await.is_err());
        assert!(handler.is_registered(&name));

        driver.clear_failures();
        assert_eq!(handler.remove(&name).await?, Outcome::Deleted);
        assert!(!handler.is_registered(&name));
        assert_eq!(handler.remove(&name).await?, Outcome::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_resync_reports_stale_entries() -> Result<()> {
        let (_driver, handler) = handler();
        let keep = mock_route("10.1.0.0/16", "10.0.0.1");
        let drop = mock_route("10.2.0.0/16", "10.0.0.1");
        handler.upsert(ConfigItem::VppRoute(keep.clone())).await?;
        handler.upsert(ConfigItem::VppRoute(drop.clone())).await?;

        let report = handler
            .resync(vec![ConfigItem::VppRoute(keep)], Vec::new(), false)
            .await;
        assert!(report.outcomes.iter().all(|o| o.is_ok()));
        assert_eq!(report.stale, vec![ConfigItem::VppRoute(drop.normalized())]);
        assert!(report.unowned.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_held_names_are_neither_stale_nor_unowned() -> Result<()> {
        let (driver, handler) = handler();
        let held = mock_route("10.1.0.0/16", "10.0.0.1");
        let held_name = held.identity()?;
        handler.upsert(ConfigItem::VppRoute(held)).await?;
        let foreign = mock_route("10.2.0.0/16", "10.0.0.1").normalized();
        driver.seed([foreign.clone()]);

        let report = handler
            .resync(Vec::new(), vec![held_name.clone(), foreign.identity()?], true)
            .await;
        assert!(report.stale.is_empty());
        assert!(report.unowned.is_empty());
        assert!(handler.is_registered(&held_name));
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_kind_is_rejected() {
        let (driver, handler) = handler();
        let item = ConfigItem::ProxyArpInterface(data_model::ProxyArpInterface {
            name: "memif1".to_string(),
        });
        assert!(handler.upsert(item).await.is_err());
        assert_eq!(driver.configure_calls(), 0);
    }
}
