//! In-process dataplane keeping one table per resource kind.
//!
//! Used by the `memory` driver mode and throughout the tests: every table
//! counts its calls and can be told to fail specific identities.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use data_model::{
    ArpEntry,
    Interface,
    IpAllocation,
    LinuxArpEntry,
    LinuxRoute,
    ProxyArpInterface,
    ProxyArpRange,
    Resource,
    Route,
};
use tracing::debug;

use crate::driver::{Drivers, ResourceDriver};

#[derive(Default)]
struct Failures {
    configure: HashMap<String, String>,
    delete: HashMap<String, String>,
    dump: Option<String>,
}

pub struct MemoryDriver<R: Resource> {
    dump_capable: bool,
    table: Mutex<Vec<R>>,
    failures: Mutex<Failures>,
    configure_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    dump_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn identity_of<R: Resource>(resource: &R) -> String {
    resource
        .identity()
        .unwrap_or_else(|_| format!("{resource:?}"))
}

impl<R: Resource> MemoryDriver<R> {
    pub fn new(dump_capable: bool) -> Self {
        Self {
            dump_capable,
            table: Mutex::new(Vec::new()),
            failures: Mutex::new(Failures::default()),
            configure_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            dump_calls: AtomicUsize::new(0),
        }
    }

    /// Programs `resources` directly, as if configured out of band.
    pub fn seed(&self, resources: impl IntoIterator<Item = R>) {
        let mut table = lock(&self.table);
        for resource in resources {
            upsert(&mut table, resource);
        }
    }

    pub fn entries(&self) -> Vec<R> {
        lock(&self.table).clone()
    }

    pub fn configure_calls(&self) -> usize {
        self.configure_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn dump_calls(&self) -> usize {
        self.dump_calls.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.configure_calls.store(0, Ordering::SeqCst);
        self.delete_calls.store(0, Ordering::SeqCst);
        self.dump_calls.store(0, Ordering::SeqCst);
    }

    pub fn fail_configure(&self, identity: &str, message: &str) {
        lock(&self.failures)
            .configure
            .insert(identity.to_string(), message.to_string());
    }

    pub fn fail_delete(&self, identity: &str, message: &str) {
        lock(&self.failures)
            .delete
            .insert(identity.to_string(), message.to_string());
    }

    pub fn fail_dump(&self, message: &str) {
        lock(&self.failures).dump = Some(message.to_string());
    }

    pub fn clear_failures(&self) {
        *lock(&self.failures) = Failures::default();
    }
}

fn upsert<R: Resource>(table: &mut Vec<R>, resource: R) {
    let identity = identity_of(&resource);
    match table.iter_mut().find(|r| identity_of(&**r) == identity) {
        Some(existing) => *existing = resource,
        None => table.push(resource),
    }
}

#[async_trait]
impl<R: Resource> ResourceDriver<R> for MemoryDriver<R> {
    async fn configure(&self, resource: &R) -> Result<()> {
        self.configure_calls.fetch_add(1, Ordering::SeqCst);
        let identity = identity_of(resource);
        if let Some(message) = lock(&self.failures).configure.get(&identity) {
            return Err(anyhow!("{message}"));
        }
        debug!(kind = %R::KIND, identity = %identity, "memory dataplane configure");
        upsert(&mut lock(&self.table), resource.clone());
        Ok(())
    }

    async fn delete(&self, resource: &R) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let identity = identity_of(resource);
        if let Some(message) = lock(&self.failures).delete.get(&identity) {
            return Err(anyhow!("{message}"));
        }
        debug!(kind = %R::KIND, identity = %identity, "memory dataplane delete");
        lock(&self.table).retain(|r| identity_of(r) != identity);
        Ok(())
    }

    fn supports_dump(&self) -> bool {
        self.dump_capable
    }

    async fn dump(&self) -> Result<Vec<R>> {
        if !self.dump_capable {
            return Err(anyhow!("dump is not supported for {}", R::KIND));
        }
        self.dump_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &lock(&self.failures).dump {
            return Err(anyhow!("{message}"));
        }
        Ok(self.entries())
    }
}

/// Simulated dataplane covering every resource kind. Proxy-ARP tables have
/// no dump, like the dataplane they stand in for.
pub struct MemoryDataplane {
    pub vpp_interfaces: Arc<MemoryDriver<Interface>>,
    pub vpp_routes: Arc<MemoryDriver<Route>>,
    pub vpp_arps: Arc<MemoryDriver<ArpEntry>>,
    pub proxy_arp_interfaces: Arc<MemoryDriver<ProxyArpInterface>>,
    pub proxy_arp_ranges: Arc<MemoryDriver<ProxyArpRange>>,
    pub linux_routes: Arc<MemoryDriver<LinuxRoute>>,
    pub linux_arps: Arc<MemoryDriver<LinuxArpEntry>>,
    pub ip_allocations: Arc<MemoryDriver<IpAllocation>>,
}

impl Default for MemoryDataplane {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDataplane {
    pub fn new() -> Self {
        Self {
            vpp_interfaces: Arc::new(MemoryDriver::new(true)),
            vpp_routes: Arc::new(MemoryDriver::new(true)),
            vpp_arps: Arc::new(MemoryDriver::new(true)),
            proxy_arp_interfaces: Arc::new(MemoryDriver::new(false)),
            proxy_arp_ranges: Arc::new(MemoryDriver::new(false)),
            linux_routes: Arc::new(MemoryDriver::new(true)),
            linux_arps: Arc::new(MemoryDriver::new(true)),
            ip_allocations: Arc::new(MemoryDriver::new(true)),
        }
    }

    pub fn drivers(&self) -> Drivers {
        Drivers {
            vpp_interfaces: self.vpp_interfaces.clone(),
            vpp_routes: self.vpp_routes.clone(),
            vpp_arps: self.vpp_arps.clone(),
            proxy_arp_interfaces: self.proxy_arp_interfaces.clone(),
            proxy_arp_ranges: self.proxy_arp_ranges.clone(),
            linux_routes: self.linux_routes.clone(),
            linux_arps: self.linux_arps.clone(),
            ip_allocations: self.ip_allocations.clone(),
        }
    }

    /// Total configure calls over all tables.
    pub fn configure_calls(&self) -> usize {
        self.vpp_interfaces.configure_calls() +
            self.vpp_routes.configure_calls() +
            self.vpp_arps.configure_calls() +
            self.proxy_arp_interfaces.configure_calls() +
            self.proxy_arp_ranges.configure_calls() +
            self.linux_routes.configure_calls() +
            self.linux_arps.configure_calls() +
            self.ip_allocations.configure_calls()
    }

    /// Total delete calls over all tables.
    pub fn delete_calls(&self) -> usize {
        self.vpp_interfaces.delete_calls() +
            self.vpp_routes.delete_calls() +
            self.vpp_arps.delete_calls() +
            self.proxy_arp_interfaces.delete_calls() +
            self.proxy_arp_ranges.delete_calls() +
            self.linux_routes.delete_calls() +
            self.linux_arps.delete_calls() +
            self.ip_allocations.delete_calls()
    }

    pub fn reset_counters(&self) {
        self.vpp_interfaces.reset_counters();
        self.vpp_routes.reset_counters();
        self.vpp_arps.reset_counters();
        self.proxy_arp_interfaces.reset_counters();
        self.proxy_arp_ranges.reset_counters();
        self.linux_routes.reset_counters();
        self.linux_arps.reset_counters();
        self.ip_allocations.reset_counters();
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use data_model::test_objects::tests::mock_route;

    use super::*;

    #[tokio::test]
    async fn test_configure_is_an_upsert() -> Result<()> {
        let driver: MemoryDriver<Route> = MemoryDriver::new(true);
        let route = mock_route("10.0.0.0/24", "10.0.0.1").normalized();
        driver.configure(&route).await?;

        let mut heavier = route.clone();
        heavier.weight = 4;
        driver.configure(&heavier).await?;

        assert_eq!(driver.entries(), vec![heavier]);
        assert_eq!(driver.configure_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_of_absent_identity_succeeds() -> Result<()> {
        let driver: MemoryDriver<Route> = MemoryDriver::new(true);
        driver.delete(&mock_route("10.0.0.0/24", "10.0.0.1")).await?;
        assert_eq!(driver.delete_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_injection() -> Result<()> {
        let driver: MemoryDriver<Route> = MemoryDriver::new(true);
        let route = mock_route("10.0.0.0/24", "10.0.0.1");
        driver.fail_configure(&route.identity()?, "no buffers");
        let err = driver.configure(&route).await.unwrap_err();
        assert_eq!(err.to_string(), "no buffers");
        assert!(driver.entries().is_empty());

        driver.fail_dump("dump timed out");
        assert!(driver.dump().await.is_err());

        driver.clear_failures();
        driver.configure(&route).await?;
        assert_eq!(driver.dump().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_proxy_arp_tables_have_no_dump() {
        let dataplane = MemoryDataplane::new();
        let drivers = dataplane.drivers();
        assert!(!drivers.proxy_arp_ranges.supports_dump());
        assert!(!drivers.proxy_arp_interfaces.supports_dump());
        assert!(drivers.vpp_routes.supports_dump());
        assert!(drivers.proxy_arp_ranges.dump().await.is_err());
    }
}
