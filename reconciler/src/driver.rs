use std::sync::Arc;

use anyhow::Result;
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

/// Programs one resource kind into the dataplane.
///
/// `configure` of an identity that is already programmed updates it in
/// place, and `delete` of an identity that is not programmed succeeds. Kinds
/// whose dataplane offers no introspection keep the default `dump`.
#[async_trait]
pub trait ResourceDriver<R: Resource>: Send + Sync {
    async fn configure(&self, resource: &R) -> Result<()>;

    /// Removes the programmed object named by the identity of `resource`.
    async fn delete(&self, resource: &R) -> Result<()>;

    fn supports_dump(&self) -> bool {
        false
    }

    /// Actually programmed instances of this kind.
    async fn dump(&self) -> Result<Vec<R>> {
        Err(anyhow::anyhow!("dump is not supported for {}", R::KIND))
    }
}

/// One driver per resource kind.
#[derive(Clone)]
pub struct Drivers {
    pub vpp_interfaces: Arc<dyn ResourceDriver<Interface>>,
    pub vpp_routes: Arc<dyn ResourceDriver<Route>>,
    pub vpp_arps: Arc<dyn ResourceDriver<ArpEntry>>,
    pub proxy_arp_interfaces: Arc<dyn ResourceDriver<ProxyArpInterface>>,
    pub proxy_arp_ranges: Arc<dyn ResourceDriver<ProxyArpRange>>,
    pub linux_routes: Arc<dyn ResourceDriver<LinuxRoute>>,
    pub linux_arps: Arc<dyn ResourceDriver<LinuxArpEntry>>,
    pub ip_allocations: Arc<dyn ResourceDriver<IpAllocation>>,
}
