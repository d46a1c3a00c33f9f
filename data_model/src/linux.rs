use serde::{Deserialize, Serialize};

use crate::{
    addr::{self, normalize_with},
    ConfigItem,
    ModelError,
    Resource,
    ResourceKind,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[derive(strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RouteScope {
    #[default]
    Global,
    Link,
    Host,
}

/// Host routing table entry, identified by destination and device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxRoute {
    pub dst_network: String,
    pub outgoing_interface: String,
    #[serde(default)]
    pub gw_addr: String,
    #[serde(default)]
    pub scope: RouteScope,
    #[serde(default)]
    pub metric: u32,
}

impl Resource for LinuxRoute {
    const KIND: ResourceKind = ResourceKind::LinuxRoute;

    fn normalize(&mut self) {
        normalize_with(&mut self.dst_network, addr::canonical_prefix);
        normalize_with(&mut self.gw_addr, addr::canonical_ip);
    }

    fn identity(&self) -> Result<String, ModelError> {
        let invalid = |reason: String| ModelError::invalid(Self::KIND, reason);
        let dst = addr::canonical_prefix(&self.dst_network).map_err(invalid)?;
        if self.outgoing_interface.is_empty() {
            return Err(invalid("route has no outgoing interface".to_string()));
        }
        if !self.gw_addr.is_empty() {
            let gw = addr::parse_ip(&self.gw_addr).map_err(invalid)?;
            if gw.is_ipv4() != addr::is_ipv4(&dst).map_err(invalid)? {
                return Err(invalid(format!(
                    "gateway {gw} and destination {dst} differ in address family"
                )));
            }
        }
        Ok(format!("{dst}/{}", self.outgoing_interface))
    }

    fn into_item(self) -> ConfigItem {
        ConfigItem::LinuxRoute(self)
    }

    fn from_item(item: ConfigItem) -> Option<Self> {
        match item {
            ConfigItem::LinuxRoute(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxArpEntry {
    pub interface: String,
    pub ip_address: String,
    pub hw_address: String,
}

impl Resource for LinuxArpEntry {
    const KIND: ResourceKind = ResourceKind::LinuxArp;

    fn normalize(&mut self) {
        normalize_with(&mut self.ip_address, addr::canonical_ip);
        self.hw_address = self.hw_address.to_ascii_lowercase();
    }

    fn identity(&self) -> Result<String, ModelError> {
        let invalid = |reason: String| ModelError::invalid(Self::KIND, reason);
        if self.interface.is_empty() {
            return Err(invalid("ARP entry has no interface".to_string()));
        }
        let ip = addr::canonical_ip(&self.ip_address).map_err(invalid)?;
        addr::canonical_mac(&self.hw_address).map_err(invalid)?;
        Ok(format!("{}/{ip}", self.interface))
    }

    fn into_item(self) -> ConfigItem {
        ConfigItem::LinuxArp(self)
    }

    fn from_item(item: ConfigItem) -> Option<Self> {
        match item {
            ConfigItem::LinuxArp(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxConfig {
    #[serde(default)]
    pub routes: Vec<LinuxRoute>,
    #[serde(default)]
    pub arp_entries: Vec<LinuxArpEntry>,
}
