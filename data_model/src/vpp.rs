use serde::{Deserialize, Serialize};

use crate::{
    addr::{self, normalize_with},
    ConfigItem,
    Dependency,
    ModelError,
    Resource,
    ResourceKind,
};

pub const DEFAULT_MTU: u32 = 9000;
pub const DEFAULT_ROUTE_WEIGHT: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    #[default]
    SoftwareLoopback,
    DpdkEthernet,
    Memif,
    Tap,
    Vxlan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default, rename = "type")]
    pub interface_type: InterfaceType,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub phys_address: String,
    #[serde(default)]
    pub mtu: u32,
    #[serde(default)]
    pub vrf: u32,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

impl Resource for Interface {
    const KIND: ResourceKind = ResourceKind::VppInterface;

    fn normalize(&mut self) {
        if self.mtu == 0 {
            self.mtu = DEFAULT_MTU;
        }
        self.phys_address = self.phys_address.to_ascii_lowercase();
        for address in self.ip_addresses.iter_mut() {
            normalize_with(address, addr::canonical_interface_address);
        }
    }

    fn identity(&self) -> Result<String, ModelError> {
        let invalid = |reason: String| ModelError::invalid(Self::KIND, reason);
        if self.name.is_empty() {
            return Err(invalid("interface name is empty".to_string()));
        }
        if !self.phys_address.is_empty() {
            addr::canonical_mac(&self.phys_address).map_err(invalid)?;
        }
        for address in &self.ip_addresses {
            addr::canonical_interface_address(address).map_err(invalid)?;
        }
        Ok(self.name.clone())
    }

    fn into_item(self) -> ConfigItem {
        ConfigItem::VppInterface(self)
    }

    fn from_item(item: ConfigItem) -> Option<Self> {
        match item {
            ConfigItem::VppInterface(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    #[default]
    IntraVrf,
    InterVrf,
    Drop,
}

/// Identity is `(vrf_id, dst_network, next_hop_addr)`; weight and
/// preference are attributes of the same route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default, rename = "type")]
    pub route_type: RouteType,
    #[serde(default)]
    pub vrf_id: u32,
    pub dst_network: String,
    #[serde(default)]
    pub next_hop_addr: String,
    #[serde(default)]
    pub outgoing_interface: String,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub preference: u32,
    #[serde(default)]
    pub via_vrf_id: u32,
}

impl Resource for Route {
    const KIND: ResourceKind = ResourceKind::VppRoute;

    fn normalize(&mut self) {
        if self.weight == 0 {
            self.weight = DEFAULT_ROUTE_WEIGHT;
        }
        normalize_with(&mut self.dst_network, addr::canonical_prefix);
        normalize_with(&mut self.next_hop_addr, addr::canonical_ip);
    }

    fn identity(&self) -> Result<String, ModelError> {
        let invalid = |reason: String| ModelError::invalid(Self::KIND, reason);
        let dst = addr::canonical_prefix(&self.dst_network).map_err(invalid)?;
        let ipv4 = addr::is_ipv4(&dst).map_err(invalid)?;
        let next_hop = if self.next_hop_addr.is_empty() {
            addr::unspecified(ipv4)
        } else {
            addr::parse_ip(&self.next_hop_addr).map_err(invalid)?
        };
        if next_hop.is_ipv4() != ipv4 {
            return Err(invalid(format!(
                "next hop {next_hop} and destination {dst} differ in address family"
            )));
        }
        Ok(format!("vrf/{}/dst/{dst}/gw/{next_hop}", self.vrf_id))
    }

    fn dependencies(&self) -> Vec<Dependency> {
        if self.outgoing_interface.is_empty() {
            return Vec::new();
        }
        vec![Dependency {
            kind: ResourceKind::VppInterface,
            name: self.outgoing_interface.clone(),
        }]
    }

    fn into_item(self) -> ConfigItem {
        ConfigItem::VppRoute(self)
    }

    fn from_item(item: ConfigItem) -> Option<Self> {
        match item {
            ConfigItem::VppRoute(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpEntry {
    pub interface: String,
    pub ip_address: String,
    pub phys_address: String,
    #[serde(default)]
    pub r#static: bool,
}

impl Resource for ArpEntry {
    const KIND: ResourceKind = ResourceKind::VppArp;

    fn normalize(&mut self) {
        normalize_with(&mut self.ip_address, addr::canonical_ip);
        self.phys_address = self.phys_address.to_ascii_lowercase();
    }

    fn identity(&self) -> Result<String, ModelError> {
        let invalid = |reason: String| ModelError::invalid(Self::KIND, reason);
        if self.interface.is_empty() {
            return Err(invalid("ARP entry has no interface".to_string()));
        }
        let ip = addr::canonical_ip(&self.ip_address).map_err(invalid)?;
        addr::canonical_mac(&self.phys_address).map_err(invalid)?;
        Ok(format!("{}/{ip}", self.interface))
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency {
            kind: ResourceKind::VppInterface,
            name: self.interface.clone(),
        }]
    }

    fn into_item(self) -> ConfigItem {
        ConfigItem::VppArp(self)
    }

    fn from_item(item: ConfigItem) -> Option<Self> {
        match item {
            ConfigItem::VppArp(r) => Some(r),
            _ => None,
        }
    }
}

/// Interface answering ARP requests on behalf of the configured ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyArpInterface {
    pub name: String,
}

impl Resource for ProxyArpInterface {
    const KIND: ResourceKind = ResourceKind::ProxyArpInterface;

    fn identity(&self) -> Result<String, ModelError> {
        if self.name.is_empty() {
            return Err(ModelError::invalid(
                Self::KIND,
                "proxy ARP interface name is empty",
            ));
        }
        Ok(self.name.clone())
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![Dependency {
            kind: ResourceKind::VppInterface,
            name: self.name.clone(),
        }]
    }

    fn into_item(self) -> ConfigItem {
        ConfigItem::ProxyArpInterface(self)
    }

    fn from_item(item: ConfigItem) -> Option<Self> {
        match item {
            ConfigItem::ProxyArpInterface(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyArpRange {
    pub first_ip_addr: String,
    pub last_ip_addr: String,
    #[serde(default)]
    pub vrf_id: u32,
}

impl Resource for ProxyArpRange {
    const KIND: ResourceKind = ResourceKind::ProxyArpRange;

    fn normalize(&mut self) {
        normalize_with(&mut self.first_ip_addr, addr::canonical_ip);
        normalize_with(&mut self.last_ip_addr, addr::canonical_ip);
    }

    fn identity(&self) -> Result<String, ModelError> {
        let invalid = |reason: String| ModelError::invalid(Self::KIND, reason);
        let first = addr::parse_ip(&self.first_ip_addr).map_err(invalid)?;
        let last = addr::parse_ip(&self.last_ip_addr).map_err(invalid)?;
        if first.is_ipv4() != last.is_ipv4() {
            return Err(invalid(format!(
                "range {first}-{last} mixes address families"
            )));
        }
        if first > last {
            return Err(invalid(format!("range {first}-{last} is reversed")));
        }
        Ok(format!("vrf/{}/{first}-{last}", self.vrf_id))
    }

    fn into_item(self) -> ConfigItem {
        ConfigItem::ProxyArpRange(self)
    }

    fn from_item(item: ConfigItem) -> Option<Self> {
        match item {
            ConfigItem::ProxyArpRange(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyArp {
    #[serde(default)]
    pub interfaces: Vec<ProxyArpInterface>,
    #[serde(default)]
    pub ranges: Vec<ProxyArpRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VppConfig {
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub arps: Vec<ArpEntry>,
    #[serde(default)]
    pub proxy_arp: ProxyArp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_objects::tests as objects;

    #[test]
    fn test_route_defaults_weight() {
        let route = objects::mock_route("10.0.0.0/24", "10.0.0.1").normalized();
        assert_eq!(route.weight, DEFAULT_ROUTE_WEIGHT);

        let mut explicit = objects::mock_route("10.0.0.0/24", "10.0.0.1");
        explicit.weight = 5;
        assert_eq!(explicit.normalized().weight, 5);
    }

    #[test]
    fn test_route_identity_ignores_attributes() {
        let a = objects::mock_route("10.0.0.0/24", "10.0.0.1");
        let mut b = a.clone();
        b.weight = 3;
        b.preference = 10;
        assert_eq!(a.identity().unwrap(), b.identity().unwrap());
        assert_ne!(a.normalized(), b.normalized());
    }

    #[test]
    fn test_route_without_next_hop() {
        let route = objects::mock_route("2001:db8::/32", "");
        assert_eq!(
            route.identity().unwrap(),
            "vrf/0/dst/2001:db8::/32/gw/::"
        );
    }

    #[test]
    fn test_route_rejects_mixed_families() {
        let route = objects::mock_route("10.0.0.0/24", "fd00::1");
        assert!(route.identity().is_err());
    }

    #[test]
    fn test_route_depends_on_outgoing_interface() {
        let mut route = objects::mock_route("10.0.0.0/24", "10.0.0.1");
        assert!(route.dependencies().is_empty());
        route.outgoing_interface = "memif1".to_string();
        assert_eq!(
            route.dependencies(),
            vec![Dependency {
                kind: ResourceKind::VppInterface,
                name: "memif1".to_string()
            }]
        );
    }

    #[test]
    fn test_interface_normalization() {
        let mut iface = objects::mock_interface("memif1");
        iface.mtu = 0;
        iface.phys_address = "02:AB:CD:00:00:01".to_string();
        iface.ip_addresses = vec!["fd00:0::5/64".to_string()];
        let iface = iface.normalized();
        assert_eq!(iface.mtu, DEFAULT_MTU);
        assert_eq!(iface.phys_address, "02:ab:cd:00:00:01");
        assert_eq!(iface.ip_addresses, vec!["fd00::5/64".to_string()]);
    }

    #[test]
    fn test_arp_identity() {
        let arp = objects::mock_vpp_arp("memif1", "192.168.1.10");
        assert_eq!(arp.identity().unwrap(), "memif1/192.168.1.10");

        let mut bad = arp.clone();
        bad.phys_address = String::new();
        assert!(bad.identity().is_err());
    }

    #[test]
    fn test_proxy_arp_range_validation() {
        let range = ProxyArpRange {
            first_ip_addr: "10.0.0.10".to_string(),
            last_ip_addr: "10.0.0.20".to_string(),
            vrf_id: 2,
        };
        assert_eq!(range.identity().unwrap(), "vrf/2/10.0.0.10-10.0.0.20");

        let reversed = ProxyArpRange {
            first_ip_addr: "10.0.0.20".to_string(),
            last_ip_addr: "10.0.0.10".to_string(),
            vrf_id: 0,
        };
        assert!(reversed.identity().is_err());

        let mixed = ProxyArpRange {
            first_ip_addr: "10.0.0.1".to_string(),
            last_ip_addr: "fd00::1".to_string(),
            vrf_id: 0,
        };
        assert!(mixed.identity().is_err());
    }
}
