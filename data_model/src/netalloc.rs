use serde::{Deserialize, Serialize};

use crate::{
    addr::{self, normalize_with},
    ConfigItem,
    ModelError,
    Resource,
    ResourceKind,
};

/// Address allocated to an interface within a named network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAllocation {
    pub network_name: String,
    pub interface_name: String,
    pub address: String,
    #[serde(default)]
    pub gw: String,
}

impl Resource for IpAllocation {
    const KIND: ResourceKind = ResourceKind::IpAllocation;

    fn normalize(&mut self) {
        normalize_with(&mut self.address, addr::canonical_interface_address);
        normalize_with(&mut self.gw, addr::canonical_ip);
    }

    fn identity(&self) -> Result<String, ModelError> {
        let invalid = |reason: String| ModelError::invalid(Self::KIND, reason);
        if self.network_name.is_empty() || self.interface_name.is_empty() {
            return Err(invalid(
                "allocation needs both a network and an interface name".to_string(),
            ));
        }
        addr::canonical_interface_address(&self.address).map_err(invalid)?;
        if !self.gw.is_empty() {
            addr::canonical_ip(&self.gw).map_err(invalid)?;
        }
        Ok(format!("{}/{}", self.network_name, self.interface_name))
    }

    fn into_item(self) -> ConfigItem {
        ConfigItem::IpAllocation(self)
    }

    fn from_item(item: ConfigItem) -> Option<Self> {
        match item {
            ConfigItem::IpAllocation(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetallocConfig {
    #[serde(default)]
    pub ip_addresses: Vec<IpAllocation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_keeps_host_address() {
        let alloc = IpAllocation {
            network_name: "pods".to_string(),
            interface_name: "tap-1".to_string(),
            address: "10.1.1.5/24".to_string(),
            gw: String::new(),
        }
        .normalized();
        assert_eq!(alloc.address, "10.1.1.5/24");
        assert_eq!(
            alloc.key().unwrap(),
            "config/netalloc/v1/ip/pods/tap-1"
        );
    }

    #[test]
    fn test_allocation_requires_prefix() {
        let alloc = IpAllocation {
            network_name: "pods".to_string(),
            interface_name: "tap-1".to_string(),
            address: "10.1.1.5".to_string(),
            gw: String::new(),
        };
        assert!(alloc.identity().is_err());
    }
}
