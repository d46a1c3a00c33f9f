pub mod addr;
pub mod linux;
pub mod netalloc;
pub mod test_objects;
pub mod vpp;

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use strum::IntoEnumIterator;

pub use crate::{
    linux::{LinuxArpEntry, LinuxConfig, LinuxRoute, RouteScope},
    netalloc::{IpAllocation, NetallocConfig},
    vpp::{
        ArpEntry,
        Interface,
        InterfaceType,
        ProxyArp,
        ProxyArpInterface,
        ProxyArpRange,
        Route,
        RouteType,
        VppConfig,
    },
};

/// Reserved result key carrying the batch sequence number.
pub const SEQNUM_KEY: &str = "seqnum";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid {kind} resource: {reason}")]
    InvalidResource { kind: ResourceKind, reason: String },
    #[error("no resource kind is registered for key {0:?}")]
    UnknownKey(String),
    #[error("key {key:?} does not belong to a {kind} value")]
    KeyMismatch { key: String, kind: ResourceKind },
}

impl ModelError {
    pub fn invalid(kind: ResourceKind, reason: impl Into<String>) -> Self {
        ModelError::InvalidResource {
            kind,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(strum::Display, strum::AsRefStr, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Vpp,
    Linux,
    Netalloc,
}

/// Resource kinds in the order every reconciliation pass processes them.
/// Kinds referenced by other kinds come first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(strum::Display, strum::AsRefStr, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    VppInterface,
    VppRoute,
    VppArp,
    ProxyArpInterface,
    ProxyArpRange,
    LinuxRoute,
    LinuxArp,
    IpAllocation,
}

impl ResourceKind {
    pub fn key_prefix(&self) -> &'static str {
        match self {
            ResourceKind::VppInterface => "config/vpp/v2/interfaces/",
            ResourceKind::VppRoute => "config/vpp/v2/route/",
            ResourceKind::VppArp => "config/vpp/v2/arp/",
            ResourceKind::ProxyArpInterface => "config/vpp/v2/proxyarp/interface/",
            ResourceKind::ProxyArpRange => "config/vpp/v2/proxyarp/range/",
            ResourceKind::LinuxRoute => "config/linux/l3/v2/route/",
            ResourceKind::LinuxArp => "config/linux/l3/v2/arp/",
            ResourceKind::IpAllocation => "config/netalloc/v1/ip/",
        }
    }

    pub fn domain(&self) -> Domain {
        match self {
            ResourceKind::VppInterface |
            ResourceKind::VppRoute |
            ResourceKind::VppArp |
            ResourceKind::ProxyArpInterface |
            ResourceKind::ProxyArpRange => Domain::Vpp,
            ResourceKind::LinuxRoute | ResourceKind::LinuxArp => Domain::Linux,
            ResourceKind::IpAllocation => Domain::Netalloc,
        }
    }

    /// Position in the processing order.
    pub fn position(&self) -> usize {
        *self as usize
    }

    pub fn from_key(key: &str) -> Result<ResourceKind, ModelError> {
        ResourceKind::iter()
            .find(|kind| {
                key.strip_prefix(kind.key_prefix())
                    .is_some_and(|name| !name.is_empty())
            })
            .ok_or_else(|| ModelError::UnknownKey(key.to_string()))
    }

    /// Splits a model key into its kind and the identity under that kind.
    pub fn split_key(key: &str) -> Result<(ResourceKind, &str), ModelError> {
        let kind = ResourceKind::from_key(key)?;
        Ok((kind, &key[kind.key_prefix().len()..]))
    }
}

/// A name in another kind's registry that a resource refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub kind: ResourceKind,
    pub name: String,
}

/// Per-kind identity, normalization and conversion.
///
/// Equality of two normalized values (`PartialEq`) is the full-field match
/// used by correlation; `identity` is the subset of fields naming the
/// programmed object.
pub trait Resource:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: ResourceKind;

    /// Applies default substitution and canonical address forms.
    fn normalize(&mut self) {}

    /// Validates the resource and derives its identity.
    fn identity(&self) -> Result<String, ModelError>;

    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    fn into_item(self) -> ConfigItem;

    fn from_item(item: ConfigItem) -> Option<Self>;

    fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    fn key(&self) -> Result<String, ModelError> {
        Ok(format!("{}{}", Self::KIND.key_prefix(), self.identity()?))
    }
}

/// Any resource, tagged with its kind on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigItem {
    VppInterface(Interface),
    VppRoute(Route),
    VppArp(ArpEntry),
    ProxyArpInterface(ProxyArpInterface),
    ProxyArpRange(ProxyArpRange),
    LinuxRoute(LinuxRoute),
    LinuxArp(LinuxArpEntry),
    IpAllocation(IpAllocation),
}

macro_rules! for_each_item {
    ($item:expr, $r:ident => $body:expr) => {
        match $item {
            ConfigItem::VppInterface($r) => $body,
            ConfigItem::VppRoute($r) => $body,
            ConfigItem::VppArp($r) => $body,
            ConfigItem::ProxyArpInterface($r) => $body,
            ConfigItem::ProxyArpRange($r) => $body,
            ConfigItem::LinuxRoute($r) => $body,
            ConfigItem::LinuxArp($r) => $body,
            ConfigItem::IpAllocation($r) => $body,
        }
    };
}

impl ConfigItem {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ConfigItem::VppInterface(_) => ResourceKind::VppInterface,
            ConfigItem::VppRoute(_) => ResourceKind::VppRoute,
            ConfigItem::VppArp(_) => ResourceKind::VppArp,
            ConfigItem::ProxyArpInterface(_) => ResourceKind::ProxyArpInterface,
            ConfigItem::ProxyArpRange(_) => ResourceKind::ProxyArpRange,
            ConfigItem::LinuxRoute(_) => ResourceKind::LinuxRoute,
            ConfigItem::LinuxArp(_) => ResourceKind::LinuxArp,
            ConfigItem::IpAllocation(_) => ResourceKind::IpAllocation,
        }
    }

    pub fn key(&self) -> Result<String, ModelError> {
        for_each_item!(self, r => r.key())
    }

    pub fn identity(&self) -> Result<String, ModelError> {
        for_each_item!(self, r => r.identity())
    }

    pub fn dependencies(&self) -> Vec<Dependency> {
        for_each_item!(self, r => r.dependencies())
    }

    pub fn normalized(self) -> ConfigItem {
        for_each_item!(self, r => r.normalized().into_item())
    }
}

/// Derives the model key of a resource. Malformed resources have no key.
pub fn get_key(item: &ConfigItem) -> Result<String, ModelError> {
    item.key()
}

/// One desired change: `None` deletes whatever is registered under `key`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyVal {
    pub key: String,
    pub value: Option<ConfigItem>,
}

impl KeyVal {
    pub fn put(item: ConfigItem) -> Result<KeyVal, ModelError> {
        Ok(KeyVal {
            key: item.key()?,
            value: Some(item),
        })
    }

    pub fn delete(key: impl Into<String>) -> KeyVal {
        KeyVal {
            key: key.into(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatus {
    pub retval: i32,
    #[serde(default)]
    pub details: Vec<String>,
}

impl ItemStatus {
    pub const RETVAL_OK: i32 = 0;
    pub const RETVAL_FAILED: i32 = 1;

    pub fn ok(detail: impl Into<String>) -> Self {
        ItemStatus {
            retval: Self::RETVAL_OK,
            details: vec![detail.into()],
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        ItemStatus {
            retval: Self::RETVAL_FAILED,
            details: vec![reason.into()],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.retval == Self::RETVAL_OK
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyResult {
    pub key: String,
    pub status: ItemStatus,
}

impl KeyResult {
    pub fn seqnum(seq_num: u64) -> Self {
        KeyResult {
            key: SEQNUM_KEY.to_string(),
            status: ItemStatus {
                retval: ItemStatus::RETVAL_OK,
                details: vec![seq_num.to_string()],
            },
        }
    }
}

/// Finds the batch sequence number among the results of a batch.
pub fn find_seqnum(results: &[KeyResult]) -> Option<u64> {
    results
        .iter()
        .find(|r| r.key == SEQNUM_KEY)
        .and_then(|r| r.status.details.first())
        .and_then(|seq| seq.parse().ok())
}

/// Resource collections grouped by domain, as exchanged with API clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vpp_config: VppConfig,
    #[serde(default)]
    pub linux_config: LinuxConfig,
    #[serde(default)]
    pub netalloc_config: NetallocConfig,
}

impl Config {
    /// Flattens the aggregate into individual items, in kind order.
    pub fn extract_items(&self) -> Vec<ConfigItem> {
        let vpp = &self.vpp_config;
        let linux = &self.linux_config;
        vpp.interfaces
            .iter()
            .cloned()
            .map(ConfigItem::VppInterface)
            .chain(vpp.routes.iter().cloned().map(ConfigItem::VppRoute))
            .chain(vpp.arps.iter().cloned().map(ConfigItem::VppArp))
            .chain(
                vpp.proxy_arp
                    .interfaces
                    .iter()
                    .cloned()
                    .map(ConfigItem::ProxyArpInterface),
            )
            .chain(
                vpp.proxy_arp
                    .ranges
                    .iter()
                    .cloned()
                    .map(ConfigItem::ProxyArpRange),
            )
            .chain(linux.routes.iter().cloned().map(ConfigItem::LinuxRoute))
            .chain(linux.arp_entries.iter().cloned().map(ConfigItem::LinuxArp))
            .chain(
                self.netalloc_config
                    .ip_addresses
                    .iter()
                    .cloned()
                    .map(ConfigItem::IpAllocation),
            )
            .collect()
    }

    /// Puts an item into the collection of its kind.
    pub fn place(&mut self, item: ConfigItem) {
        match item {
            ConfigItem::VppInterface(r) => self.vpp_config.interfaces.push(r),
            ConfigItem::VppRoute(r) => self.vpp_config.routes.push(r),
            ConfigItem::VppArp(r) => self.vpp_config.arps.push(r),
            ConfigItem::ProxyArpInterface(r) => self.vpp_config.proxy_arp.interfaces.push(r),
            ConfigItem::ProxyArpRange(r) => self.vpp_config.proxy_arp.ranges.push(r),
            ConfigItem::LinuxRoute(r) => self.linux_config.routes.push(r),
            ConfigItem::LinuxArp(r) => self.linux_config.arp_entries.push(r),
            ConfigItem::IpAllocation(r) => self.netalloc_config.ip_addresses.push(r),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extract_items().is_empty()
    }
}

impl FromIterator<ConfigItem> for Config {
    fn from_iter<T: IntoIterator<Item = ConfigItem>>(iter: T) -> Self {
        let mut config = Config::default();
        for item in iter {
            config.place(item);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_objects::tests as objects;

    #[test]
    fn test_kind_order_follows_declaration() {
        let kinds: Vec<ResourceKind> = ResourceKind::iter().collect();
        assert_eq!(kinds.first(), Some(&ResourceKind::VppInterface));
        assert_eq!(kinds.last(), Some(&ResourceKind::IpAllocation));
        for (pos, kind) in kinds.iter().enumerate() {
            assert_eq!(kind.position(), pos);
        }
        assert!(ResourceKind::VppInterface < ResourceKind::VppRoute);
        assert_eq!(ResourceKind::ProxyArpRange.to_string(), "proxy_arp_range");
    }

    #[test]
    fn test_kind_from_key() {
        assert_eq!(
            ResourceKind::from_key("config/vpp/v2/route/vrf/0/dst/10.0.0.0/24/gw/10.0.0.1"),
            Ok(ResourceKind::VppRoute)
        );
        assert_eq!(
            ResourceKind::split_key("config/vpp/v2/proxyarp/interface/tap0"),
            Ok((ResourceKind::ProxyArpInterface, "tap0"))
        );
        assert_eq!(
            ResourceKind::from_key("config/vpp/v2/interfaces/"),
            Err(ModelError::UnknownKey("config/vpp/v2/interfaces/".to_string()))
        );
        assert!(ResourceKind::from_key("config/unknown/thing").is_err());
    }

    #[test]
    fn test_route_key_uses_normalized_identity() {
        let item = ConfigItem::VppRoute(objects::mock_route("10.0.0.5/24", "10.0.0.1"));
        assert_eq!(
            get_key(&item).unwrap(),
            "config/vpp/v2/route/vrf/0/dst/10.0.0.0/24/gw/10.0.0.1"
        );
    }

    #[test]
    fn test_malformed_resource_has_no_key() {
        let mut route = objects::mock_route("10.0.0.0/24", "10.0.0.1");
        route.dst_network = "not-a-prefix".to_string();
        let err = get_key(&ConfigItem::VppRoute(route)).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidResource {
                kind: ResourceKind::VppRoute,
                ..
            }
        ));

        let iface = Interface::default();
        assert!(get_key(&ConfigItem::VppInterface(iface)).is_err());
    }

    #[test]
    fn test_extract_and_place_keep_kind_order() {
        let config = objects::mock_config();
        let items = config.extract_items();
        let kinds: Vec<ResourceKind> = items.iter().map(|i| i.kind()).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);

        let rebuilt: Config = items.into_iter().collect();
        assert_eq!(rebuilt, config);
    }

    #[test]
    fn test_config_item_is_tagged_by_kind() {
        let item = ConfigItem::VppInterface(objects::mock_interface("memif1"));
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["kind"], "vpp_interface");
        assert_eq!(json["name"], "memif1");
        let back: ConfigItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_config_parses_from_yaml() {
        let yaml = r#"
vpp_config:
  routes:
    - dst_network: 10.1.0.0/16
      next_hop_addr: 10.0.0.1
linux_config:
  arp_entries:
    - interface: veth1
      ip_address: 192.168.10.2
      hw_address: AA:BB:CC:DD:EE:FF
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.vpp_config.routes.len(), 1);
        assert_eq!(config.vpp_config.routes[0].weight, 0);
        assert_eq!(config.linux_config.arp_entries.len(), 1);
        assert!(config.netalloc_config.ip_addresses.is_empty());
    }

    #[test]
    fn test_find_seqnum() {
        let results = vec![
            KeyResult {
                key: "config/vpp/v2/interfaces/memif1".to_string(),
                status: ItemStatus::ok("configured"),
            },
            KeyResult::seqnum(7),
        ];
        assert_eq!(find_seqnum(&results), Some(7));
        assert_eq!(find_seqnum(&results[..1]), None);
    }
}
