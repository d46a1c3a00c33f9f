pub mod tests {
    use crate::{
        ArpEntry,
        Config,
        Interface,
        InterfaceType,
        IpAllocation,
        LinuxArpEntry,
        LinuxConfig,
        LinuxRoute,
        NetallocConfig,
        ProxyArp,
        ProxyArpInterface,
        ProxyArpRange,
        Route,
        RouteScope,
        VppConfig,
    };

    pub const TEST_INTERFACE: &str = "memif1";
    pub const TEST_HOST_INTERFACE: &str = "veth1";
    pub const TEST_MAC: &str = "02:00:00:00:00:01";

    pub fn mock_interface(name: &str) -> Interface {
        Interface {
            name: name.to_string(),
            interface_type: InterfaceType::Memif,
            enabled: true,
            phys_address: TEST_MAC.to_string(),
            mtu: 1500,
            vrf: 0,
            ip_addresses: vec!["10.0.0.2/24".to_string()],
        }
    }

    /// Route in VRF 0 with unset weight and no outgoing interface.
    pub fn mock_route(dst: &str, next_hop: &str) -> Route {
        Route {
            dst_network: dst.to_string(),
            next_hop_addr: next_hop.to_string(),
            ..Default::default()
        }
    }

    pub fn mock_vpp_arp(interface: &str, ip: &str) -> ArpEntry {
        ArpEntry {
            interface: interface.to_string(),
            ip_address: ip.to_string(),
            phys_address: TEST_MAC.to_string(),
            r#static: true,
        }
    }

    pub fn mock_proxy_arp_interface(name: &str) -> ProxyArpInterface {
        ProxyArpInterface {
            name: name.to_string(),
        }
    }

    pub fn mock_proxy_arp_range(first: &str, last: &str) -> ProxyArpRange {
        ProxyArpRange {
            first_ip_addr: first.to_string(),
            last_ip_addr: last.to_string(),
            vrf_id: 0,
        }
    }

    pub fn mock_linux_route(dst: &str, interface: &str) -> LinuxRoute {
        LinuxRoute {
            dst_network: dst.to_string(),
            outgoing_interface: interface.to_string(),
            gw_addr: String::new(),
            scope: RouteScope::Link,
            metric: 100,
        }
    }

    pub fn mock_linux_arp(interface: &str, ip: &str) -> LinuxArpEntry {
        LinuxArpEntry {
            interface: interface.to_string(),
            ip_address: ip.to_string(),
            hw_address: TEST_MAC.to_string(),
        }
    }

    pub fn mock_ip_allocation(network: &str, interface: &str, address: &str) -> IpAllocation {
        IpAllocation {
            network_name: network.to_string(),
            interface_name: interface.to_string(),
            address: address.to_string(),
            gw: String::new(),
        }
    }

    /// One resource of every kind, wired so that dependencies resolve.
    pub fn mock_config() -> Config {
        let mut route = mock_route("10.10.0.0/16", "10.0.0.1");
        route.outgoing_interface = TEST_INTERFACE.to_string();
        Config {
            vpp_config: VppConfig {
                interfaces: vec![mock_interface(TEST_INTERFACE)],
                routes: vec![route],
                arps: vec![mock_vpp_arp(TEST_INTERFACE, "10.0.0.1")],
                proxy_arp: ProxyArp {
                    interfaces: vec![mock_proxy_arp_interface(TEST_INTERFACE)],
                    ranges: vec![mock_proxy_arp_range("10.0.0.100", "10.0.0.120")],
                },
            },
            linux_config: LinuxConfig {
                routes: vec![mock_linux_route("192.168.50.0/24", TEST_HOST_INTERFACE)],
                arp_entries: vec![mock_linux_arp(TEST_HOST_INTERFACE, "192.168.50.1")],
            },
            netalloc_config: NetallocConfig {
                ip_addresses: vec![mock_ip_allocation("default", TEST_HOST_INTERFACE, "192.168.50.2/24")],
            },
        }
    }
}
