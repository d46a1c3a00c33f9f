//! Host networking driver backed by the iproute2 `ip` command.
//!
//! Programs host routes with `ip route replace/del` and neighbor entries with
//! `ip neigh replace/del`; dumps parse `ip -json` output.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use data_model::{addr, LinuxArpEntry, LinuxRoute, Resource, RouteScope};
use serde::Deserialize;
use tokio::{process::Command, sync::Mutex};
use tracing::{debug, info};

use crate::driver::ResourceDriver;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Kernel replies for deleting something that is not there.
const MISSING_OBJECT_ERRORS: [&str; 2] = ["No such process", "No such file or directory"];

pub struct Iproute2 {
    ip_binary: String,
    // `ip` invocations modifying the same tables race with each other.
    lock: Arc<Mutex<()>>,
}

impl Iproute2 {
    pub fn new(ip_binary: impl Into<String>) -> Self {
        Self {
            ip_binary: ip_binary.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn ip(&self, args: &[String]) -> Result<String> {
        let _lock = self.lock.lock().await;
        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Command::new(&self.ip_binary)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .with_context(|| format!("{} {} timed out", self.ip_binary, args.join(" ")))?
        .with_context(|| format!("failed to execute {}", self.ip_binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("ip {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Like `ip`, but a missing object counts as deleted.
    async fn ip_delete(&self, args: &[String]) -> Result<()> {
        match self.ip(args).await {
            Ok(_) => Ok(()),
            Err(e) if is_missing_object(&e) => {
                debug!(args = %args.join(" "), "object already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn is_missing_object(err: &anyhow::Error) -> bool {
    let message = err.to_string();
    MISSING_OBJECT_ERRORS.iter().any(|m| message.contains(m))
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

pub(crate) fn route_args(verb: &str, route: &LinuxRoute) -> Vec<String> {
    let mut cmd = args(&["route", verb, &route.dst_network, "dev", &route.outgoing_interface]);
    if !route.gw_addr.is_empty() {
        cmd.extend(args(&["via", &route.gw_addr]));
    }
    if verb != "del" {
        cmd.extend(args(&["scope", route.scope.as_ref()]));
    }
    cmd.extend(args(&["metric", &route.metric.to_string()]));
    cmd
}

pub(crate) fn neigh_args(verb: &str, entry: &LinuxArpEntry) -> Vec<String> {
    let mut cmd = args(&["neigh", verb, &entry.ip_address]);
    if verb != "del" {
        cmd.extend(args(&["lladdr", &entry.hw_address, "nud", "permanent"]));
    }
    cmd.extend(args(&["dev", &entry.interface]));
    cmd
}

#[derive(Deserialize)]
struct IpRouteJson {
    dst: String,
    #[serde(default)]
    gateway: Option<String>,
    #[serde(default)]
    dev: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    metric: Option<u32>,
}

#[derive(Deserialize)]
struct IpNeighJson {
    dst: String,
    #[serde(default)]
    dev: Option<String>,
    #[serde(default)]
    lladdr: Option<String>,
}

/// Parses `ip -json route show`. Routes without a device and scopes the
/// model cannot express are skipped.
pub(crate) fn parse_routes(json: &str, ipv4: bool) -> Result<Vec<LinuxRoute>> {
    let routes: Vec<IpRouteJson> =
        serde_json::from_str(json).context("unexpected `ip -json route` output")?;
    let routes = routes
        .into_iter()
        .filter_map(|r| {
            let dev = r.dev?;
            let scope = match r.scope.as_deref() {
                None | Some("global") | Some("universe") => RouteScope::Global,
                Some("link") => RouteScope::Link,
                Some("host") => RouteScope::Host,
                Some(_) => return None,
            };
            let dst = match r.dst.as_str() {
                "default" if ipv4 => "0.0.0.0/0".to_string(),
                "default" => "::/0".to_string(),
                dst if dst.contains('/') => dst.to_string(),
                dst if ipv4 => format!("{dst}/32"),
                dst => format!("{dst}/128"),
            };
            addr::canonical_prefix(&dst).ok()?;
            Some(
                LinuxRoute {
                    dst_network: dst,
                    outgoing_interface: dev,
                    gw_addr: r.gateway.unwrap_or_default(),
                    scope,
                    metric: r.metric.unwrap_or_default(),
                }
                .normalized(),
            )
        })
        .collect();
    Ok(routes)
}

/// Parses `ip -json neigh show`, skipping entries without a link address.
pub(crate) fn parse_neighbors(json: &str) -> Result<Vec<LinuxArpEntry>> {
    let neighbors: Vec<IpNeighJson> =
        serde_json::from_str(json).context("unexpected `ip -json neigh` output")?;
    Ok(neighbors
        .into_iter()
        .filter_map(|n| {
            Some(
                LinuxArpEntry {
                    interface: n.dev?,
                    ip_address: n.dst,
                    hw_address: n.lladdr?,
                }
                .normalized(),
            )
        })
        .collect())
}

fn empty_if_blank(output: &str) -> &str {
    if output.trim().is_empty() {
        "[]"
    } else {
        output
    }
}

#[async_trait]
impl ResourceDriver<LinuxRoute> for Iproute2 {
    async fn configure(&self, route: &LinuxRoute) -> Result<()> {
        info!(
            dst = %route.dst_network,
            dev = %route.outgoing_interface,
            "replacing host route"
        );
        self.ip(&route_args("replace", route)).await?;
        Ok(())
    }

    async fn delete(&self, route: &LinuxRoute) -> Result<()> {
        info!(
            dst = %route.dst_network,
            dev = %route.outgoing_interface,
            "deleting host route"
        );
        self.ip_delete(&route_args("del", route)).await
    }

    fn supports_dump(&self) -> bool {
        true
    }

    async fn dump(&self) -> Result<Vec<LinuxRoute>> {
        let v4 = self.ip(&args(&["-json", "-4", "route", "show"])).await?;
        let v6 = self.ip(&args(&["-json", "-6", "route", "show"])).await?;
        let mut routes = parse_routes(empty_if_blank(&v4), true)?;
        routes.extend(parse_routes(empty_if_blank(&v6), false)?);
        Ok(routes)
    }
}

#[async_trait]
impl ResourceDriver<LinuxArpEntry> for Iproute2 {
    async fn configure(&self, entry: &LinuxArpEntry) -> Result<()> {
        info!(
            ip = %entry.ip_address,
            dev = %entry.interface,
            "replacing neighbor entry"
        );
        self.ip(&neigh_args("replace", entry)).await?;
        Ok(())
    }

    async fn delete(&self, entry: &LinuxArpEntry) -> Result<()> {
        info!(
            ip = %entry.ip_address,
            dev = %entry.interface,
            "deleting neighbor entry"
        );
        self.ip_delete(&neigh_args("del", entry)).await
    }

    fn supports_dump(&self) -> bool {
        true
    }

    async fn dump(&self) -> Result<Vec<LinuxArpEntry>> {
        let output = self.ip(&args(&["-json", "neigh", "show"])).await?;
        parse_neighbors(empty_if_blank(&output))
    }
}

#[cfg(test)]
mod tests {
    use data_model::test_objects::tests::{mock_linux_arp, mock_linux_route};

    use super::*;

    #[test]
    fn test_route_args() {
        let mut route = mock_linux_route("192.168.50.0/24", "veth1");
        route.gw_addr = "192.168.50.1".to_string();
        assert_eq!(
            route_args("replace", &route).join(" "),
            "route replace 192.168.50.0/24 dev veth1 via 192.168.50.1 scope link metric 100"
        );
        assert_eq!(
            route_args("del", &route).join(" "),
            "route del 192.168.50.0/24 dev veth1 via 192.168.50.1 metric 100"
        );
    }

    #[test]
    fn test_neigh_args() {
        let entry = mock_linux_arp("veth1", "192.168.50.1");
        assert_eq!(
            neigh_args("replace", &entry).join(" "),
            "neigh replace 192.168.50.1 lladdr 02:00:00:00:00:01 nud permanent dev veth1"
        );
        assert_eq!(
            neigh_args("del", &entry).join(" "),
            "neigh del 192.168.50.1 dev veth1"
        );
    }

    #[test]
    fn test_parse_routes() -> Result<()> {
        let json = r#"[
            {"dst":"default","gateway":"10.0.2.2","dev":"eth0","protocol":"dhcp","metric":100,"flags":[]},
            {"dst":"10.0.2.0/24","dev":"eth0","protocol":"kernel","scope":"link","prefsrc":"10.0.2.15","flags":[]},
            {"dst":"10.0.3.7","dev":"eth1","scope":"host","flags":[]},
            {"dst":"blackhole","flags":[]}
        ]"#;
        let routes = parse_routes(json, true)?;
        assert_eq!(routes.len(), 3);
        assert_eq!(routes[0].dst_network, "0.0.0.0/0");
        assert_eq!(routes[0].gw_addr, "10.0.2.2");
        assert_eq!(routes[0].metric, 100);
        assert_eq!(routes[0].scope, RouteScope::Global);
        assert_eq!(routes[1].scope, RouteScope::Link);
        assert_eq!(routes[2].dst_network, "10.0.3.7/32");
        assert_eq!(routes[2].scope, RouteScope::Host);
        Ok(())
    }

    #[test]
    fn test_parse_neighbors_skips_incomplete() -> Result<()> {
        let json = r#"[
            {"dst":"192.168.50.1","dev":"veth1","lladdr":"AA:BB:CC:DD:EE:FF","state":["PERMANENT"]},
            {"dst":"192.168.50.9","dev":"veth1","state":["FAILED"]}
        ]"#;
        let neighbors = parse_neighbors(json)?;
        assert_eq!(
            neighbors,
            vec![LinuxArpEntry {
                interface: "veth1".to_string(),
                ip_address: "192.168.50.1".to_string(),
                hw_address: "aa:bb:cc:dd:ee:ff".to_string(),
            }]
        );
        Ok(())
    }

    #[test]
    fn test_missing_object_detection() {
        let err = anyhow::anyhow!("ip route del 10.0.0.0/24 failed: RTNETLINK answers: No such process");
        assert!(is_missing_object(&err));
        assert!(!is_missing_object(&anyhow::anyhow!("Operation not permitted")));
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let driver = Iproute2::new("/nonexistent/ip");
        let route = mock_linux_route("192.168.50.0/24", "veth1");
        let result = ResourceDriver::<LinuxRoute>::configure(&driver, &route).await;
        assert!(result.is_err());
    }
}
