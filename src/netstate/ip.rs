//! `ip` command backend.
//!
//! Reads links and routes through iproute2's JSON output (`ip -j`) so nothing
//! depends on the human-readable format. Route additions report
//! "File exists" as [`RouteError::AlreadyExists`].
//!
//! # Requirements
//!
//! - `CAP_NET_ADMIN` for [`RouteManager::add_route`]
//! - `ip` (iproute2 with JSON support) available in PATH

use ipnet::Ipv4Net;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::process::{Command, Output};
use tracing::debug;

use super::error::{NetError, RouteError};
use super::model::{LinkInfo, NetworkSnapshot, RouteDestination, RouteEntry};
use super::{NetworkView, RouteManager};

/// Network state backend driving the `ip` binary.
#[derive(Debug, Clone)]
pub struct IpCommand {
    program: String,
}

impl IpCommand {
    /// Use `ip` from PATH.
    pub fn new() -> Self {
        Self {
            program: "ip".to_string(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output, NetError> {
        let cmd_str = format!("{} {}", self.program, args.join(" "));
        debug!("Running: {}", cmd_str);

        Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| NetError::CommandFailed { cmd: cmd_str, source: e })
    }

    fn run_json<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T, NetError> {
        let output = self.run(args)?;
        let cmd_str = format!("{} {}", self.program, args.join(" "));

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(NetError::CommandError { cmd: cmd_str, stderr });
        }

        // An empty table prints nothing at all rather than `[]`.
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_str("[]").map_err(|e| NetError::Parse { cmd: cmd_str, source: e });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| NetError::Parse { cmd: cmd_str, source: e })
    }
}

impl Default for IpCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkView for IpCommand {
    fn snapshot(&self) -> Result<NetworkSnapshot, NetError> {
        let links: Vec<IpLink> = self.run_json(&["-j", "-4", "addr", "show"])?;
        let routes: Vec<IpRoute> = self.run_json(&["-j", "-4", "route", "show"])?;
        Ok(snapshot_from_json(links, routes))
    }
}

impl RouteManager for IpCommand {
    fn add_route(&self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<(), RouteError> {
        let dst = destination.to_string();
        let gw = gateway.to_string();
        let output = self.run(&["route", "add", &dst, "via", &gw])?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_route_error(dst, stderr))
    }
}

/// Map `ip route add` failure text to a route error kind.
fn classify_route_error(destination: String, stderr: String) -> RouteError {
    if stderr.contains("File exists") {
        RouteError::AlreadyExists { destination }
    } else {
        RouteError::Rejected {
            destination,
            detail: stderr,
        }
    }
}

/// One element of `ip -j addr show`.
#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    #[serde(default)]
    family: String,
    #[serde(default)]
    local: Option<String>,
    #[serde(default)]
    prefixlen: Option<u8>,
}

/// One element of `ip -j route show`.
#[derive(Debug, Deserialize)]
struct IpRoute {
    dst: String,
    #[serde(default)]
    gateway: Option<String>,
    #[serde(default)]
    dev: Option<String>,
}

fn snapshot_from_json(links: Vec<IpLink>, routes: Vec<IpRoute>) -> NetworkSnapshot {
    let links = links
        .into_iter()
        .map(|link| {
            let addresses = link
                .addr_info
                .iter()
                .filter(|a| a.family == "inet")
                .filter_map(|a| {
                    let addr: Ipv4Addr = a.local.as_deref()?.parse().ok()?;
                    Ipv4Net::new(addr, a.prefixlen?).ok()
                })
                .collect();
            LinkInfo::new(link.ifname, addresses)
        })
        .collect();

    let routes = routes
        .into_iter()
        .filter_map(|route| {
            let destination = RouteDestination::parse(&route.dst)?;
            // Blackhole/unreachable routes have no device.
            let device = route.dev?;
            let gateway = route.gateway.as_deref().and_then(|g| g.parse().ok());
            Some(RouteEntry::new(destination, gateway, device))
        })
        .collect();

    NetworkSnapshot { links, routes }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_JSON: &str = r#"[
        {"ifindex":1,"ifname":"lo","flags":["LOOPBACK","UP"],"addr_info":[
            {"family":"inet","local":"127.0.0.1","prefixlen":8,"scope":"host","label":"lo"}]},
        {"ifindex":2,"ifname":"eth0","flags":["UP"],"addr_info":[
            {"family":"inet","local":"172.18.0.5","prefixlen":16,"broadcast":"172.18.255.255","scope":"global"}]},
        {"ifindex":3,"ifname":"tun0","flags":["POINTOPOINT","UP"],"addr_info":[]}
    ]"#;

    const ROUTE_JSON: &str = r#"[
        {"dst":"default","gateway":"172.18.0.1","dev":"eth0","flags":[]},
        {"dst":"172.18.0.0/16","dev":"eth0","protocol":"kernel","scope":"link","prefsrc":"172.18.0.5","flags":[]},
        {"dst":"203.0.113.5","gateway":"172.18.0.1","dev":"eth0","flags":[]},
        {"type":"blackhole","dst":"192.0.2.0/24","flags":[]}
    ]"#;

    fn parse_fixture() -> NetworkSnapshot {
        let links: Vec<IpLink> = serde_json::from_str(ADDR_JSON).unwrap();
        let routes: Vec<IpRoute> = serde_json::from_str(ROUTE_JSON).unwrap();
        snapshot_from_json(links, routes)
    }

    #[test]
    fn test_parse_links() {
        let snap = parse_fixture();
        assert_eq!(snap.links.len(), 3);
        assert_eq!(snap.address_of("eth0"), Some("172.18.0.5/16".parse().unwrap()));
        assert!(snap.link("tun0").is_some());
        assert_eq!(snap.address_of("tun0"), None);
    }

    #[test]
    fn test_parse_routes_skips_deviceless() {
        let snap = parse_fixture();
        assert_eq!(snap.routes.len(), 3);
        assert_eq!(snap.default_gateway("tun0"), Some(Ipv4Addr::new(172, 18, 0, 1)));
        assert_eq!(snap.host_routes_via("eth0"), vec![Ipv4Addr::new(203, 0, 113, 5)]);
    }

    #[test]
    fn test_classify_route_error() {
        let err = classify_route_error(
            "10.10.0.0/24".to_string(),
            "RTNETLINK answers: File exists".to_string(),
        );
        assert!(matches!(err, RouteError::AlreadyExists { .. }));

        let err = classify_route_error(
            "10.10.0.0/24".to_string(),
            "RTNETLINK answers: Network is unreachable".to_string(),
        );
        match err {
            RouteError::Rejected { detail, .. } => assert!(detail.contains("unreachable")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    #[ignore = "requires iproute2"]
    fn test_live_snapshot() {
        let snap = IpCommand::new().snapshot().unwrap();
        assert!(snap.link("lo").is_some());
    }
}
