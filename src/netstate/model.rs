//! Snapshot of the namespace's interfaces and IPv4 main routing table.

use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;

/// Name used by OpenVPN for the first tun device when only `dev tun` is given.
pub const DEFAULT_TUNNEL_INTERFACE: &str = "tun0";

/// A network interface and its IPv4 addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Interface name (e.g. `eth0`, `tun0`).
    pub name: String,
    /// Assigned IPv4 addresses with their prefix lengths.
    pub addresses: Vec<Ipv4Net>,
}

impl LinkInfo {
    /// Create a link with the given addresses.
    pub fn new(name: impl Into<String>, addresses: Vec<Ipv4Net>) -> Self {
        Self {
            name: name.into(),
            addresses,
        }
    }

    fn is_loopback(&self) -> bool {
        self.name == "lo"
    }
}

/// Destination of a route entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDestination {
    /// `default` (0.0.0.0/0).
    Default,
    /// A specific network or host.
    Net(Ipv4Net),
}

impl RouteDestination {
    /// Parse the `dst` field of `ip -j route` output.
    ///
    /// Host routes are printed without a prefix length and map to `/32`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == "default" {
            return Some(Self::Default);
        }
        if raw.contains('/') {
            return raw.parse().ok().map(Self::Net);
        }
        raw.parse::<Ipv4Addr>()
            .ok()
            .and_then(|addr| Ipv4Net::new(addr, 32).ok())
            .map(Self::Net)
    }

    /// The host address if this is a `/32` route.
    pub fn host(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Net(net) if net.prefix_len() == 32 => Some(net.addr()),
            _ => None,
        }
    }
}

impl fmt::Display for RouteDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Net(net) => write!(f, "{}", net),
        }
    }
}

/// One entry of the main routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Route destination.
    pub destination: RouteDestination,
    /// Next-hop gateway, if any.
    pub gateway: Option<Ipv4Addr>,
    /// Outgoing device.
    pub device: String,
}

impl RouteEntry {
    /// Create a route entry.
    pub fn new(destination: RouteDestination, gateway: Option<Ipv4Addr>, device: impl Into<String>) -> Self {
        Self {
            destination,
            gateway,
            device: device.into(),
        }
    }

    /// Text describing where this route leads, used for bridge-network
    /// detection.
    pub fn gateway_description(&self) -> String {
        match self.gateway {
            Some(gw) => format!("via {} dev {}", gw, self.device),
            None => format!("dev {}", self.device),
        }
    }
}

/// Point-in-time view of links and routes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSnapshot {
    /// All interfaces with their IPv4 addresses.
    pub links: Vec<LinkInfo>,
    /// Main-table IPv4 routes.
    pub routes: Vec<RouteEntry>,
}

impl NetworkSnapshot {
    /// Look up an interface by name.
    pub fn link(&self, name: &str) -> Option<&LinkInfo> {
        self.links.iter().find(|l| l.name == name)
    }

    /// First IPv4 address assigned to `name`.
    pub fn address_of(&self, name: &str) -> Option<Ipv4Net> {
        self.link(name).and_then(|l| l.addresses.first().copied())
    }

    /// Default route that does not go through the tunnel.
    pub fn underlay_default_route(&self, tunnel: &str) -> Option<&RouteEntry> {
        self.routes
            .iter()
            .find(|r| r.destination == RouteDestination::Default && r.device != tunnel)
    }

    /// Gateway of the underlay default route.
    pub fn default_gateway(&self, tunnel: &str) -> Option<Ipv4Addr> {
        self.underlay_default_route(tunnel).and_then(|r| r.gateway)
    }

    /// Interface carrying non-tunnel traffic.
    ///
    /// The device of the underlay default route, or failing that the first
    /// addressed interface that is neither loopback nor the tunnel.
    pub fn primary_interface(&self, tunnel: &str) -> Option<&str> {
        if let Some(route) = self.underlay_default_route(tunnel) {
            return Some(route.device.as_str());
        }
        self.links
            .iter()
            .find(|l| !l.is_loopback() && l.name != tunnel && !l.addresses.is_empty())
            .map(|l| l.name.as_str())
    }

    /// Gateway for traffic that must bypass the tunnel.
    ///
    /// The underlay default gateway, or failing that the gateway of any route
    /// over the primary interface. The second case covers clients that
    /// replaced the default route and left only a host route to the server
    /// behind.
    pub fn underlay_gateway(&self, tunnel: &str) -> Option<Ipv4Addr> {
        if let Some(gateway) = self.default_gateway(tunnel) {
            return Some(gateway);
        }
        let primary = self.primary_interface(tunnel)?;
        self.routes_via(primary).find_map(|r| r.gateway)
    }

    /// Primary interface exists and a default route exists, on any device.
    pub fn basic_stack_ready(&self, tunnel: &str) -> bool {
        self.primary_interface(tunnel).is_some()
            && self.routes.iter().any(|r| r.destination == RouteDestination::Default)
    }

    /// Routes whose outgoing device is `device`.
    pub fn routes_via<'a>(&'a self, device: &'a str) -> impl Iterator<Item = &'a RouteEntry> + 'a {
        self.routes.iter().filter(move |r| r.device == device)
    }

    /// Whether `device` is the next hop for any route.
    pub fn has_route_via(&self, device: &str) -> bool {
        self.routes_via(device).next().is_some()
    }

    /// Whether all internet-bound traffic is routed through `device`.
    ///
    /// Accepts a `default` route on the device, or OpenVPN's `def1` pair
    /// (`0.0.0.0/1` and `128.0.0.0/1`) which overrides the default without
    /// replacing it.
    pub fn default_route_via(&self, device: &str) -> bool {
        let mut lower = false;
        let mut upper = false;
        for route in self.routes_via(device) {
            match route.destination {
                RouteDestination::Default => return true,
                RouteDestination::Net(net) if net.prefix_len() == 1 => {
                    if net.network() == Ipv4Addr::new(0, 0, 0, 0) {
                        lower = true;
                    } else if net.network() == Ipv4Addr::new(128, 0, 0, 0) {
                        upper = true;
                    }
                }
                RouteDestination::Net(_) => {}
            }
        }
        lower && upper
    }

    /// Host addresses with a `/32` route over `device`.
    pub fn host_routes_via(&self, device: &str) -> Vec<Ipv4Addr> {
        let mut hosts: Vec<Ipv4Addr> = self
            .routes_via(device)
            .filter_map(|r| r.destination.host())
            .collect();
        hosts.sort_unstable();
        hosts.dedup();
        hosts
    }
}

/// Observed state of the tunnel interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelState {
    /// Tunnel interface name.
    pub interface_name: String,
    /// Address assigned to the tunnel interface.
    pub assigned_address: Option<Ipv4Net>,
    /// At least one route goes through the tunnel.
    pub route_present: bool,
    /// Route presence was seen on two consecutive observations.
    pub stable_confirmed: bool,
}

impl TunnelState {
    /// Derive tunnel state from a snapshot. Stability is never confirmed by a
    /// single observation.
    pub fn observe(snapshot: &NetworkSnapshot, interface: &str) -> Self {
        Self {
            interface_name: interface.to_string(),
            assigned_address: snapshot.address_of(interface),
            route_present: snapshot.has_route_via(interface),
            stable_confirmed: false,
        }
    }

    /// Interface exists with an address.
    pub fn is_addressed(&self) -> bool {
        self.assigned_address.is_some()
    }

    /// Record a second observation. Stability is confirmed only if both
    /// observations saw a route.
    pub fn confirm(&mut self, second: &TunnelState) {
        self.stable_confirmed = self.route_present && second.route_present;
        self.route_present = second.route_present;
        if second.assigned_address.is_some() {
            self.assigned_address = second.assigned_address;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn route(dst: &str, gw: Option<&str>, dev: &str) -> RouteEntry {
        RouteEntry::new(
            RouteDestination::parse(dst).unwrap(),
            gw.map(|g| g.parse().unwrap()),
            dev,
        )
    }

    fn container_snapshot() -> NetworkSnapshot {
        NetworkSnapshot {
            links: vec![
                LinkInfo::new("lo", vec![net("127.0.0.1/8")]),
                LinkInfo::new("eth0", vec![net("172.18.0.5/16")]),
                LinkInfo::new("tun0", vec![net("10.8.0.6/24")]),
            ],
            routes: vec![
                route("default", Some("172.18.0.1"), "eth0"),
                route("0.0.0.0/1", Some("10.8.0.1"), "tun0"),
                route("128.0.0.0/1", Some("10.8.0.1"), "tun0"),
                route("10.8.0.0/24", None, "tun0"),
                route("172.18.0.0/16", None, "eth0"),
                route("203.0.113.5", Some("172.18.0.1"), "eth0"),
            ],
        }
    }

    #[test]
    fn test_parse_route_destination() {
        assert_eq!(RouteDestination::parse("default"), Some(RouteDestination::Default));
        assert_eq!(
            RouteDestination::parse("10.0.0.0/8"),
            Some(RouteDestination::Net(net("10.0.0.0/8")))
        );
        assert_eq!(
            RouteDestination::parse("203.0.113.5"),
            Some(RouteDestination::Net(net("203.0.113.5/32")))
        );
        assert_eq!(RouteDestination::parse("fe80::/64"), None);
    }

    #[test]
    fn test_primary_interface_and_gateway() {
        let snap = container_snapshot();
        assert_eq!(snap.primary_interface("tun0"), Some("eth0"));
        assert_eq!(snap.default_gateway("tun0"), Some(Ipv4Addr::new(172, 18, 0, 1)));
        assert!(snap.basic_stack_ready("tun0"));
    }

    #[test]
    fn test_primary_interface_without_default_route() {
        let snap = NetworkSnapshot {
            links: vec![
                LinkInfo::new("lo", vec![net("127.0.0.1/8")]),
                LinkInfo::new("eth0", vec![net("172.18.0.5/16")]),
            ],
            routes: vec![],
        };
        assert_eq!(snap.primary_interface("tun0"), Some("eth0"));
        assert!(!snap.basic_stack_ready("tun0"));
    }

    #[test]
    fn test_default_route_replaced_by_tunnel() {
        let snap = NetworkSnapshot {
            links: vec![
                LinkInfo::new("lo", vec![net("127.0.0.1/8")]),
                LinkInfo::new("eth0", vec![net("172.18.0.5/16")]),
                LinkInfo::new("tun0", vec![net("10.8.0.6/24")]),
            ],
            routes: vec![
                route("default", Some("10.8.0.1"), "tun0"),
                route("172.18.0.0/16", None, "eth0"),
                route("203.0.113.5", Some("172.18.0.1"), "eth0"),
            ],
        };
        assert!(snap.basic_stack_ready("tun0"));
        assert_eq!(snap.primary_interface("tun0"), Some("eth0"));
        assert_eq!(snap.default_gateway("tun0"), None);
        assert_eq!(snap.underlay_gateway("tun0"), Some(Ipv4Addr::new(172, 18, 0, 1)));
    }

    #[test]
    fn test_underlay_gateway_prefers_default_route() {
        let snap = container_snapshot();
        assert_eq!(snap.underlay_gateway("tun0"), Some(Ipv4Addr::new(172, 18, 0, 1)));
        assert_eq!(NetworkSnapshot::default().underlay_gateway("tun0"), None);
    }

    #[test]
    fn test_default_route_via_def1_pair() {
        let snap = container_snapshot();
        assert!(snap.default_route_via("tun0"));
        assert!(snap.default_route_via("eth0"));
        assert!(!snap.default_route_via("tun1"));
    }

    #[test]
    fn test_default_route_via_requires_both_halves() {
        let snap = NetworkSnapshot {
            links: vec![],
            routes: vec![route("0.0.0.0/1", Some("10.8.0.1"), "tun0")],
        };
        assert!(!snap.default_route_via("tun0"));
    }

    #[test]
    fn test_host_routes_via_primary() {
        let snap = container_snapshot();
        assert_eq!(snap.host_routes_via("eth0"), vec![Ipv4Addr::new(203, 0, 113, 5)]);
        assert!(snap.host_routes_via("tun0").is_empty());
    }

    #[test]
    fn test_tunnel_state_observe_and_confirm() {
        let snap = container_snapshot();
        let mut state = TunnelState::observe(&snap, "tun0");
        assert!(state.is_addressed());
        assert!(state.route_present);
        assert!(!state.stable_confirmed);

        let second = TunnelState::observe(&snap, "tun0");
        state.confirm(&second);
        assert!(state.stable_confirmed);
    }

    #[test]
    fn test_tunnel_state_not_confirmed_when_route_flaps() {
        let snap = container_snapshot();
        let mut state = TunnelState::observe(&snap, "tun0");
        let gone = TunnelState::observe(&NetworkSnapshot::default(), "tun0");
        state.confirm(&gone);
        assert!(!state.stable_confirmed);
        assert!(!state.route_present);
    }
}
