//! Container network detection.
//!
//! The catch-all reject exempts the network the container sits on, so the
//! host and sibling containers stay reachable. Guessing wrong widens what
//! counts as local; it never weakens the tunnel requirement for anything else.

use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

use crate::netstate::{NetworkSnapshot, RouteDestination};

/// Docker's default bridge network.
pub const FALLBACK_CONTAINER_SUBNET: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(172, 17, 0, 0), 16);

/// Substrings of a route description that mark a container bridge.
const BRIDGE_MARKERS: &[&str] = &["docker", "br-"];

/// How the container subnet was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetSource {
    /// Address and prefix of the primary interface.
    PrimaryInterface,
    /// A route towards a bridge device.
    BridgeRoute,
    /// Nothing found; Docker's default.
    Fallback,
}

impl fmt::Display for SubnetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubnetSource::PrimaryInterface => "primary interface",
            SubnetSource::BridgeRoute => "bridge route",
            SubnetSource::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// Find the container subnet in `snapshot`.
pub fn detect_container_subnet(snapshot: &NetworkSnapshot, tunnel: &str) -> (Ipv4Net, SubnetSource) {
    if let Some(primary) = snapshot.primary_interface(tunnel)
        && let Some(address) = snapshot.address_of(primary)
    {
        let subnet = address.trunc();
        debug!("Container subnet {} from {}", subnet, primary);
        return (subnet, SubnetSource::PrimaryInterface);
    }

    let bridge = snapshot.routes.iter().find_map(|route| {
        let description = route.gateway_description();
        match route.destination {
            RouteDestination::Net(net) if BRIDGE_MARKERS.iter().any(|m| description.contains(m)) => Some(net),
            _ => None,
        }
    });
    if let Some(subnet) = bridge {
        debug!("Container subnet {} from bridge route", subnet);
        return (subnet.trunc(), SubnetSource::BridgeRoute);
    }

    warn!(
        "Could not detect container subnet, assuming {}",
        FALLBACK_CONTAINER_SUBNET
    );
    (FALLBACK_CONTAINER_SUBNET, SubnetSource::Fallback)
}
