//! Network state observation for the tunnel namespace.
//!
//! This module reads the namespace's links and IPv4 routes and derives the
//! facts the rest of the crate cares about:
//! - Is the basic network stack up (primary interface + default route)?
//! - Does the tunnel interface exist with an address?
//! - Does any route, or the default route, go through the tunnel?
//! - Which hosts are routed directly over the primary interface?
//!
//! # Architecture
//!
//! ```text
//!   ReadinessMonitor ──┐                    ┌── HealthChecker
//!                      ▼                    ▼
//!                  NetworkView::snapshot() ─── NetworkSnapshot
//!                      ▲
//!   FirewallController ┘── RouteManager::add_route()
//! ```
//!
//! [`NetworkView`] is read-only and shared freely between tasks.
//! [`RouteManager`] is only used by the firewall controller.

pub mod error;
pub mod ip;
pub mod model;
pub mod readiness;

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

pub use error::{NetError, RouteError};
pub use ip::IpCommand;
pub use model::{
    LinkInfo, NetworkSnapshot, RouteDestination, RouteEntry, TunnelState,
    DEFAULT_TUNNEL_INTERFACE,
};
pub use readiness::{
    Readiness, ReadinessMonitor, DEFAULT_READINESS_ATTEMPTS, DEFAULT_READINESS_INTERVAL,
};

/// Read access to the namespace's links and routes.
pub trait NetworkView: Send + Sync {
    /// Take a snapshot of the current links and main-table routes.
    fn snapshot(&self) -> Result<NetworkSnapshot, NetError>;
}

/// Write access to the routing table.
pub trait RouteManager: Send + Sync {
    /// Route `destination` through `gateway`.
    ///
    /// Returns [`RouteError::AlreadyExists`] when the route is already there.
    fn add_route(&self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<(), RouteError>;
}
