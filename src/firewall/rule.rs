//! Packet-filter rule model.
//!
//! A [`FirewallRuleSpec`] is a rule plus where to put it. Its
//! [`RuleIdentity`] (everything except the position) is what idempotent
//! removal compares against, so the same rule inserted at a different position
//! is still the same rule.

use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Verdict of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Let the packet through.
    Accept,
    /// Refuse the packet with an ICMP error.
    Reject,
}

impl Action {
    fn target(self) -> &'static str {
        match self {
            Action::Accept => "ACCEPT",
            Action::Reject => "REJECT",
        }
    }
}

/// Transport protocol of a targeted rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    /// UDP.
    Udp,
    /// TCP.
    Tcp,
}

impl Protocol {
    /// Lowercase protocol name as used by iptables.
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    /// Accepts the tunnel client's protocol spellings: `udp`, `udp4`,
    /// `udp6`, `tcp`, `tcp4`, `tcp-client`, `tcp6-client`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("udp") {
            Ok(Protocol::Udp)
        } else if lower.starts_with("tcp") {
            Ok(Protocol::Tcp)
        } else {
            Err(format!("unknown protocol '{}'", s))
        }
    }
}

/// Outgoing-interface match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InterfaceMatch {
    /// Packet leaves through this interface.
    Out(String),
    /// Packet leaves through any other interface.
    NotOut(String),
}

/// Destination match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationMatch {
    /// Destination inside this network.
    Net(Ipv4Net),
    /// Destination is neither a local address type (loopback, own
    /// addresses, broadcast) nor inside this network.
    NotLocalNorIn(Ipv4Net),
}

/// Where a rule goes in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Head of the chain.
    First,
    /// 1-based position; clamped to the end when the chain is shorter.
    Nth(usize),
    /// Tail of the chain.
    Last,
}

/// Everything that makes two rules "the same rule".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleIdentity {
    /// Verdict.
    pub action: Action,
    /// Outgoing interface match.
    pub interface: Option<InterfaceMatch>,
    /// Destination match.
    pub destination: Option<DestinationMatch>,
    /// Protocol match.
    pub protocol: Option<Protocol>,
    /// Destination port match (requires a protocol).
    pub port: Option<u16>,
}

impl RuleIdentity {
    /// Accept everything leaving through the tunnel.
    pub fn tunnel_accept(tunnel: &str) -> Self {
        Self {
            action: Action::Accept,
            interface: Some(InterfaceMatch::Out(tunnel.to_string())),
            destination: None,
            protocol: None,
            port: None,
        }
    }

    /// Reject everything not leaving through the tunnel, except local
    /// destinations and the container network.
    pub fn catch_all_reject(tunnel: &str, container_subnet: Ipv4Net) -> Self {
        Self {
            action: Action::Reject,
            interface: Some(InterfaceMatch::NotOut(tunnel.to_string())),
            destination: Some(DestinationMatch::NotLocalNorIn(container_subnet)),
            protocol: None,
            port: None,
        }
    }

    /// Accept everything towards an allowed subnet.
    pub fn subnet_accept(subnet: Ipv4Net) -> Self {
        Self {
            action: Action::Accept,
            interface: None,
            destination: Some(DestinationMatch::Net(subnet)),
            protocol: None,
            port: None,
        }
    }

    /// Accept the tunnel client's own traffic to one server endpoint.
    pub fn endpoint_accept(address: Ipv4Addr, protocol: Protocol, port: u16) -> Self {
        Self {
            action: Action::Accept,
            interface: None,
            destination: Some(DestinationMatch::Net(Ipv4Net::from(address))),
            protocol: Some(protocol),
            port: Some(port),
        }
    }

    /// Whether this is a catch-all reject for `tunnel`, whatever container
    /// subnet it exempts.
    pub fn is_catch_all_for(&self, tunnel: &str) -> bool {
        self.is_catch_all() && self.interface == Some(InterfaceMatch::NotOut(tunnel.to_string()))
    }

    /// Whether this is a catch-all reject for any tunnel.
    pub fn is_catch_all(&self) -> bool {
        self.action == Action::Reject
            && matches!(self.interface, Some(InterfaceMatch::NotOut(_)))
            && matches!(self.destination, Some(DestinationMatch::NotLocalNorIn(_)))
    }

    /// Whether this accepts all traffic leaving through some interface.
    pub fn is_tunnel_accept(&self) -> bool {
        self.action == Action::Accept
            && matches!(self.interface, Some(InterfaceMatch::Out(_)))
            && self.destination.is_none()
            && self.protocol.is_none()
    }

    /// Whether this accepts a specific destination (subnet or endpoint).
    pub fn is_targeted_accept(&self) -> bool {
        self.action == Action::Accept && matches!(self.destination, Some(DestinationMatch::Net(_)))
    }

    /// Match and target arguments for iptables, without the chain operation.
    pub fn iptables_args(&self) -> Vec<String> {
        let mut args = self.match_args();
        args.extend(["-j".to_string(), self.target().to_string()]);
        args
    }

    /// iptables jump target.
    pub fn target(&self) -> &'static str {
        self.action.target()
    }

    /// Match arguments only.
    pub fn match_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        match &self.interface {
            Some(InterfaceMatch::Out(name)) => {
                args.extend(["-o".to_string(), name.clone()]);
            }
            Some(InterfaceMatch::NotOut(name)) => {
                args.extend(["!".to_string(), "-o".to_string(), name.clone()]);
            }
            None => {}
        }

        match self.destination {
            Some(DestinationMatch::Net(net)) => {
                args.extend(["-d".to_string(), net.to_string()]);
            }
            Some(DestinationMatch::NotLocalNorIn(net)) => {
                args.extend(
                    ["-m", "addrtype", "!", "--dst-type", "LOCAL", "!", "-d"]
                        .into_iter()
                        .map(String::from),
                );
                args.push(net.to_string());
            }
            None => {}
        }

        if let Some(protocol) = self.protocol {
            args.extend(["-p".to_string(), protocol.as_str().to_string()]);
            if let Some(port) = self.port {
                args.extend(["--dport".to_string(), port.to_string()]);
            }
        }
        args
    }
}

impl fmt::Display for RuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.iptables_args().join(" "))
    }
}

/// A rule and where to install it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRuleSpec {
    /// The rule itself.
    pub rule: RuleIdentity,
    /// Where it goes.
    pub position: Position,
}

impl FirewallRuleSpec {
    /// Pair a rule with a position.
    pub fn new(rule: RuleIdentity, position: Position) -> Self {
        Self { rule, position }
    }

    /// Identity used for idempotent removal.
    pub fn identity(&self) -> &RuleIdentity {
        &self.rule
    }
}
