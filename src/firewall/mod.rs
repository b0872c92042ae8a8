//! Egress killswitch.
//!
//! Installs a deny-by-default rule set in the namespace's egress chain so
//! nothing leaves except through the tunnel, to the container network, to
//! operator-allowed subnets, or to the tunnel server itself.
//!
//! # Architecture
//!
//! ```text
//! FirewallController
//!   ├── subnet::parse_allowed_subnets   (operator allow-list)
//!   ├── endpoint::TunnelClientConfig    (remote directives)
//!   ├── detect::detect_container_subnet
//!   └── RuleStore ── PacketFilter ──┬── IptablesFilter
//!                                   └── MemoryFilter (dry run, tests)
//! ```
//!
//! # Requirements
//!
//! - `CAP_NET_ADMIN` in the tunnel's network namespace
//! - `iptables` and `ip` in PATH

pub mod controller;
pub mod detect;
pub mod endpoint;
pub mod error;
pub mod iptables;
pub mod memory;
pub mod rule;
pub mod store;
pub mod subnet;

pub use controller::{ConfigureOutcome, ControllerTimings, FirewallController, FirewallReport};
pub use detect::{detect_container_subnet, SubnetSource, FALLBACK_CONTAINER_SUBNET};
pub use endpoint::{EndpointAddress, EndpointAllowance, TunnelClientConfig};
pub use error::FirewallError;
pub use iptables::{IptablesFilter, EGRESS_CHAIN, RULE_TAG};
pub use memory::{MemoryFilter, RecordingRoutes};
pub use rule::{Action, DestinationMatch, FirewallRuleSpec, InterfaceMatch, Position, Protocol, RuleIdentity};
pub use store::RuleStore;
pub use subnet::{parse_allowed_subnets, validate_cidr, AllowedSubnet};

/// One packet-filter chain.
///
/// Positions are 1-based like iptables'. Duplicate rules are allowed.
pub trait PacketFilter: Send + Sync {
    /// Insert `rule` so it ends up at `index`. Fails if `index` is past the
    /// end of the chain plus one.
    fn insert(&self, rule: &RuleIdentity, index: usize) -> Result<(), FirewallError>;

    /// Add `rule` at the end of the chain.
    fn append(&self, rule: &RuleIdentity) -> Result<(), FirewallError>;

    /// Delete the first copy of `rule`. `Ok(false)` if there was none.
    fn delete(&self, rule: &RuleIdentity) -> Result<bool, FirewallError>;

    /// Whether at least one copy of `rule` is present.
    fn exists(&self, rule: &RuleIdentity) -> Result<bool, FirewallError>;

    /// Number of rules in the chain.
    fn rule_count(&self) -> Result<usize, FirewallError>;

    /// Rules in the chain that were installed through this filter, head
    /// first. Rules added by anything else are not listed.
    fn list(&self) -> Result<Vec<RuleIdentity>, FirewallError>;
}
