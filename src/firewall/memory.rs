//! In-memory packet filter and route table.
//!
//! Used by `--dry-run` to show what the controller would install, and by
//! tests. [`MemoryFilter`] behaves like a kernel chain: duplicates are
//! allowed, inserting past the end fails, and every mutation is recorded so
//! orderings can be checked after the fact.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use super::PacketFilter;
use super::error::FirewallError;
use super::rule::RuleIdentity;
use crate::netstate::{NetworkSnapshot, RouteDestination, RouteError, RouteManager};

#[derive(Debug, Default)]
struct ChainState {
    rules: Vec<RuleIdentity>,
    history: Vec<Vec<RuleIdentity>>,
}

impl ChainState {
    fn record(&mut self) {
        self.history.push(self.rules.clone());
    }
}

/// A single chain held in memory.
#[derive(Debug, Default)]
pub struct MemoryFilter {
    state: Mutex<ChainState>,
}

impl MemoryFilter {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain that already holds `rules`, in order.
    pub fn with_rules(rules: Vec<RuleIdentity>) -> Self {
        Self {
            state: Mutex::new(ChainState {
                rules,
                history: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        // A panicking test thread must not hide the chain from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current chain contents, head first.
    pub fn rules(&self) -> Vec<RuleIdentity> {
        self.lock().rules.clone()
    }

    /// Chain contents after each mutation, oldest first.
    pub fn history(&self) -> Vec<Vec<RuleIdentity>> {
        self.lock().history.clone()
    }
}

impl PacketFilter for MemoryFilter {
    fn insert(&self, rule: &RuleIdentity, index: usize) -> Result<(), FirewallError> {
        let mut state = self.lock();
        let len = state.rules.len();
        if index == 0 || index > len + 1 {
            return Err(FirewallError::InsertOutOfRange { index, len });
        }
        state.rules.insert(index - 1, rule.clone());
        state.record();
        Ok(())
    }

    fn append(&self, rule: &RuleIdentity) -> Result<(), FirewallError> {
        let mut state = self.lock();
        state.rules.push(rule.clone());
        state.record();
        Ok(())
    }

    fn delete(&self, rule: &RuleIdentity) -> Result<bool, FirewallError> {
        let mut state = self.lock();
        match state.rules.iter().position(|r| r == rule) {
            Some(pos) => {
                state.rules.remove(pos);
                state.record();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn exists(&self, rule: &RuleIdentity) -> Result<bool, FirewallError> {
        Ok(self.lock().rules.contains(rule))
    }

    fn rule_count(&self) -> Result<usize, FirewallError> {
        Ok(self.lock().rules.len())
    }

    fn list(&self) -> Result<Vec<RuleIdentity>, FirewallError> {
        Ok(self.rules())
    }
}

/// Route table that records additions instead of touching the kernel.
///
/// Destinations already present in the seed snapshot, or added earlier,
/// report [`RouteError::AlreadyExists`] just as `ip route add` does.
#[derive(Debug, Default)]
pub struct RecordingRoutes {
    existing: Vec<Ipv4Net>,
    added: Mutex<Vec<(Ipv4Net, Ipv4Addr)>>,
}

impl RecordingRoutes {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table with the routes of `snapshot`.
    pub fn from_snapshot(snapshot: &NetworkSnapshot) -> Self {
        let existing = snapshot
            .routes
            .iter()
            .filter_map(|r| match r.destination {
                RouteDestination::Net(net) => Some(net),
                RouteDestination::Default => None,
            })
            .collect();
        Self {
            existing,
            added: Mutex::new(Vec::new()),
        }
    }

    /// Routes added so far as `(destination, gateway)`.
    pub fn added(&self) -> Vec<(Ipv4Net, Ipv4Addr)> {
        self.added.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl RouteManager for RecordingRoutes {
    fn add_route(&self, destination: Ipv4Net, gateway: Ipv4Addr) -> Result<(), RouteError> {
        let mut added = self.added.lock().unwrap_or_else(|e| e.into_inner());
        if self.existing.contains(&destination) || added.iter().any(|(d, _)| *d == destination) {
            return Err(RouteError::AlreadyExists {
                destination: destination.to_string(),
            });
        }
        added.push((destination, gateway));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netstate::RouteEntry;

    #[test]
    fn test_insert_bounds() {
        let filter = MemoryFilter::new();
        let rule = RuleIdentity::tunnel_accept("tun0");

        assert!(matches!(
            filter.insert(&rule, 2),
            Err(FirewallError::InsertOutOfRange { index: 2, len: 0 })
        ));
        assert!(filter.insert(&rule, 0).is_err());
        filter.insert(&rule, 1).unwrap();
        assert_eq!(filter.rule_count().unwrap(), 1);
    }

    #[test]
    fn test_duplicates_and_delete() {
        let filter = MemoryFilter::new();
        let rule = RuleIdentity::subnet_accept("10.10.0.0/24".parse().unwrap());

        filter.append(&rule).unwrap();
        filter.append(&rule).unwrap();
        assert_eq!(filter.rule_count().unwrap(), 2);

        assert!(filter.delete(&rule).unwrap());
        assert!(filter.delete(&rule).unwrap());
        assert!(!filter.delete(&rule).unwrap());
        assert!(!filter.exists(&rule).unwrap());
    }

    #[test]
    fn test_history_records_each_mutation() {
        let filter = MemoryFilter::new();
        let rule = RuleIdentity::tunnel_accept("tun0");

        filter.append(&rule).unwrap();
        filter.delete(&rule).unwrap();
        // A miss is not a mutation.
        filter.delete(&rule).unwrap();

        let history = filter.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], vec![rule]);
        assert!(history[1].is_empty());
    }

    #[test]
    fn test_recording_routes_already_exists() {
        let snapshot = NetworkSnapshot {
            links: vec![],
            routes: vec![RouteEntry::new(
                RouteDestination::parse("10.10.0.0/24").unwrap(),
                Some("172.18.0.1".parse().unwrap()),
                "eth0",
            )],
        };
        let routes = RecordingRoutes::from_snapshot(&snapshot);
        let gw: Ipv4Addr = "172.18.0.1".parse().unwrap();

        assert!(matches!(
            routes.add_route("10.10.0.0/24".parse().unwrap(), gw),
            Err(RouteError::AlreadyExists { .. })
        ));
        routes.add_route("192.168.5.0/24".parse().unwrap(), gw).unwrap();
        assert!(matches!(
            routes.add_route("192.168.5.0/24".parse().unwrap(), gw),
            Err(RouteError::AlreadyExists { .. })
        ));
        assert_eq!(routes.added().len(), 1);
    }
}
