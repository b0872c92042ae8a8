//! Idempotent rule insertion and removal.
//!
//! [`RuleStore`] is the only path through which the controller touches the
//! chain. It keeps an ordered mirror of the rules it manages so reports and
//! the dry-run listing do not need to read the kernel back.

use std::sync::Arc;
use tracing::debug;

use super::PacketFilter;
use super::error::FirewallError;
use super::rule::{FirewallRuleSpec, Position, RuleIdentity};

/// Upper bound on deletions of one identity before giving up.
///
/// Chains can hold duplicates; anything beyond this means the delete is not
/// taking effect.
const MAX_REMOVALS: usize = 64;

/// Packet-filter rules managed by this process.
pub struct RuleStore {
    filter: Arc<dyn PacketFilter>,
    tracked: Vec<RuleIdentity>,
}

impl RuleStore {
    /// Manage rules through `filter`.
    pub fn new(filter: Arc<dyn PacketFilter>) -> Self {
        Self {
            filter,
            tracked: Vec::new(),
        }
    }

    /// Remove every copy of `rule`. Returns how many were removed; zero is
    /// not an error.
    pub fn remove(&mut self, rule: &RuleIdentity) -> Result<usize, FirewallError> {
        let mut removed = 0;
        while self.filter.delete(rule)? {
            removed += 1;
            if removed >= MAX_REMOVALS {
                return Err(FirewallError::RemovalDidNotConverge {
                    rule: rule.to_string(),
                    attempts: removed,
                });
            }
        }

        self.tracked.retain(|r| r != rule);
        if removed > 0 {
            debug!("Removed {} copies of '{}'", removed, rule);
        }
        Ok(removed)
    }

    /// Install `spec` at its position. `Nth` beyond the end of the chain is
    /// clamped to an append.
    pub fn install(&mut self, spec: &FirewallRuleSpec) -> Result<(), FirewallError> {
        let rule = spec.identity();
        match spec.position {
            Position::First => {
                self.filter.insert(rule, 1)?;
                self.tracked.insert(0, rule.clone());
            }
            Position::Nth(n) => {
                let len = self.filter.rule_count()?;
                let index = n.clamp(1, len + 1);
                self.filter.insert(rule, index)?;
                let at = (index - 1).min(self.tracked.len());
                self.tracked.insert(at, rule.clone());
            }
            Position::Last => {
                self.filter.append(rule)?;
                self.tracked.push(rule.clone());
            }
        }
        debug!("Installed '{}' at {:?}", rule, spec.position);
        Ok(())
    }

    /// Remove prior copies of the rule, then install it.
    pub fn replace(&mut self, spec: &FirewallRuleSpec) -> Result<(), FirewallError> {
        self.remove(spec.identity())?;
        self.install(spec)
    }

    /// Install `spec`, then delete older copies until one is left.
    ///
    /// Unlike [`replace`](Self::replace) the rule is never absent from the
    /// chain. Deletion takes the first match, so for an appended rule the new
    /// copy survives; for an inserted one the older copy further down does.
    pub fn reinstall(&mut self, spec: &FirewallRuleSpec) -> Result<usize, FirewallError> {
        let rule = spec.identity();
        self.tracked.retain(|r| r != rule);
        self.install(spec)?;

        let mut removed = 0;
        while self.copies(rule)? > 1 {
            if !self.filter.delete(rule)? {
                break;
            }
            removed += 1;
            if removed >= MAX_REMOVALS {
                return Err(FirewallError::RemovalDidNotConverge {
                    rule: rule.to_string(),
                    attempts: removed,
                });
            }
        }
        if removed > 0 {
            debug!("Dropped {} older copies of '{}'", removed, rule);
        }
        Ok(removed)
    }

    /// Rules in the chain that this program manages, in chain order.
    pub fn managed(&self) -> Result<Vec<RuleIdentity>, FirewallError> {
        self.filter.list()
    }

    fn copies(&self, rule: &RuleIdentity) -> Result<usize, FirewallError> {
        Ok(self.filter.list()?.iter().filter(|r| *r == rule).count())
    }

    /// Whether `rule` is present in the chain.
    pub fn contains(&self, rule: &RuleIdentity) -> Result<bool, FirewallError> {
        self.filter.exists(rule)
    }

    /// Rules installed by this store, in chain order.
    pub fn tracked(&self) -> &[RuleIdentity] {
        &self.tracked
    }
}
