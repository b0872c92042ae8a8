//! Killswitch installation.
//!
//! [`FirewallController::configure`] waits for the network to settle, then
//! installs rules in an order that never opens a gap in front of the
//! catch-all:
//!
//! ```text
//!   1. -o tun0 ACCEPT                      (inserted first)
//!   2. targeted ACCEPTs                    (inserted at position two)
//!   ...
//!   N. ! -o tun0, not LOCAL, not container REJECT   (appended last)
//! ```
//!
//! Re-running with the same inputs converges on the same chain. The deny pair
//! is installed before older copies are removed, so a catch-all is present at
//! every step once the first one is in; catch-alls left by an earlier run for
//! a different container network are removed afterwards.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::PacketFilter;
use super::detect::{detect_container_subnet, SubnetSource};
use super::endpoint::{EndpointAddress, EndpointAllowance, TunnelClientConfig};
use super::error::FirewallError;
use super::rule::{FirewallRuleSpec, Position, RuleIdentity};
use super::store::RuleStore;
use super::subnet::parse_allowed_subnets;
use crate::netstate::{NetworkView, RouteError, RouteManager, TunnelState};
use crate::retry::{poll_until, PollBudget, PollOutcome, Probe};
use crate::telemetry::{audit, AuditEvent};

/// Position of targeted accepts: right behind the tunnel accept.
const TARGETED_POSITION: Position = Position::Nth(2);

/// Budgets for the pre-condition waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerTimings {
    /// Attempts per wait.
    pub attempts: u32,
    /// Delay between attempts.
    pub interval: Duration,
    /// Delay between the two observations that confirm route stability.
    pub debounce: Duration,
}

impl Default for ControllerTimings {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(1),
            debounce: Duration::from_millis(500),
        }
    }
}

impl ControllerTimings {
    fn budget(&self) -> PollBudget {
        PollBudget::new(self.attempts, self.interval)
    }
}

/// What a `configure` run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallReport {
    /// Tunnel interface the rules key on.
    pub interface: String,
    /// Network exempted from the catch-all.
    pub container_subnet: Ipv4Net,
    /// How the container network was found.
    pub subnet_source: SubnetSource,
    /// Tunnel state when rules were installed.
    pub tunnel: TunnelState,
    /// Rules installed by this run, in installation order.
    pub installed: Vec<RuleIdentity>,
    /// Allowed-subnet entries that failed validation.
    pub skipped_subnets: Vec<String>,
    /// Endpoints that were exempted, with the addresses used.
    pub endpoints: Vec<EndpointAllowance>,
    /// `remote` hosts with no address to exempt.
    pub uncovered_endpoints: Vec<String>,
}

/// Result of [`FirewallController::configure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigureOutcome {
    /// Every rule was installed.
    Applied(FirewallReport),
    /// The killswitch is up but some endpoint is not exempted.
    PartialFailure {
        /// What was installed.
        report: FirewallReport,
        /// What is missing.
        detail: String,
    },
    /// Nothing was installed.
    Skipped {
        /// Why.
        reason: String,
    },
}

impl ConfigureOutcome {
    /// The report, unless nothing was installed.
    pub fn report(&self) -> Option<&FirewallReport> {
        match self {
            ConfigureOutcome::Applied(report) | ConfigureOutcome::PartialFailure { report, .. } => Some(report),
            ConfigureOutcome::Skipped { .. } => None,
        }
    }
}

/// Installs and maintains the killswitch rule set.
pub struct FirewallController {
    view: Arc<dyn NetworkView>,
    routes: Arc<dyn RouteManager>,
    store: RuleStore,
    tunnel: String,
    timings: ControllerTimings,
}

impl FirewallController {
    /// Create a controller for `tunnel` with default timings.
    pub fn new(
        view: Arc<dyn NetworkView>,
        routes: Arc<dyn RouteManager>,
        filter: Arc<dyn PacketFilter>,
        tunnel: impl Into<String>,
    ) -> Self {
        Self {
            view,
            routes,
            store: RuleStore::new(filter),
            tunnel: tunnel.into(),
            timings: ControllerTimings::default(),
        }
    }

    /// Override the wait budgets.
    pub fn with_timings(mut self, timings: ControllerTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Tunnel interface the rules key on.
    pub fn tunnel(&self) -> &str {
        &self.tunnel
    }

    /// The rule store, for inspection.
    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// Install the killswitch.
    ///
    /// `allowed_subnets` is the operator's comma-separated allow-list;
    /// `client` supplies the tunnel endpoints to exempt. A route that cannot
    /// be added for an allowed subnet aborts with an error.
    pub async fn configure(
        &mut self,
        allowed_subnets: &str,
        client: &TunnelClientConfig,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ConfigureOutcome, FirewallError> {
        if let Some(reason) = self.wait_for_basic_stack(shutdown).await {
            return Ok(self.skip(reason));
        }

        let mut tunnel = match self.wait_for_tunnel_address(shutdown).await {
            Ok(state) => state,
            Err(reason) => return Ok(self.skip(reason)),
        };

        match self.wait_for_stable_route(shutdown).await {
            PollOutcome::Ready(stable) => tunnel = stable,
            PollOutcome::Cancelled => return Ok(self.skip("shutdown requested".to_string())),
            _ => {
                warn!(
                    "Route via {} was not confirmed stable; installing rules anyway",
                    self.tunnel
                );
                audit().log(AuditEvent::RouteUnstable {
                    interface: self.tunnel.clone(),
                });
            }
        }

        let snapshot = self.view.snapshot()?;
        let (container_subnet, subnet_source) = detect_container_subnet(&snapshot, &self.tunnel);
        info!(
            "Installing killswitch on {} (container subnet {} from {})",
            self.tunnel, container_subnet, subnet_source
        );

        let mut report = FirewallReport {
            interface: self.tunnel.clone(),
            container_subnet,
            subnet_source,
            tunnel,
            installed: Vec::new(),
            skipped_subnets: Vec::new(),
            endpoints: Vec::new(),
            uncovered_endpoints: Vec::new(),
        };

        self.install_deny_pair(container_subnet, &mut report)?;

        for subnet in parse_allowed_subnets(allowed_subnets) {
            let Some(cidr) = subnet.cidr else {
                audit().log(AuditEvent::SubnetRejected {
                    entry: subnet.raw.clone(),
                });
                report.skipped_subnets.push(subnet.raw);
                continue;
            };
            let gateway = snapshot
                .underlay_gateway(&self.tunnel)
                .ok_or(RouteError::NoDefaultGateway)?;
            self.route_subnet(cidr, gateway)?;
            self.install_targeted(RuleIdentity::subnet_accept(cidr), &mut report)?;
        }

        let primary = snapshot.primary_interface(&self.tunnel).map(str::to_string);
        for remote in &client.remotes {
            let ips = match &remote.address {
                EndpointAddress::Ip(ip) => vec![*ip],
                EndpointAddress::Hostname(host) => {
                    let ips = primary
                        .as_deref()
                        .map(|dev| snapshot.host_routes_via(dev))
                        .unwrap_or_default();
                    if ips.is_empty() {
                        warn!(
                            "No direct route found for remote {}; its traffic is not exempted",
                            host
                        );
                        audit().log(AuditEvent::EndpointUncovered {
                            host: host.clone(),
                            port: remote.port,
                        });
                        report.uncovered_endpoints.push(format!("{}:{}", host, remote.port));
                    }
                    ips
                }
            };

            for ip in &ips {
                self.install_targeted(
                    RuleIdentity::endpoint_accept(*ip, remote.protocol, remote.port),
                    &mut report,
                )?;
            }
            if !ips.is_empty() {
                report.endpoints.push(EndpointAllowance {
                    resolved_ips: ips,
                    ..remote.clone()
                });
            }
        }

        audit().log(AuditEvent::KillswitchApplied {
            interface: self.tunnel.clone(),
            container_subnet: container_subnet.to_string(),
            rules: report.installed.len(),
        });

        if report.uncovered_endpoints.is_empty() {
            info!("Killswitch applied with {} rules", report.installed.len());
            Ok(ConfigureOutcome::Applied(report))
        } else {
            let detail = format!(
                "no address found for endpoint(s) {}",
                report.uncovered_endpoints.join(", ")
            );
            warn!("Killswitch applied with gaps: {}", detail);
            Ok(ConfigureOutcome::PartialFailure { report, detail })
        }
    }

    fn skip(&self, reason: String) -> ConfigureOutcome {
        warn!("Killswitch not installed: {}", reason);
        audit().log(AuditEvent::KillswitchSkipped {
            interface: self.tunnel.clone(),
            reason: reason.clone(),
        });
        ConfigureOutcome::Skipped { reason }
    }

    /// `None` once a primary interface and default route exist.
    async fn wait_for_basic_stack(&self, shutdown: &mut watch::Receiver<bool>) -> Option<String> {
        let view = &self.view;
        let tunnel = self.tunnel.as_str();
        let outcome = poll_until(self.timings.budget(), shutdown, || async move {
            match view.snapshot() {
                Ok(snapshot) if snapshot.basic_stack_ready(tunnel) => Probe::Ready(()),
                Ok(_) => Probe::Pending,
                Err(e) => {
                    debug!("Snapshot failed: {}", e);
                    Probe::Pending
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(()) => None,
            PollOutcome::Cancelled => Some("shutdown requested".to_string()),
            PollOutcome::Failed(reason) => Some(reason),
            PollOutcome::Timeout { attempts } => Some(format!(
                "no primary interface with a default route after {} attempts",
                attempts
            )),
        }
    }

    async fn wait_for_tunnel_address(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<TunnelState, String> {
        let view = &self.view;
        let tunnel = self.tunnel.as_str();
        let outcome = poll_until(self.timings.budget(), shutdown, || async move {
            match view.snapshot() {
                Ok(snapshot) => {
                    let state = TunnelState::observe(&snapshot, tunnel);
                    if state.is_addressed() { Probe::Ready(state) } else { Probe::Pending }
                }
                Err(e) => {
                    debug!("Snapshot failed: {}", e);
                    Probe::Pending
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(state) => {
                debug!("{} has address {:?}", tunnel, state.assigned_address);
                Ok(state)
            }
            PollOutcome::Cancelled => Err("shutdown requested".to_string()),
            PollOutcome::Failed(reason) => Err(reason),
            PollOutcome::Timeout { attempts } => Err(format!(
                "{} has no address after {} attempts",
                tunnel, attempts
            )),
        }
    }

    /// Two observations `debounce` apart must both see a route via the
    /// tunnel.
    async fn wait_for_stable_route(&self, shutdown: &mut watch::Receiver<bool>) -> PollOutcome<TunnelState> {
        let view = &self.view;
        let tunnel = self.tunnel.as_str();
        let debounce = self.timings.debounce;
        poll_until(self.timings.budget(), shutdown, || async move {
            let Ok(first) = view.snapshot() else {
                return Probe::Pending;
            };
            let mut state = TunnelState::observe(&first, tunnel);
            if !state.route_present {
                return Probe::Pending;
            }

            tokio::time::sleep(debounce).await;

            let Ok(second) = view.snapshot() else {
                return Probe::Pending;
            };
            state.confirm(&TunnelState::observe(&second, tunnel));
            if state.stable_confirmed { Probe::Ready(state) } else { Probe::Pending }
        })
        .await
    }

    fn install_deny_pair(&mut self, container_subnet: Ipv4Net, report: &mut FirewallReport) -> Result<(), FirewallError> {
        let accept = RuleIdentity::tunnel_accept(&self.tunnel);
        let reject = RuleIdentity::catch_all_reject(&self.tunnel, container_subnet);

        self.store.reinstall(&FirewallRuleSpec::new(accept.clone(), Position::First))?;
        self.store.reinstall(&FirewallRuleSpec::new(reject.clone(), Position::Last))?;

        for stale in self.store.managed()? {
            let superseded = (stale.is_catch_all() && stale != reject) || (stale.is_tunnel_accept() && stale != accept);
            if superseded {
                let removed = self.store.remove(&stale)?;
                if removed > 0 {
                    info!("Removed {} superseded rule(s): {}", removed, stale);
                }
            }
        }

        report.installed.push(accept);
        report.installed.push(reject);
        Ok(())
    }

    fn route_subnet(&self, cidr: Ipv4Net, gateway: Ipv4Addr) -> Result<(), FirewallError> {
        match self.routes.add_route(cidr, gateway) {
            Ok(()) => {
                info!("Routed {} via {}", cidr, gateway);
                Ok(())
            }
            Err(RouteError::AlreadyExists { destination }) => {
                info!("Route to {} already exists", destination);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn install_targeted(&mut self, rule: RuleIdentity, report: &mut FirewallReport) -> Result<(), FirewallError> {
        self.store.replace(&FirewallRuleSpec::new(rule.clone(), TARGETED_POSITION))?;
        if !report.installed.contains(&rule) {
            report.installed.push(rule);
        }
        Ok(())
    }
}
