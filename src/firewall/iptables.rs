//! iptables backend for the egress chain.
//!
//! Rule existence is decided by `iptables -C` exit status: exit 1 means "no
//! such rule", anything else non-zero is an error. Every rule carries a
//! `--comment tunnel-guard` tag; the `-S` listing is parsed only to enumerate
//! tagged rules, so a catch-all from an earlier run can be found even when its
//! exempted subnet is no longer known.
//! Every invocation passes `-w` so a concurrent xtables user (the tunnel
//! client's own `up` script, for one) makes us wait instead of fail.
//!
//! # Requirements
//!
//! - `CAP_NET_ADMIN` in the namespace
//! - `iptables` available in PATH

use ipnet::Ipv4Net;
use std::process::{Command, Output};
use tracing::debug;

use super::PacketFilter;
use super::error::FirewallError;
use super::rule::{Action, DestinationMatch, InterfaceMatch, Protocol, RuleIdentity};

/// Chain that carries locally generated traffic.
pub const EGRESS_CHAIN: &str = "OUTPUT";

/// Comment attached to every rule this program installs.
pub const RULE_TAG: &str = "tunnel-guard";

/// Exit code of `iptables -C` when the rule does not exist.
const RULE_NOT_FOUND: i32 = 1;

/// Packet filter driving the `iptables` binary.
#[derive(Debug, Clone)]
pub struct IptablesFilter {
    program: String,
    chain: String,
}

impl IptablesFilter {
    /// Manage the `OUTPUT` chain with `iptables` from PATH.
    pub fn new() -> Self {
        Self {
            program: "iptables".to_string(),
            chain: EGRESS_CHAIN.to_string(),
        }
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    fn run(&self, args: &[String]) -> Result<Output, FirewallError> {
        let cmd_str = self.command_line(args);
        debug!("Running: {}", cmd_str);

        Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| FirewallError::CommandFailed { cmd: cmd_str, source: e })
    }

    fn run_checked(&self, args: &[String]) -> Result<Output, FirewallError> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(command_error(self.command_line(args), &output));
        }
        Ok(output)
    }

    fn rule_args(&self, op: &str, index: Option<usize>, rule: &RuleIdentity) -> Vec<String> {
        let mut args = vec!["-w".to_string(), op.to_string(), self.chain.clone()];
        if let Some(index) = index {
            args.push(index.to_string());
        }
        args.extend(rule.match_args());
        args.extend(
            ["-m", "comment", "--comment", RULE_TAG, "-j", rule.target()]
                .into_iter()
                .map(String::from),
        );
        args
    }

    fn listing(&self) -> Result<String, FirewallError> {
        let args = vec!["-w".to_string(), "-S".to_string(), self.chain.clone()];
        let output = self.run_checked(&args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for IptablesFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketFilter for IptablesFilter {
    fn insert(&self, rule: &RuleIdentity, index: usize) -> Result<(), FirewallError> {
        self.run_checked(&self.rule_args("-I", Some(index), rule))?;
        Ok(())
    }

    fn append(&self, rule: &RuleIdentity) -> Result<(), FirewallError> {
        self.run_checked(&self.rule_args("-A", None, rule))?;
        Ok(())
    }

    fn delete(&self, rule: &RuleIdentity) -> Result<bool, FirewallError> {
        if !self.exists(rule)? {
            return Ok(false);
        }
        self.run_checked(&self.rule_args("-D", None, rule))?;
        Ok(true)
    }

    fn exists(&self, rule: &RuleIdentity) -> Result<bool, FirewallError> {
        let args = self.rule_args("-C", None, rule);
        let output = self.run(&args)?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(RULE_NOT_FOUND) => Ok(false),
            _ => Err(command_error(self.command_line(&args), &output)),
        }
    }

    fn rule_count(&self) -> Result<usize, FirewallError> {
        Ok(count_chain_rules(&self.listing()?))
    }

    fn list(&self) -> Result<Vec<RuleIdentity>, FirewallError> {
        Ok(self.listing()?.lines().filter_map(parse_tagged_rule).collect())
    }
}

fn command_error(cmd: String, output: &Output) -> FirewallError {
    FirewallError::CommandError {
        cmd,
        code: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Count rule lines in `iptables -S <chain>` output. The policy line (`-P`)
/// is not a rule.
fn count_chain_rules(listing: &str) -> usize {
    listing.lines().filter(|l| l.starts_with("-A ")).count()
}

/// Parse one `-A` line of `iptables -S` output back into a rule.
///
/// `None` for policy lines, untagged rules, and anything using options this
/// program never emits.
fn parse_tagged_rule(line: &str) -> Option<RuleIdentity> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "-A" {
        return None;
    }
    tokens.next()?;

    let mut tagged = false;
    let mut negate = false;
    let mut action = None;
    let mut interface = None;
    let mut network = None;
    let mut not_local = false;
    let mut protocol = None;
    let mut port = None;

    while let Some(token) = tokens.next() {
        match token {
            "!" => {
                negate = true;
                continue;
            }
            "-o" => {
                let name = tokens.next()?.to_string();
                interface = Some(if negate {
                    InterfaceMatch::NotOut(name)
                } else {
                    InterfaceMatch::Out(name)
                });
            }
            "-d" => network = Some((tokens.next()?.parse::<Ipv4Net>().ok()?, negate)),
            "--dst-type" => not_local = negate && tokens.next()? == "LOCAL",
            "-p" => protocol = Some(tokens.next()?.parse::<Protocol>().ok()?),
            "--dport" => port = Some(tokens.next()?.parse::<u16>().ok()?),
            "--comment" => tagged = tokens.next()?.trim_matches('"') == RULE_TAG,
            "-j" => {
                action = Some(match tokens.next()? {
                    "ACCEPT" => Action::Accept,
                    "REJECT" => Action::Reject,
                    _ => return None,
                })
            }
            "-m" | "--reject-with" => {
                tokens.next()?;
            }
            _ => return None,
        }
        negate = false;
    }

    if !tagged {
        return None;
    }
    let destination = match network {
        None => None,
        Some((net, false)) => Some(DestinationMatch::Net(net)),
        Some((net, true)) if not_local => Some(DestinationMatch::NotLocalNorIn(net)),
        Some(_) => return None,
    };

    Some(RuleIdentity {
        action: action?,
        interface,
        destination,
        protocol,
        port,
    })
}
