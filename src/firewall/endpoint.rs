//! Tunnel server endpoints from the client configuration.
//!
//! Only the directives that matter to the killswitch are read: `remote`,
//! global `proto`/`port` defaults, and `dev`. Inline blobs such as
//! `<ca>...</ca>` are skipped; `<connection>` blocks are read like top-level
//! lines.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tracing::{debug, warn};

use super::error::FirewallError;
use super::rule::Protocol;

/// Port used when neither the `remote` line nor a `port` directive sets one.
pub const DEFAULT_REMOTE_PORT: u16 = 1194;

/// Protocol used when neither the `remote` line nor a `proto` directive sets one.
pub const DEFAULT_REMOTE_PROTOCOL: Protocol = Protocol::Udp;

/// Address part of a `remote` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddress {
    /// Literal IPv4 address.
    Ip(Ipv4Addr),
    /// Name the client resolves itself.
    Hostname(String),
}

/// One tunnel server the client may connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAllowance {
    /// Server address.
    pub address: EndpointAddress,
    /// Server port.
    pub port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Addresses the rule is installed for: the address itself for literal
    /// IPs, empty for hostnames until the controller reports what it found.
    pub resolved_ips: Vec<Ipv4Addr>,
}

/// What the killswitch needs from the tunnel client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelClientConfig {
    /// `remote` directives, in file order.
    pub remotes: Vec<EndpointAllowance>,
    /// Tunnel device named by `dev`, normalised to a concrete interface.
    pub device: Option<String>,
}

impl TunnelClientConfig {
    /// Read and parse the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, FirewallError> {
        let content = fs::read_to_string(path).map_err(|e| FirewallError::ClientConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::parse(&content))
    }

    /// Parse configuration text. Malformed directives are skipped with a
    /// warning.
    pub fn parse(content: &str) -> Self {
        let lines = directive_lines(content);

        // Global defaults apply to every remote regardless of order.
        let mut default_port = DEFAULT_REMOTE_PORT;
        let mut default_protocol = DEFAULT_REMOTE_PROTOCOL;
        let mut device = None;
        for words in &lines {
            match words.as_slice() {
                ["port", port, ..] => match port.parse() {
                    Ok(p) => default_port = p,
                    Err(_) => warn!("Ignoring invalid port directive '{}'", port),
                },
                ["proto", proto, ..] => match proto.parse() {
                    Ok(p) => default_protocol = p,
                    Err(e) => warn!("Ignoring proto directive: {}", e),
                },
                ["dev", name, ..] => device = Some(normalise_device(name)),
                _ => {}
            }
        }

        let remotes = lines
            .iter()
            .filter_map(|words| match words.as_slice() {
                ["remote", rest @ ..] => parse_remote(rest, default_port, default_protocol),
                _ => None,
            })
            .collect();

        Self { remotes, device }
    }
}

/// Directive lines split into words, comments and inline blobs removed.
fn directive_lines(content: &str) -> Vec<Vec<&str>> {
    let mut lines = Vec::new();
    let mut inline_block: Option<&str> = None;

    for line in content.lines() {
        let line = line.trim();

        if let Some(tag) = inline_block {
            if line.strip_prefix("</").and_then(|l| l.strip_suffix('>')) == Some(tag) {
                inline_block = None;
            }
            continue;
        }

        if line.starts_with('#') || line.starts_with(';') || line.is_empty() {
            continue;
        }

        if let Some(tag) = line.strip_prefix('<').and_then(|l| l.strip_suffix('>')) {
            if tag == "connection" || tag == "/connection" {
                continue;
            }
            if !tag.starts_with('/') {
                inline_block = Some(tag);
            }
            continue;
        }

        lines.push(line.split_whitespace().collect());
    }

    lines
}

fn parse_remote(words: &[&str], default_port: u16, default_protocol: Protocol) -> Option<EndpointAllowance> {
    let host = *words.first()?;

    let port = match words.get(1) {
        Some(raw) => match raw.parse() {
            Ok(port) => port,
            Err(_) => {
                warn!("Skipping remote {}: invalid port '{}'", host, raw);
                return None;
            }
        },
        None => default_port,
    };

    let protocol = match words.get(2) {
        Some(raw) => match raw.parse() {
            Ok(protocol) => protocol,
            Err(e) => {
                warn!("Skipping remote {}: {}", host, e);
                return None;
            }
        },
        None => default_protocol,
    };

    let address = match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => EndpointAddress::Ip(ip),
        Ok(IpAddr::V6(_)) => {
            warn!("Skipping IPv6 remote {}: the killswitch manages IPv4 only", host);
            return None;
        }
        Err(_) => EndpointAddress::Hostname(host.to_string()),
    };

    debug!("Remote endpoint {}:{}/{}", host, port, protocol);
    let resolved_ips = match address {
        EndpointAddress::Ip(ip) => vec![ip],
        EndpointAddress::Hostname(_) => Vec::new(),
    };
    Some(EndpointAllowance {
        address,
        port,
        protocol,
        resolved_ips,
    })
}

/// `dev tun` asks for the first free tun device, which in a fresh namespace
/// is `tun0`.
fn normalise_device(name: &str) -> String {
    if name.ends_with(|c: char| c.is_ascii_digit()) {
        name.to_string()
    } else {
        format!("{}0", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_remote_with_port_and_proto() {
        let config = TunnelClientConfig::parse("client\nremote 203.0.113.5 1194 udp\n");
        assert_eq!(
            config.remotes,
            vec![EndpointAllowance {
                address: EndpointAddress::Ip("203.0.113.5".parse().unwrap()),
                port: 1194,
                protocol: Protocol::Udp,
                resolved_ips: vec!["203.0.113.5".parse().unwrap()],
            }]
        );
    }

    #[test]
    fn test_global_defaults_apply_regardless_of_order() {
        let config = TunnelClientConfig::parse(
            "remote vpn.example.com\n\
             remote 198.51.100.7 443\n\
             proto tcp-client\n\
             port 1443\n",
        );
        assert_eq!(config.remotes.len(), 2);
        assert_eq!(
            config.remotes[0].address,
            EndpointAddress::Hostname("vpn.example.com".to_string())
        );
        assert_eq!(config.remotes[0].port, 1443);
        assert_eq!(config.remotes[0].protocol, Protocol::Tcp);
        assert!(config.remotes[0].resolved_ips.is_empty());
        assert_eq!(config.remotes[1].port, 443);
        assert_eq!(config.remotes[1].protocol, Protocol::Tcp);
    }

    #[test]
    fn test_defaults_without_directives() {
        let config = TunnelClientConfig::parse("remote 192.0.2.1\n");
        assert_eq!(config.remotes[0].port, DEFAULT_REMOTE_PORT);
        assert_eq!(config.remotes[0].protocol, Protocol::Udp);
    }

    #[test]
    fn test_comments_and_inline_blocks_skipped() {
        let config = TunnelClientConfig::parse(
            "# remote 10.0.0.1\n\
             ; remote 10.0.0.2\n\
             <ca>\n\
             remote 10.0.0.3\n\
             </ca>\n\
             <connection>\n\
             remote 192.0.2.10 1195 tcp\n\
             </connection>\n",
        );
        assert_eq!(config.remotes.len(), 1);
        assert_eq!(config.remotes[0].address, EndpointAddress::Ip("192.0.2.10".parse().unwrap()));
        assert_eq!(config.remotes[0].port, 1195);
    }

    #[test]
    fn test_malformed_remotes_skipped() {
        let config = TunnelClientConfig::parse(
            "remote\n\
             remote 192.0.2.1 notaport\n\
             remote 192.0.2.2 1194 sctp\n\
             remote 2001:db8::1 1194 udp\n\
             remote 192.0.2.3\n",
        );
        assert_eq!(config.remotes.len(), 1);
        assert_eq!(config.remotes[0].address, EndpointAddress::Ip("192.0.2.3".parse().unwrap()));
    }

    #[test]
    fn test_device() {
        assert_eq!(TunnelClientConfig::parse("dev tun\n").device.as_deref(), Some("tun0"));
        assert_eq!(TunnelClientConfig::parse("dev tun3\n").device.as_deref(), Some("tun3"));
        assert_eq!(TunnelClientConfig::parse("client\n").device, None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "client\ndev tun\nremote 203.0.113.5 1194 udp").unwrap();

        let config = TunnelClientConfig::load(file.path()).unwrap();
        assert_eq!(config.remotes.len(), 1);
        assert_eq!(config.device.as_deref(), Some("tun0"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = TunnelClientConfig::load(Path::new("/nonexistent/client.ovpn")).unwrap_err();
        assert!(matches!(err, FirewallError::ClientConfigRead { .. }));
    }
}
