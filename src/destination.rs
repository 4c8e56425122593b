//! Destination types
//!
//! A [`Destination`] names where a proxied connection is finally routed:
//! a network kind, an address (IP literal or domain name) and a port.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport network of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Not set
    #[default]
    Unknown,
    /// TCP stream
    Tcp,
    /// UDP datagrams
    Udp,
}

impl Network {
    /// Lowercase name used in logs and config
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination address: either an IP literal or a domain name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// IPv4 or IPv6 address
    Ip(IpAddr),
    /// Domain name, resolved by the dispatcher
    Domain(String),
}

impl Address {
    /// Get the IP address if this is an IP literal
    #[must_use]
    pub const fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::Ip(ip) => Some(*ip),
            Self::Domain(_) => None,
        }
    }

    /// Check if this address is a domain name
    #[must_use]
    pub const fn is_domain(&self) -> bool {
        matches!(self, Self::Domain(_))
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Self::Ip(ip)
    }
}

impl FromStr for Address {
    type Err = std::convert::Infallible;

    /// Parse an address. Bracketed IPv6 (`[::1]`) is accepted; anything that
    /// is not an IP literal is kept as a domain name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let unbracketed = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(trimmed);
        Ok(match unbracketed.parse::<IpAddr>() {
            Ok(ip) => Self::Ip(ip),
            Err(_) => Self::Domain(trimmed.to_ascii_lowercase()),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]"),
            Self::Ip(IpAddr::V4(ip)) => write!(f, "{ip}"),
            Self::Domain(domain) => f.write_str(domain),
        }
    }
}

/// Where a connection is routed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Network kind
    pub network: Network,
    /// Target address; `None` when nothing was configured or recovered
    pub address: Option<Address>,
    /// Target port
    pub port: u16,
}

impl Destination {
    /// Create a destination
    #[must_use]
    pub const fn new(network: Network, address: Option<Address>, port: u16) -> Self {
        Self {
            network,
            address,
            port,
        }
    }

    /// TCP destination for a socket address
    #[must_use]
    pub fn tcp(addr: SocketAddr) -> Self {
        Self::from_socket_addr(Network::Tcp, addr)
    }

    /// Destination for a socket address on the given network
    #[must_use]
    pub fn from_socket_addr(network: Network, addr: SocketAddr) -> Self {
        Self {
            network,
            address: Some(Address::Ip(addr.ip())),
            port: addr.port(),
        }
    }

    /// A destination is usable only with a known network, an address and a
    /// non-zero port.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.network != Network::Unknown && self.address.is_some() && self.port != 0
    }

    /// Socket address when the address is an IP literal
    #[must_use]
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.address
            .as_ref()
            .and_then(Address::ip)
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{}:{}:{}", self.network, address, self.port),
            None => write!(f, "{}:<none>:{}", self.network, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse() {
        assert_eq!(
            "10.0.0.1".parse::<Address>().unwrap(),
            Address::Ip("10.0.0.1".parse().unwrap())
        );
        assert_eq!(
            "[::1]".parse::<Address>().unwrap(),
            Address::Ip("::1".parse().unwrap())
        );
        let domain: Address = "Example.COM".parse().unwrap();
        assert!(domain.is_domain());
        assert_eq!(domain.to_string(), "example.com");
    }

    #[test]
    fn test_destination_validity() {
        let dst = Destination::tcp("127.0.0.1:80".parse().unwrap());
        assert!(dst.is_valid());

        let no_address = Destination::new(Network::Tcp, None, 80);
        assert!(!no_address.is_valid());

        let no_port = Destination::new(Network::Tcp, Some("1.1.1.1".parse().unwrap()), 0);
        assert!(!no_port.is_valid());

        let no_network = Destination::new(Network::Unknown, Some("1.1.1.1".parse().unwrap()), 53);
        assert!(!no_network.is_valid());
    }

    #[test]
    fn test_destination_display() {
        let v4 = Destination::tcp("8.8.8.8:443".parse().unwrap());
        assert_eq!(v4.to_string(), "tcp:8.8.8.8:443");

        let v6 = Destination::from_socket_addr(Network::Udp, "[2001:db8::1]:53".parse().unwrap());
        assert_eq!(v6.to_string(), "udp:[2001:db8::1]:53");

        let missing = Destination::new(Network::Tcp, None, 80);
        assert_eq!(missing.to_string(), "tcp:<none>:80");
    }

    #[test]
    fn test_socket_addr() {
        let dst = Destination::tcp("192.168.1.1:8080".parse().unwrap());
        assert_eq!(dst.socket_addr(), Some("192.168.1.1:8080".parse().unwrap()));

        let domain = Destination::new(Network::Tcp, Some("example.com".parse().unwrap()), 80);
        assert_eq!(domain.socket_addr(), None);
    }

    #[test]
    fn test_network_serde() {
        let nets: Vec<Network> = serde_json::from_str(r#"["tcp","udp"]"#).unwrap();
        assert_eq!(nets, vec![Network::Tcp, Network::Udp]);
        assert_eq!(serde_json::to_string(&Network::Tcp).unwrap(), r#""tcp""#);
    }
}
