//! Endpoint resolution.
//!
//! Turns the configured `(ip, port, domain)` triple into a concrete [`SocketAddr`].
//! A domain wins over an ip literal and is looked up through the platform resolver;
//! when no port is configured it is inferred from the domain's scheme prefix.
use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs},
};

use log::debug;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_SECURE_PORT: u16 = 8883;
pub const SECURE_SCHEME: &str = "https://";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("domain {domain} DNS parsing error: {cause}")]
    Resolution { domain: String, cause: io::Error },

    #[error("ip address '{0}' is illegal")]
    InvalidAddress(String),

    #[error("either an ip and port or a domain must be configured")]
    MissingAddress,
}

/// Protocol family of an ip literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

pub fn resolve(
    ip: Option<&str>,
    port: Option<u16>,
    domain: Option<&str>,
) -> Result<SocketAddr, ResolveError> {
    match domain.filter(|d| !d.is_empty()) {
        Some(domain) => {
            let port = port.unwrap_or_else(|| default_port(domain));
            let ip = lookup(domain, port)?;
            debug!("resolved {domain} to {ip}:{port}");
            Ok(SocketAddr::new(ip, port))
        }
        None => {
            let (Some(ip), Some(port)) = (ip, port) else {
                return Err(ResolveError::MissingAddress);
            };
            if port == 0 {
                return Err(ResolveError::MissingAddress);
            }
            Ok(SocketAddr::new(parse_ip(ip)?, port))
        }
    }
}

/// Port used when a domain is configured without one.
pub fn default_port(domain: &str) -> u16 {
    if domain.starts_with(SECURE_SCHEME) {
        DEFAULT_SECURE_PORT
    } else {
        DEFAULT_PORT
    }
}

/// Classifies an ip literal by its shape.
pub fn classify(ip: &str) -> Result<Family, ResolveError> {
    if is_ipv4(ip) {
        Ok(Family::V4)
    } else if is_ipv6(ip) {
        Ok(Family::V6)
    } else {
        Err(ResolveError::InvalidAddress(ip.to_string()))
    }
}

pub fn parse_ip(ip: &str) -> Result<IpAddr, ResolveError> {
    let invalid = || ResolveError::InvalidAddress(ip.to_string());
    match classify(ip)? {
        Family::V4 => {
            let mut octets = [0u8; 4];
            for (slot, part) in octets.iter_mut().zip(ip.split('.')) {
                *slot = part.parse().map_err(|_| invalid())?;
            }
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        Family::V6 => ip
            .parse::<Ipv6Addr>()
            .map(IpAddr::V6)
            .map_err(|_| invalid()),
    }
}

fn lookup(domain: &str, port: u16) -> Result<IpAddr, ResolveError> {
    let host = domain
        .split_once("://")
        .map_or(domain, |(_, rest)| rest)
        .trim_end_matches('/');

    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|cause| ResolveError::Resolution {
            domain: domain.to_string(),
            cause,
        })?;

    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| ResolveError::Resolution {
            domain: domain.to_string(),
            cause: io::Error::new(io::ErrorKind::NotFound, "no address records"),
        })
}

fn is_ipv4(ip: &str) -> bool {
    if ip.contains(':') {
        return false;
    }
    let parts = ip.split('.').collect::<Vec<&str>>();
    parts.len() == 4 && parts.iter().all(|p| is_octet(p))
}

/// Matches `25[0-5]|2[0-4]\d|[01]?\d\d?`.
fn is_octet(part: &str) -> bool {
    let bytes = part.as_bytes();
    if bytes.is_empty() || bytes.len() > 3 || !bytes.iter().all(u8::is_ascii_digit) {
        return false;
    }
    match bytes {
        [b'2', b'5', d] => *d <= b'5',
        [b'2', b'0'..=b'4', _] => true,
        [first, _, _] => *first == b'0' || *first == b'1',
        _ => true,
    }
}

fn is_ipv6(ip: &str) -> bool {
    if !ip.bytes().all(|b| b.is_ascii_hexdigit() || b == b':' || b == b'.') {
        return false;
    }
    // A hextet is a hex digit run terminated by a colon.
    ip.starts_with("::")
        || ip
            .as_bytes()
            .windows(2)
            .any(|w| w[0].is_ascii_hexdigit() && w[1] == b':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_ipv4() {
        for ip in ["127.0.0.1", "255.255.255.255", "0.0.0.0", "10.01.2.3"] {
            assert_eq!(classify(ip).unwrap(), Family::V4, "{ip}");
        }
    }

    #[test]
    fn classify_ipv6() {
        for ip in ["::1", "fe80::1", "2001:db8:0:0:0:0:2:1", "::"] {
            assert_eq!(classify(ip).unwrap(), Family::V6, "{ip}");
        }
    }

    #[test]
    fn classify_rejects_garbage() {
        for ip in ["256.1.1.1", "1.2.3", "example.com", "", "1.2.3.4.5"] {
            assert!(
                matches!(classify(ip), Err(ResolveError::InvalidAddress(_))),
                "{ip}"
            );
        }
    }

    #[test]
    fn default_port_follows_scheme() {
        assert_eq!(default_port("https://tracker.example.com"), 8883);
        assert_eq!(default_port("tracker.example.com"), 1883);
    }

    #[test]
    fn resolve_ip_literal() {
        let addr = resolve(Some("10.0.0.7"), Some(31500), None).unwrap();
        assert_eq!(addr, "10.0.0.7:31500".parse().unwrap());
    }

    #[test]
    fn resolve_leading_zero_octets() {
        let addr = resolve(Some("010.000.000.007"), Some(80), None).unwrap();
        assert_eq!(addr, "10.0.0.7:80".parse().unwrap());
    }

    #[test]
    fn resolve_empty_domain_uses_ip() {
        let addr = resolve(Some("::1"), Some(9000), Some("")).unwrap();
        assert_eq!(addr, "[::1]:9000".parse().unwrap());
    }

    #[test]
    fn resolve_requires_port_without_domain() {
        assert!(matches!(
            resolve(Some("10.0.0.7"), None, None),
            Err(ResolveError::MissingAddress)
        ));
        assert!(matches!(
            resolve(None, None, None),
            Err(ResolveError::MissingAddress)
        ));
    }

    #[test]
    fn resolve_localhost_domain() {
        let addr = resolve(None, None, Some("localhost")).unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn resolve_strips_scheme() {
        let addr = resolve(None, None, Some("https://localhost")).unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), DEFAULT_SECURE_PORT);
    }

    #[test]
    fn resolve_unknown_domain_fails() {
        let err = resolve(None, Some(1), Some("tracker.invalid")).unwrap_err();
        assert!(matches!(err, ResolveError::Resolution { ref domain, .. } if domain == "tracker.invalid"));
    }
}
