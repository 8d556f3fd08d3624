// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Addresses and URIs.
//!
//! [`Address`] distinguishes IPv4 from IPv6 explicitly rather than
//! comparing raw host bytes, so a v4-mapped v6 address never compares
//! equal to the plain v4 form it happens to encode.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl Address {
    pub fn ip(self) -> IpAddr {
        match self {
            Address::V4(a) => IpAddr::V4(a),
            Address::V6(a) => IpAddr::V6(a),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(a) => Address::V4(a),
            IpAddr::V6(a) => Address::V6(a),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::V4(a) => write!(f, "{a}"),
            Address::V6(a) => write!(f, "[{a}]"),
        }
    }
}

/// A parsed `http(s)://host[:port]/path` reference, as found in a
/// resource's `href` or a FooLink's `href`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Uri {
    pub fn parse(s: &str) -> Result<Uri, Error> {
        let (secure, rest) = if let Some(r) = s.strip_prefix("https://") {
            (true, r)
        } else if let Some(r) = s.strip_prefix("http://") {
            (false, r)
        } else {
            return Err(Error::InvalidUri(s.to_string()));
        };

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(Error::InvalidUri(s.to_string()));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if !h.is_empty() && p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                let port: u16 = p.parse().map_err(|_| Error::InvalidUri(s.to_string()))?;
                (h.to_string(), port)
            }
            _ => (authority.to_string(), if secure { 443 } else { 80 }),
        };

        Ok(Uri {
            secure,
            host,
            port,
            path: path.to_string(),
        })
    }

    /// This URI's path, including any query string, as sent in a GET
    /// request line.
    pub fn request_target(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{scheme}://{}:{}{}", self.host, self.port, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_and_path() {
        let u = Uri::parse("https://edev.example.com:8443/edev/0/der").unwrap();
        assert!(u.secure);
        assert_eq!(u.host, "edev.example.com");
        assert_eq!(u.port, 8443);
        assert_eq!(u.path, "/edev/0/der");
    }

    #[test]
    fn defaults_port_from_scheme() {
        let u = Uri::parse("http://example.com/dcap").unwrap();
        assert_eq!(u.port, 80);
        let u = Uri::parse("https://example.com/dcap").unwrap();
        assert_eq!(u.port, 443);
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(Uri::parse("ftp://example.com/x").is_err());
    }

    #[test]
    fn v4_and_v6_addresses_are_distinct() {
        let v4 = Address::V4(Ipv4Addr::new(127, 0, 0, 1));
        let v6 = Address::V6(Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x7f00, 1));
        assert_ne!(v4, v6);
    }
}
