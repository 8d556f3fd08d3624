// SPDX-License-Identifier: Apache-2.0 OR MIT

//! DNS-SD service discovery records.
//!
//! A [`Service`] is what the engine resolves a `_smartenergy._tcp`-style
//! PTR/SRV/TXT lookup into: enough to open a connection and make the
//! first `GET` without the caller having to parse TXT records itself.

use crate::net::address::Address;

/// One resolved IEEE 2030.5 service instance.
#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    pub address: Address,
    pub port: u16,
    /// `path=` TXT key: request path to use instead of `/dcap`.
    pub path: Option<String>,
    /// `dcap=` TXT key: request path pinned to the DeviceCapability
    /// resource specifically.
    pub dcap: Option<String>,
    /// Whether the `https` TXT key indicated a secure connection (the
    /// absence of the key defaults to secure, per the mandatory-TLS
    /// posture of the rest of the engine).
    pub https: bool,
}

impl Service {
    /// The request target to use for the first request to this
    /// service: `dcap`, then `path`, then `/dcap`.
    pub fn initial_path(&self) -> &str {
        self.dcap
            .as_deref()
            .or(self.path.as_deref())
            .unwrap_or("/dcap")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn falls_back_to_default_dcap_path() {
        let svc = Service {
            name: "device1._smartenergy._tcp.local".into(),
            address: Address::V4(Ipv4Addr::new(192, 168, 1, 10)),
            port: 443,
            path: None,
            dcap: None,
            https: true,
        };
        assert_eq!(svc.initial_path(), "/dcap");
    }

    #[test]
    fn prefers_dcap_txt_key_over_path() {
        let svc = Service {
            name: "device1._smartenergy._tcp.local".into(),
            address: Address::V4(Ipv4Addr::new(192, 168, 1, 10)),
            port: 443,
            path: Some("/custom".into()),
            dcap: Some("/dcap2".into()),
            https: true,
        };
        assert_eq!(svc.initial_path(), "/dcap2");
    }
}
