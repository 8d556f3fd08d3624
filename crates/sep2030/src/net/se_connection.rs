// SPDX-License-Identifier: Apache-2.0 OR MIT

//! IEEE 2030.5 content negotiation over a pooled HTTP/TLS connection:
//! picks `application/sep-exi` when both sides accept it and falls
//! back to `application/sep+xml` otherwise, and exposes the peer's
//! SFDI derived from its TLS certificate once the session completes.

use crate::codec::ContentType;
use crate::net::connection::Connection;
use crate::security::{lfdi, sfdi};
use crate::Error;

pub const ACCEPT_HEADER: &str = "application/sep-exi, application/sep+xml;q=0.9";

/// Resolve the content type to use for a request/response exchange
/// from the peer's Accept header, preferring the binary encoding.
pub fn negotiate(peer_accept: &str) -> ContentType {
    if peer_accept.contains("application/sep-exi") {
        ContentType::Exi
    } else {
        ContentType::Xml
    }
}

/// The peer's LFDI/SFDI, available once the TLS handshake on `conn`
/// has completed; `None` for a plain TCP connection or before the
/// handshake finishes.
#[cfg(feature = "tcp-tls")]
pub fn peer_device_identity(conn: &Connection) -> Result<Option<(Vec<u8>, u64)>, Error> {
    let Some(cert) = conn.peer_certificate() else {
        return Ok(None);
    };
    let l = lfdi(&cert);
    let s = sfdi(&l);
    Ok(Some((l, s)))
}

#[cfg(not(feature = "tcp-tls"))]
pub fn peer_device_identity(_conn: &Connection) -> Result<Option<(Vec<u8>, u64)>, Error> {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_exi_when_offered() {
        assert_eq!(negotiate(ACCEPT_HEADER), ContentType::Exi);
        assert_eq!(negotiate("application/sep+xml"), ContentType::Xml);
    }
}
