// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transport connection state machine: a raw TCP stream, optionally
//! wrapped in a TLS session.
//!
//! ```text
//!   +------+  connect()   +------------+  handshake done  +-----------+
//!   | None | -----------> | Connecting | ----------------> | Connected |
//!   +------+              +------------+                  +-----------+
//!                               |                                |
//!                               +--------- error/reset ----------+
//!                                            v
//!                                       +--------+
//!                                       | Closed |
//!                                       +--------+
//! ```

use std::io::{self, Read, Write};

use mio::net::TcpStream;

use crate::net::address::Address;
use crate::Error;

/// A `SESSION_NONE`/`SESSION_NEW`/`SESSION_CONNECTED` tri-state:
/// `New` fires once, the call after a handshake completes, so callers
/// can do one-time setup (SFDI extraction, request replay).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Still completing the TCP or TLS handshake.
    None,
    /// The handshake just finished on this call.
    New,
    /// The handshake completed on a previous call.
    Connected,
}

enum Stream {
    Plain(TcpStream),
    #[cfg(feature = "tcp-tls")]
    Tls(Box<rustls::ClientConnection>, TcpStream),
}

pub struct Connection {
    stream: Stream,
    secure: bool,
    handshaking: bool,
    peer: Address,
    port: u16,
}

impl Connection {
    pub fn connect_tcp(stream: TcpStream, peer: Address, port: u16) -> Self {
        Self {
            stream: Stream::Plain(stream),
            secure: false,
            handshaking: false,
            peer,
            port,
        }
    }

    #[cfg(feature = "tcp-tls")]
    pub fn connect_tls(stream: TcpStream, tls: rustls::ClientConnection, peer: Address, port: u16) -> Self {
        Self {
            stream: Stream::Tls(Box::new(tls), stream),
            secure: true,
            handshaking: true,
            peer,
            port,
        }
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn peer(&self) -> (Address, u16) {
        (self.peer, self.port)
    }

    /// Drive the TLS handshake (if any) as far as it will go without
    /// blocking. Returns the session status for this call.
    pub fn session(&mut self) -> Result<SessionStatus, Error> {
        match &mut self.stream {
            Stream::Plain(_) => Ok(SessionStatus::Connected),
            #[cfg(feature = "tcp-tls")]
            Stream::Tls(tls, sock) => {
                if !self.handshaking {
                    return Ok(SessionStatus::Connected);
                }
                if tls.is_handshaking() {
                    if tls.wants_write() {
                        tls.write_tls(sock).map_err(Error::Io)?;
                    }
                    if tls.wants_read() {
                        match tls.read_tls(sock) {
                            Ok(0) => return Err(Error::ConnectionClosed),
                            Ok(_) => {
                                tls.process_new_packets()
                                    .map_err(|e| Error::TlsHandshake(e.to_string()))?;
                            }
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                            Err(e) => return Err(Error::Io(e)),
                        }
                    }
                }
                if tls.is_handshaking() {
                    Ok(SessionStatus::None)
                } else {
                    self.handshaking = false;
                    Ok(SessionStatus::New)
                }
            }
        }
    }

    /// Read as many bytes as are available into `buf`, non-blocking.
    /// Returns `Ok(0)` on a would-block condition (caller should treat
    /// this as "nothing to read right now", not EOF).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match &mut self.stream {
            Stream::Plain(sock) => match sock.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(Error::Io(e)),
            },
            #[cfg(feature = "tcp-tls")]
            Stream::Tls(tls, sock) => {
                match tls.read_tls(sock) {
                    Ok(0) => return Err(Error::ConnectionClosed),
                    Ok(_) => {
                        tls.process_new_packets()
                            .map_err(|e| Error::TlsHandshake(e.to_string()))?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(Error::Io(e)),
                }
                match tls.reader().read(buf) {
                    Ok(n) => Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                    Err(e) => Err(Error::Io(e)),
                }
            }
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        match &mut self.stream {
            Stream::Plain(sock) => match sock.write(data) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(Error::Io(e)),
            },
            #[cfg(feature = "tcp-tls")]
            Stream::Tls(tls, sock) => {
                let n = tls.writer().write(data).map_err(Error::Io)?;
                while tls.wants_write() {
                    tls.write_tls(sock).map_err(Error::Io)?;
                }
                Ok(n)
            }
        }
    }

    pub fn registry_source(&mut self) -> &mut TcpStream {
        match &mut self.stream {
            Stream::Plain(s) => s,
            #[cfg(feature = "tcp-tls")]
            Stream::Tls(_, s) => s,
        }
    }

    /// The 32-byte-or-fewer TLS session id, if a TLS session is
    /// established.
    #[cfg(feature = "tcp-tls")]
    pub fn session_id(&self) -> Option<Vec<u8>> {
        match &self.stream {
            Stream::Tls(tls, _) if !self.handshaking => tls.negotiated_session_id().map(|id| id.to_vec()),
            _ => None,
        }
    }

    /// Leaf certificate of the peer, used for LFDI/SFDI derivation.
    #[cfg(feature = "tcp-tls")]
    pub fn peer_certificate(&self) -> Option<Vec<u8>> {
        match &self.stream {
            Stream::Tls(tls, _) => tls
                .peer_certificates()
                .and_then(|certs| certs.first())
                .map(|c| c.as_ref().to_vec()),
            _ => None,
        }
    }
}
