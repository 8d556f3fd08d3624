// SPDX-License-Identifier: Apache-2.0 OR MIT

//! One connection per (host, port, secure) tuple.
//!
//! Resources addressed at the same server share a connection and
//! pipeline their requests over it; this mirrors the "only one
//! connection is maintained per server address/port" rule that a
//! client-role IEEE 2030.5 implementation follows when retrieving
//! multiple resources from the same device.

use std::collections::HashMap;

use mio::{Token, Interest};

use crate::codec::Buffer;
use crate::net::address::Address;
use crate::net::connection::Connection;
use crate::net::http::{MessageReader, RequestQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub addr: Address,
    pub port: u16,
    pub secure: bool,
}

pub struct PooledConnection {
    pub conn: Connection,
    pub token: Token,
    pub recv: Buffer,
    pub reader: MessageReader,
    pub requests: RequestQueue,
    /// Bytes of the request currently being written, and how much of
    /// it has already gone out; empty when nothing is mid-flush.
    pub send_buf: Vec<u8>,
    pub send_pos: usize,
    /// Monotonic seconds this connection last made read or write
    /// progress, for idle-timeout detection.
    pub last_activity: u64,
}

impl PooledConnection {
    /// Is a request fully written and waiting only on its response?
    pub fn flush_done(&self) -> bool {
        self.send_buf.is_empty()
    }
}

/// Open connections keyed by peer, plus the mio token assigned to each
/// so poll events can be routed back to the right entry.
#[derive(Default)]
pub struct ConnectionPool {
    entries: HashMap<Peer, PooledConnection>,
    by_token: HashMap<Token, Peer>,
    next_token: usize,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &Peer) -> Option<&PooledConnection> {
        self.entries.get(peer)
    }

    pub fn get_mut(&mut self, peer: &Peer) -> Option<&mut PooledConnection> {
        self.entries.get_mut(peer)
    }

    pub fn peer_for_token(&self, token: Token) -> Option<Peer> {
        self.by_token.get(&token).copied()
    }

    /// Register a freshly established connection, assigning it a mio
    /// token for the poll registry.
    pub fn insert(&mut self, peer: Peer, conn: Connection, buffer_size: usize, now: u64) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.entries.insert(
            peer,
            PooledConnection {
                conn,
                token,
                recv: Buffer::new(buffer_size),
                reader: MessageReader::new(),
                requests: RequestQueue::default(),
                send_buf: Vec::new(),
                send_pos: 0,
                last_activity: now,
            },
        );
        self.by_token.insert(token, peer);
        token
    }

    /// Remove a connection entirely, handing back its state so the
    /// caller can deregister it from the poll and drain its requests.
    pub fn take(&mut self, peer: &Peer) -> Option<PooledConnection> {
        let entry = self.entries.remove(peer)?;
        self.by_token.remove(&entry.token);
        Some(entry)
    }

    /// Remove a connection, returning any requests that were still
    /// outstanding (queued or in flight) so the caller can fail or
    /// retry them.
    pub fn remove(&mut self, peer: &Peer) -> Vec<crate::net::http::PendingRequest> {
        match self.take(peer) {
            Some(mut entry) => entry.requests.drain(),
            None => Vec::new(),
        }
    }

    pub fn interest_for(&self, _peer: &Peer) -> Interest {
        Interest::READABLE.add(Interest::WRITABLE)
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.entries.keys().copied().collect()
    }

    pub fn last_activity(&self, peer: &Peer) -> Option<u64> {
        self.entries.get(peer).map(|e| e.last_activity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fatal connection error encountered mid-pipeline: tears the
/// connection down, deregisters it from `registry`, and returns every
/// request that was queued or in flight so the caller can fail or
/// requeue them against a fresh connection.
pub fn handle_transport_loss(
    pool: &mut ConnectionPool,
    registry: &mio::Registry,
    peer: &Peer,
) -> Vec<crate::net::http::PendingRequest> {
    match pool.take(peer) {
        Some(mut entry) => {
            let _ = registry.deregister(entry.conn.registry_source());
            entry.requests.drain()
        }
        None => Vec::new(),
    }
}
