// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A [`Stub`] is a placeholder for a resource being retrieved: it holds
//! the resource's object once retrieved, the retrieval status, paging
//! cursor, and the dependency bookkeeping that lets the engine tell
//! when a whole subtree of resources has been fully retrieved.

use crate::net::pool::Peer;
use crate::schema::TypeId;

/// Stable index into the retrieval engine's stub table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StubId(pub usize);

/// HTTP status recorded on a stub: `New` for a stub that has never
/// received a response, `Update` for one that should be re-fetched
/// (the dependent changed since last retrieval), otherwise the literal
/// HTTP status of the last response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubStatus {
    New,
    Update,
    Http(u16),
}

pub struct Stub {
    pub href: String,
    pub type_id: TypeId,
    pub peer: Peer,
    pub obj: Option<crate::schema::TypedObject>,
    pub status: StubStatus,
    /// Monotonic seconds at which this resource should next be polled.
    pub poll_next: Option<u64>,
    pub poll_rate: Option<u32>,
    pub complete: bool,
    pub subscribed: bool,
    /// This stub's bit in whichever parent's `flags` checklist tracks
    /// it as a requirement (0 if this stub has no parent).
    pub flag: u64,
    /// Bitwise checklist of this stub's own outstanding requirements;
    /// a requirement's bit is cleared once that dependent completes.
    pub flags: u64,
    /// Paging cursor and total count for a List resource.
    pub offset: u32,
    pub all: u32,
    /// Set when a 301/moved response redirects this stub permanently.
    pub moved: Option<StubId>,
    /// Requirements cleared on the previous retrieval, kept so a later
    /// update can tell which subordinates are now stale.
    pub list: Vec<StubId>,
    /// Stubs that require this one; notified (a bit cleared in their
    /// own `flags`) when this stub completes.
    pub deps: Vec<StubId>,
    /// Stubs this one depends on as prerequisites for its own
    /// completion (its `DERControlListLink`, `TimeLink`, etc).
    pub reqs: Vec<StubId>,
}

impl Stub {
    pub fn new(href: String, type_id: TypeId, peer: Peer) -> Self {
        Self {
            href,
            type_id,
            peer,
            obj: None,
            status: StubStatus::New,
            poll_next: None,
            poll_rate: None,
            complete: false,
            subscribed: false,
            flag: 0,
            flags: 0,
            offset: 0,
            all: 0,
            moved: None,
            list: Vec::new(),
            deps: Vec::new(),
            reqs: Vec::new(),
        }
    }

    /// Are all of this stub's own requirements satisfied and has it
    /// itself received a resource?
    pub fn ready_to_complete(&self) -> bool {
        self.obj.is_some() && self.flags == 0
    }
}
