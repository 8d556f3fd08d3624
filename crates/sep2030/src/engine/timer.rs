// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A min-heap timer queue: fires in time order, and in insertion order
//! for two timers due at the same instant.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// What a fired timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Re-poll a resource stub.
    Poll(crate::retrieve::StubId),
    /// Re-evaluate one device's event schedule.
    ScheduleTick(crate::retrieve::StubId),
    /// Retry a dropped connection.
    Reconnect(crate::net::pool::Peer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerEntry {
    due: u64,
    seq: u64,
    kind: TimerKind,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest due time
        // (and, on a tie, the earliest inserted) sorts to the top.
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: u64, kind: TimerKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry { due, seq, kind });
    }

    /// The due time of the next timer to fire, if any.
    pub fn next_due(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.due)
    }

    /// Pop every timer due at or before `now`, in (time, insertion)
    /// order.
    pub fn drain_due(&mut self, now: u64) -> Vec<TimerKind> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.due > now {
                break;
            }
            fired.push(self.heap.pop().unwrap().kind);
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::StubId;

    #[test]
    fn fires_in_time_order() {
        let mut q = TimerQueue::new();
        q.schedule(300, TimerKind::Poll(StubId(1)));
        q.schedule(100, TimerKind::Poll(StubId(2)));
        q.schedule(200, TimerKind::Poll(StubId(3)));
        let fired = q.drain_due(250);
        assert_eq!(fired, vec![TimerKind::Poll(StubId(2)), TimerKind::Poll(StubId(3))]);
    }

    #[test]
    fn ties_resolve_in_insertion_order() {
        let mut q = TimerQueue::new();
        q.schedule(100, TimerKind::Poll(StubId(1)));
        q.schedule(100, TimerKind::Poll(StubId(2)));
        let fired = q.drain_due(100);
        assert_eq!(fired, vec![TimerKind::Poll(StubId(1)), TimerKind::Poll(StubId(2))]);
    }
}
