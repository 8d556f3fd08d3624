// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per function-set event scheduling: overlap detection, primacy-based
//! supersession, and revival of superseded events whose conflict
//! clears.
//!
//! Every [`EventBlock`] belongs to exactly one of three queues -
//! `scheduled` (future, not yet in conflict), `active` (its effective
//! window has started), or `superseded` (lost a conflict and is
//! waiting to see if that conflict clears before its own window
//! ends). An event block is keyed by the retrieval stub of the event
//! resource that produced it, which is unique and stable for the
//! lifetime of the event the same way its mRID would be.

use std::collections::HashMap;

use crate::retrieve::StubId;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Scheduled,
    Active,
    Canceled,
    CanceledRandom,
    Superseded,
    Aborted,
    Completed,
    ActiveWait,
    ScheduleSuperseded,
}

/// The device's own last-known `currentStatus` value for an event's
/// `EventStatus` resource, reported independently of the schedule's
/// own clock-driven promotion.
pub mod server_status {
    pub const SCHEDULED: u8 = 0;
    pub const ACTIVE: u8 = 1;
    pub const CANCELED: u8 = 2;
    pub const CANCELED_RANDOM: u8 = 3;
    pub const SUPERSEDED: u8 = 4;
}

/// An event instance scheduled for a particular device: effective
/// start/end times (with randomization already applied by the
/// caller), and the primacy the event carries in this context.
#[derive(Debug, Clone)]
pub struct EventBlock {
    pub event: StubId,
    pub program: Option<StubId>,
    pub status: EventStatus,
    pub primacy: u8,
    pub creation_time: i64,
    pub start: i64,
    pub end: i64,
    /// The last `currentStatus` reported for this event's `EventStatus`
    /// resource, if any has been seen. `None` until a response arrives;
    /// left `None`, promotion at `start` goes straight to `Active` the
    /// way it always has. An explicit `SCHEDULED` report defers
    /// promotion to `ActiveWait` until a later report confirms `ACTIVE`.
    pub server_status: Option<u8>,
}

/// Does a win a conflict against b? Lower primacy wins; ties broken by
/// earlier creation time, then by stub id as a last-resort
/// deterministic tie-break.
fn outranks(a: &EventBlock, b: &EventBlock) -> bool {
    (a.primacy, a.creation_time, a.event.0) < (b.primacy, b.creation_time, b.event.0)
}

fn overlaps(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> bool {
    a_start < b_end && b_start < a_end
}

#[derive(Debug, PartialEq, Eq)]
pub enum Signal {
    /// An event block has become active; generate an internal
    /// EVENT_START for it.
    Start(StubId),
    /// An event block's effective window ended, or it was superseded
    /// while active; generate an internal EVENT_END for it.
    End(StubId),
    /// An event was displaced by a higher-primacy conflict; a Response
    /// with status EventSuperseded should be sent for it.
    Superseded(StubId),
}

/// One function set's event schedule for a device.
pub struct Schedule {
    pub device: StubId,
    blocks: HashMap<StubId, EventBlock>,
    scheduled: Vec<StubId>,
    active: Vec<StubId>,
    superseded: Vec<StubId>,
}

impl Schedule {
    pub fn new(device: StubId) -> Self {
        Self {
            device,
            blocks: HashMap::new(),
            scheduled: Vec::new(),
            active: Vec::new(),
            superseded: Vec::new(),
        }
    }

    pub fn block(&self, id: StubId) -> Option<&EventBlock> {
        self.blocks.get(&id)
    }

    /// The next time `update_schedule` needs to be called: either the
    /// next scheduled start or the next active end, whichever is
    /// sooner.
    pub fn next_wake(&self) -> Option<i64> {
        let next_start = self.scheduled.iter().map(|id| self.blocks[id].start).min();
        let next_end = self.active.iter().map(|id| self.blocks[id].end).min();
        match (next_start, next_end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Add an event to the schedule, resolving overlap against every
    /// other event already in the `scheduled` queue.
    ///
    /// Rejects the event instead of building a block for it when it
    /// cannot be scheduled at all: `end <= start` is malformed
    /// (`EventInvalid`), `end <= now` has nothing left to apply
    /// (`EventExpired`), and a `creationTime` after the event's own
    /// `start` means this device saw it too late to ever act on it in
    /// time (`EventInapplicable`).
    pub fn schedule_event(
        &mut self,
        event: StubId,
        program: Option<StubId>,
        primacy: u8,
        creation_time: i64,
        start: i64,
        end: i64,
        now: i64,
    ) -> Result<StubId, Error> {
        if end <= start {
            return Err(Error::EventInvalid);
        }
        if end <= now {
            return Err(Error::EventExpired);
        }
        if creation_time > start {
            return Err(Error::EventInapplicable);
        }

        let candidate = EventBlock {
            event,
            program,
            status: EventStatus::Scheduled,
            primacy,
            creation_time,
            start,
            end,
            server_status: None,
        };

        let mut to_supersede = Vec::new();
        let mut candidate_loses = false;
        for &id in &self.scheduled {
            let other = &self.blocks[&id];
            if overlaps(candidate.start, candidate.end, other.start, other.end) {
                if outranks(&candidate, other) {
                    to_supersede.push(id);
                } else {
                    candidate_loses = true;
                }
            }
        }
        for id in to_supersede {
            self.scheduled.retain(|&x| x != id);
            if let Some(b) = self.blocks.get_mut(&id) {
                b.status = EventStatus::ScheduleSuperseded;
            }
            self.superseded.push(id);
        }

        let mut candidate = candidate;
        if candidate_loses {
            candidate.status = EventStatus::ScheduleSuperseded;
            self.superseded.push(event);
        } else {
            self.scheduled.push(event);
            self.scheduled.sort_by_key(|id| self.blocks.get(id).map(|b| b.start).unwrap_or(start));
        }
        self.blocks.insert(event, candidate);
        self.scheduled.sort_by_key(|id| self.blocks[id].start);
        Ok(event)
    }

    /// Record the device's own last-known `currentStatus` for an
    /// event. A block deferred in `ActiveWait` is promoted the moment
    /// an `ACTIVE` report arrives; a `CANCELED`/`CANCELED_RANDOM`
    /// report ends a block outright, whether it was waiting or already
    /// active.
    pub fn report_status(&mut self, event: StubId, status: u8) -> Option<Signal> {
        let current = self.blocks.get(&event)?.status;
        let block = self.blocks.get_mut(&event)?;
        block.server_status = Some(status);
        match (current, status) {
            (EventStatus::ActiveWait, server_status::ACTIVE) => {
                block.status = EventStatus::Active;
                Some(Signal::Start(event))
            }
            (EventStatus::ActiveWait, server_status::CANCELED) => {
                block.status = EventStatus::Canceled;
                self.active.retain(|&x| x != event);
                None
            }
            (EventStatus::ActiveWait, server_status::CANCELED_RANDOM) => {
                block.status = EventStatus::CanceledRandom;
                self.active.retain(|&x| x != event);
                None
            }
            (EventStatus::Active, server_status::CANCELED) => {
                block.status = EventStatus::Canceled;
                self.active.retain(|&x| x != event);
                Some(Signal::End(event))
            }
            (EventStatus::Active, server_status::CANCELED_RANDOM) => {
                block.status = EventStatus::CanceledRandom;
                self.active.retain(|&x| x != event);
                Some(Signal::End(event))
            }
            _ => None,
        }
    }

    /// Mark an event aborted by this device itself (for example, it
    /// turns out to require DER functions this device doesn't have),
    /// distinct from a server-side cancellation. Emits an `EVENT_END`
    /// if the event had already started.
    pub fn abort_event(&mut self, event: StubId) -> Option<Signal> {
        let was_active = self.active.contains(&event);
        let block = self.blocks.get_mut(&event)?;
        block.status = EventStatus::Aborted;
        self.active.retain(|&x| x != event);
        self.scheduled.retain(|&x| x != event);
        self.superseded.retain(|&x| x != event);
        if was_active {
            Some(Signal::End(event))
        } else {
            None
        }
    }

    /// Advance the schedule to `now`: promote scheduled events whose
    /// start has arrived, resolving conflicts against the active
    /// queue; expire active events whose end has arrived; and revive
    /// superseded events whose conflict has cleared.
    pub fn update_schedule(&mut self, now: i64) -> Vec<Signal> {
        let mut out = Vec::new();

        let ready: Vec<StubId> = self
            .scheduled
            .iter()
            .copied()
            .filter(|id| self.blocks[id].start <= now)
            .collect();
        for id in ready {
            self.scheduled.retain(|&x| x != id);
            let candidate = self.blocks[&id].clone();

            // a server that has already told us this event's status
            // settles the outcome without going through local conflict
            // resolution at all
            match candidate.server_status {
                Some(server_status::CANCELED) => {
                    if let Some(b) = self.blocks.get_mut(&id) {
                        b.status = EventStatus::Canceled;
                    }
                    continue;
                }
                Some(server_status::CANCELED_RANDOM) => {
                    if let Some(b) = self.blocks.get_mut(&id) {
                        b.status = EventStatus::CanceledRandom;
                    }
                    continue;
                }
                Some(server_status::SCHEDULED) => {
                    // explicitly not active yet per the server; wait
                    // for a later report before raising EVENT_START
                    if let Some(b) = self.blocks.get_mut(&id) {
                        b.status = EventStatus::ActiveWait;
                    }
                    self.active.push(id);
                    self.active.sort_by_key(|x| self.blocks[x].end);
                    continue;
                }
                _ => {}
            }

            let mut to_supersede = Vec::new();
            let mut candidate_loses = false;
            for &aid in &self.active {
                let other = &self.blocks[&aid];
                if overlaps(candidate.start, candidate.end, other.start, other.end) {
                    if outranks(&candidate, other) {
                        to_supersede.push(aid);
                    } else {
                        candidate_loses = true;
                    }
                }
            }
            for aid in to_supersede {
                self.active.retain(|&x| x != aid);
                if let Some(b) = self.blocks.get_mut(&aid) {
                    b.status = EventStatus::Superseded;
                }
                out.push(Signal::Superseded(aid));
                out.push(Signal::End(aid));
            }

            if candidate_loses {
                if let Some(b) = self.blocks.get_mut(&id) {
                    b.status = EventStatus::Superseded;
                }
                self.superseded.push(id);
                out.push(Signal::Superseded(id));
            } else {
                if let Some(b) = self.blocks.get_mut(&id) {
                    b.status = EventStatus::Active;
                }
                self.active.push(id);
                self.active.sort_by_key(|x| self.blocks[x].end);
                out.push(Signal::Start(id));
            }
        }

        let expired: Vec<StubId> = self
            .active
            .iter()
            .copied()
            .filter(|id| self.blocks[id].end <= now)
            .collect();
        for id in expired {
            self.active.retain(|&x| x != id);
            if let Some(b) = self.blocks.get_mut(&id) {
                b.status = EventStatus::Completed;
            }
            out.push(Signal::End(id));
        }

        let mut revived = Vec::new();
        for &id in &self.superseded {
            let blk = &self.blocks[&id];
            if blk.end <= now {
                continue;
            }
            // A block superseded while it had already gone Active lost its
            // one shot at `start`; its remaining tail never regains a fresh
            // start point, so it never comes back, only blocks supplanted
            // before they ever activated (`ScheduleSuperseded`) can revive.
            if blk.status == EventStatus::Superseded {
                continue;
            }
            let still_conflicted = self.active.iter().chain(self.scheduled.iter()).any(|&oid| {
                let other = &self.blocks[&oid];
                overlaps(blk.start, blk.end, other.start, other.end) && !outranks(blk, other)
            });
            if !still_conflicted {
                revived.push(id);
            }
        }
        for id in revived {
            self.superseded.retain(|&x| x != id);
            if let Some(b) = self.blocks.get_mut(&id) {
                b.status = EventStatus::Scheduled;
            }
            self.scheduled.push(id);
        }
        self.scheduled.sort_by_key(|id| self.blocks[id].start);

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(n: usize) -> StubId {
        StubId(n)
    }

    #[test]
    fn higher_primacy_event_supersedes_overlapping_lower_primacy_one() {
        let mut sched = Schedule::new(stub(0));
        sched.schedule_event(stub(1), None, 5, 100, 1_000, 2_000, 100).unwrap();
        sched.schedule_event(stub(2), None, 1, 200, 1_500, 2_500, 200).unwrap();
        assert_eq!(sched.block(stub(2)).unwrap().status, EventStatus::Scheduled);
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::ScheduleSuperseded);
    }

    #[test]
    fn non_overlapping_events_both_stay_scheduled() {
        let mut sched = Schedule::new(stub(0));
        sched.schedule_event(stub(1), None, 5, 100, 1_000, 2_000, 100).unwrap();
        sched.schedule_event(stub(2), None, 1, 200, 2_000, 3_000, 200).unwrap();
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::Scheduled);
        assert_eq!(sched.block(stub(2)).unwrap().status, EventStatus::Scheduled);
    }

    #[test]
    fn active_event_superseded_by_later_higher_primacy_event() {
        let mut sched = Schedule::new(stub(0));
        sched.schedule_event(stub(1), None, 5, 100, 1_000, 3_000, 100).unwrap();
        let signals = sched.update_schedule(1_000);
        assert_eq!(signals, vec![Signal::Start(stub(1))]);

        sched.schedule_event(stub(2), None, 1, 200, 1_500, 2_500, 200).unwrap();
        let signals = sched.update_schedule(1_500);
        assert!(signals.contains(&Signal::Superseded(stub(1))));
        assert!(signals.contains(&Signal::End(stub(1))));
        assert!(signals.contains(&Signal::Start(stub(2))));
    }

    #[test]
    fn block_superseded_while_active_never_revives() {
        let mut sched = Schedule::new(stub(0));
        sched.schedule_event(stub(1), None, 1, 100, 1_000, 2_000, 100).unwrap();
        sched.update_schedule(1_000);
        sched.schedule_event(stub(2), None, 0, 200, 1_500, 1_750, 200).unwrap();
        sched.update_schedule(1_500);
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::Superseded);

        // primacy-0 block ends; primacy-1's remaining tail [1750, 2000)
        // no longer conflicts with anything, but it had already started
        // and lost its window once, so it must not come back.
        let signals = sched.update_schedule(1_750);
        assert!(signals.contains(&Signal::End(stub(2))));
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::Superseded);

        sched.update_schedule(2_000);
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::Superseded);
    }

    #[test]
    fn superseded_event_revives_once_the_conflict_ends() {
        let mut sched = Schedule::new(stub(0));
        sched.schedule_event(stub(1), None, 5, 100, 1_000, 5_000, 100).unwrap();
        sched.schedule_event(stub(2), None, 1, 200, 1_000, 2_000, 200).unwrap();
        sched.update_schedule(1_000);
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::ScheduleSuperseded);

        let signals = sched.update_schedule(2_000);
        assert!(signals.contains(&Signal::End(stub(2))));
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::Scheduled);

        let signals = sched.update_schedule(2_000);
        assert!(signals.contains(&Signal::Start(stub(1))));
    }

    #[test]
    fn end_before_start_is_rejected_as_invalid() {
        let mut sched = Schedule::new(stub(0));
        let err = sched.schedule_event(stub(1), None, 1, 100, 2_000, 1_000, 100).unwrap_err();
        assert!(matches!(err, Error::EventInvalid));
        assert!(sched.block(stub(1)).is_none());
    }

    #[test]
    fn event_already_ended_by_now_is_rejected_as_expired() {
        let mut sched = Schedule::new(stub(0));
        let err = sched.schedule_event(stub(1), None, 1, 100, 1_000, 2_000, 5_000).unwrap_err();
        assert!(matches!(err, Error::EventExpired));
    }

    #[test]
    fn event_created_after_its_own_start_is_rejected_as_inapplicable() {
        let mut sched = Schedule::new(stub(0));
        let err = sched.schedule_event(stub(1), None, 1, 1_500, 1_000, 2_000, 100).unwrap_err();
        assert!(matches!(err, Error::EventInapplicable));
    }

    #[test]
    fn event_deferred_to_active_wait_until_server_confirms_active() {
        let mut sched = Schedule::new(stub(0));
        sched.schedule_event(stub(1), None, 1, 100, 1_000, 2_000, 100).unwrap();
        sched.report_status(stub(1), server_status::SCHEDULED);

        let signals = sched.update_schedule(1_000);
        assert!(signals.is_empty());
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::ActiveWait);

        let signal = sched.report_status(stub(1), server_status::ACTIVE);
        assert_eq!(signal, Some(Signal::Start(stub(1))));
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::Active);
    }

    #[test]
    fn server_cancellation_ends_a_deferred_event_without_ever_starting() {
        let mut sched = Schedule::new(stub(0));
        sched.schedule_event(stub(1), None, 1, 100, 1_000, 2_000, 100).unwrap();
        sched.report_status(stub(1), server_status::SCHEDULED);
        let signals = sched.update_schedule(1_000);
        assert!(signals.is_empty());

        let signal = sched.report_status(stub(1), server_status::CANCELED_RANDOM);
        assert_eq!(signal, None);
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::CanceledRandom);
    }

    #[test]
    fn aborting_an_active_event_emits_an_end_signal() {
        let mut sched = Schedule::new(stub(0));
        sched.schedule_event(stub(1), None, 1, 100, 1_000, 2_000, 100).unwrap();
        sched.update_schedule(1_000);
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::Active);

        let signal = sched.abort_event(stub(1));
        assert_eq!(signal, Some(Signal::End(stub(1))));
        assert_eq!(sched.block(stub(1)).unwrap().status, EventStatus::Aborted);
    }
}
