// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The engine: single owning context for a running IEEE 2030.5 client.
//!
//! `Engine` holds the schema registry, connection pool, retrieval stub
//! table, per-device schedules, and timer queue. There is no ambient
//! global state anywhere else in the crate - every other module takes
//! what it needs as an explicit argument, and `Engine` is the only
//! thing that ties them together. Drive it with [`Engine::tick`] as
//! the clock advances and [`Engine::poll_io`] when the caller's mio
//! poll wakes up, then drain [`Engine::next_event`] until it returns
//! `None`.

pub mod timer;

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::time::Duration;

use mio::{Events, Interest, Poll, Token};

use crate::codec::{self, ContentType};
use crate::config::EngineConfig;
use crate::discovery::Service;
use crate::net::http::PendingRequest;
use crate::net::pool::{ConnectionPool, Peer};
use crate::net::{self, Connection, SessionStatus};
use crate::retrieve::{Event as RetrieveEvent, RetrieveEngine, StubId};
use crate::schedule::{Schedule, Signal};
use crate::schema::registry::Registry;
use crate::schema::TypeId;
use crate::Error;
use timer::{TimerKind, TimerQueue};

/// Events the engine surfaces to the caller, one at a time, in the
/// order they became known.
#[derive(Debug)]
pub enum Event {
    ServiceFound(Service),
    SeConnection(Peer),
    DeviceSchedule(StubId),
    EventStart(StubId),
    EventEnd(StubId),
    ResourceUpdate(StubId),
    ResourceRemove(StubId),
    RetrieveFail(StubId, Error),
    ScheduleUpdate(StubId),
    /// A connection was lost and its backoff timer has elapsed; the
    /// caller (owner of the OS socket layer) should dial `Peer` again
    /// and hand the result to [`Engine::register_connection`].
    ReconnectNeeded(Peer),
}

pub struct Engine {
    config: EngineConfig,
    registry: Registry,
    poll: Poll,
    pool: ConnectionPool,
    retrieve: RetrieveEngine,
    schedules: HashMap<StubId, Schedule>,
    timers: TimerQueue,
    pending: VecDeque<Event>,
    now: u64,
    /// Attempts made so far to reconnect to a peer since its last
    /// successful connection, for backoff computation.
    retry_attempts: HashMap<Peer, u32>,
    /// Requests that were queued or in flight for a peer when its
    /// connection was lost, held so they can be requeued onto whatever
    /// connection the caller re-registers for that peer.
    pending_retry: HashMap<Peer, Vec<PendingRequest>>,
}

impl Engine {
    pub fn new(config: EngineConfig, registry: Registry) -> Result<Self, Error> {
        Ok(Self {
            config,
            registry,
            poll: Poll::new()?,
            pool: ConnectionPool::new(),
            retrieve: RetrieveEngine::new(),
            schedules: HashMap::new(),
            timers: TimerQueue::new(),
            pending: VecDeque::new(),
            now: 0,
            retry_attempts: HashMap::new(),
            pending_retry: HashMap::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn retrieve(&self) -> &RetrieveEngine {
        &self.retrieve
    }

    pub fn retrieve_mut(&mut self) -> &mut RetrieveEngine {
        &mut self.retrieve
    }

    /// Register a device's schedule for a function set, so its events
    /// start getting promoted by [`Engine::tick`].
    pub fn add_schedule(&mut self, device: StubId) {
        self.schedules.entry(device).or_insert_with(|| Schedule::new(device));
    }

    pub fn schedule(&self, device: StubId) -> Option<&Schedule> {
        self.schedules.get(&device)
    }

    pub fn schedule_mut(&mut self, device: StubId) -> Option<&mut Schedule> {
        self.schedules.get_mut(&device)
    }

    /// Issue a fresh GET for a resource: registers a stub and queues
    /// the request on its connection.
    pub fn get_resource(&mut self, peer: Peer, type_id: TypeId, href: &str, count: u32) -> StubId {
        let id = self.retrieve.get_resource(peer, type_id, href, count);
        self.queue_get(peer, href, id.0 as u64);
        id
    }

    fn queue_get(&mut self, peer: Peer, target: &str, context: u64) {
        if let Some(conn) = self.pool.get_mut(&peer) {
            conn.requests.push(PendingRequest::get(target, context));
        }
        log::debug!("queued GET {target} for {peer:?}");
    }

    /// Advance the wall clock to `now` (monotonic seconds), firing any
    /// due timers and re-evaluating every device's schedule.
    pub fn tick(&mut self, now: u64) {
        self.now = now;
        for kind in self.timers.drain_due(now) {
            self.handle_timer(kind);
        }

        let idle_secs = self.config.idle_timeout.as_secs();
        let stale: Vec<Peer> = self
            .pool
            .peers()
            .into_iter()
            .filter(|p| {
                self.pool
                    .last_activity(p)
                    .map(|t| now.saturating_sub(t) > idle_secs)
                    .unwrap_or(false)
            })
            .collect();
        for peer in stale {
            log::debug!("connection to {peer:?} idle past {idle_secs}s, tearing down");
            self.handle_transport_loss(peer, Error::ConnectionClosed);
        }

        let devices: Vec<StubId> = self.schedules.keys().copied().collect();
        for device in devices {
            let signals = {
                let schedule = self.schedules.get_mut(&device).unwrap();
                schedule.update_schedule(now as i64)
            };
            for signal in signals {
                match signal {
                    Signal::Start(id) => self.pending.push_back(Event::EventStart(id)),
                    Signal::End(id) => self.pending.push_back(Event::EventEnd(id)),
                    Signal::Superseded(_) => {}
                }
            }
            if let Some(next) = self.schedules[&device].next_wake() {
                self.timers.schedule(next.max(0) as u64, TimerKind::ScheduleTick(device));
            }
        }
    }

    fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Poll(id) => {
                if let Some(stub) = self.retrieve.get(id) {
                    let (peer, href) = (stub.peer, stub.href.clone());
                    self.queue_get(peer, &href, id.0 as u64);
                }
            }
            TimerKind::ScheduleTick(device) => self.pending.push_back(Event::ScheduleUpdate(device)),
            TimerKind::Reconnect(peer) => {
                log::debug!("reconnect timer fired for {peer:?}, asking caller to redial");
                self.pending.push_back(Event::ReconnectNeeded(peer));
            }
        }
    }

    pub fn next_event(&mut self) -> Option<Event> {
        self.pending.pop_front()
    }

    /// Feed a fully received resource body into the retrieval engine
    /// and translate whatever it produces into engine events.
    pub fn ingest_resource(&mut self, id: StubId, obj: crate::schema::TypedObject) -> Result<(), Error> {
        let events = self.retrieve.store_response(id, &self.registry, obj)?;
        for ev in events {
            self.translate_retrieve_event(ev);
        }
        Ok(())
    }

    pub fn ingest_status(&mut self, id: StubId, status: u16, location: Option<&str>) {
        let events = self.retrieve.fail_response(id, status, location);
        for ev in events {
            self.translate_retrieve_event(ev);
        }
    }

    fn translate_retrieve_event(&mut self, ev: RetrieveEvent) {
        match ev {
            RetrieveEvent::ResourceComplete(id) => self.pending.push_back(Event::ResourceUpdate(id)),
            RetrieveEvent::ResourceUpdate(id) => self.pending.push_back(Event::ResourceUpdate(id)),
            RetrieveEvent::ResourceRemove(id) => self.pending.push_back(Event::ResourceRemove(id)),
            RetrieveEvent::RetrieveFail(id, e) => self.pending.push_back(Event::RetrieveFail(id, e)),
            RetrieveEvent::FetchResource(id) => {
                if let Some(stub) = self.retrieve.get(id) {
                    let (peer, href) = (stub.peer, stub.href.clone());
                    self.queue_get(peer, &href, id.0 as u64);
                }
            }
            RetrieveEvent::FetchPage(id, from, to) => {
                if let Some(stub) = self.retrieve.get(id) {
                    let target = format!("{}?s={}&l={}", stub.href, from, to - from);
                    let peer = stub.peer;
                    self.queue_get(peer, &target, id.0 as u64);
                }
            }
        }
    }

    /// Register an already-established connection with the poll
    /// registry and the connection pool, returning its mio token. If a
    /// connection to `peer` was previously lost with requests still
    /// outstanding, those requests are requeued on the new connection.
    pub fn register_connection(&mut self, peer: Peer, conn: Connection) -> Result<Token, Error> {
        let interest = Interest::READABLE.add(Interest::WRITABLE);
        let token = self.pool.insert(peer, conn, self.config.buffer_size, self.now);
        if let Some(entry) = self.pool.get_mut(&peer) {
            self.poll.registry().register(entry.conn.registry_source(), token, interest)?;
            if let Some(retry_reqs) = self.pending_retry.remove(&peer) {
                for req in retry_reqs {
                    entry.requests.push(req);
                }
            }
        }
        self.retry_attempts.remove(&peer);
        Ok(token)
    }

    /// A connection failed mid-pipeline: tear it down, fail every
    /// request that was queued or in flight for it, and schedule a
    /// backed-off reconnect attempt.
    fn handle_transport_loss(&mut self, peer: Peer, cause: Error) {
        log::warn!("transport lost for {peer:?}: {cause}");
        let cause_desc = cause.to_string();
        let requests = net::pool::handle_transport_loss(&mut self.pool, self.poll.registry(), &peer);
        for req in &requests {
            let id = StubId(req.context as usize);
            self.pending
                .push_back(Event::RetrieveFail(id, Error::Transport(cause_desc.clone())));
        }
        if !requests.is_empty() {
            self.pending_retry.entry(peer).or_default().extend(requests);
        }

        let attempt = self.retry_attempts.entry(peer).or_insert(0);
        let delay = self.config.retry.delay_for(*attempt);
        if *attempt < self.config.retry.max_retries {
            *attempt += 1;
            self.timers
                .schedule(self.now + delay.as_secs().max(1), TimerKind::Reconnect(peer));
        } else {
            log::warn!("giving up on {peer:?} after {attempt} reconnect attempts");
        }
    }

    /// Block for up to `timeout` waiting for socket readiness, then
    /// read and parse whatever became available, translating completed
    /// HTTP responses into retrieval engine events.
    pub fn poll_io(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        let mut events = Events::with_capacity(self.config.buffer_size.min(1024).max(32));
        self.poll.poll(&mut events, timeout)?;
        let ready: Vec<(Token, bool, bool)> = events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();
        for (token, readable, writable) in ready {
            self.service_token(token, readable, writable)?;
        }
        Ok(())
    }

    /// Write as much of the head-of-line unsent request as the socket
    /// will currently accept, moving it to the in-flight queue once
    /// fully written.
    fn flush_connection(&mut self, peer: Peer) -> Result<(), Error> {
        loop {
            let Some(entry) = self.pool.get_mut(&peer) else { return Ok(()) };
            if entry.flush_done() {
                let host = format!("{}:{}", peer.addr, peer.port);
                let built = entry.requests.next_unsent().map(|req| {
                    net::http::build_request(
                        req.method,
                        &host,
                        &req.target,
                        net::se_connection::ACCEPT_HEADER,
                        req.content_type,
                        &req.body,
                    )
                });
                match built {
                    Some(bytes) => {
                        entry.send_buf = bytes;
                        entry.send_pos = 0;
                    }
                    None => return Ok(()),
                }
            }
            let n = match entry.conn.write(&entry.send_buf[entry.send_pos..]) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(e),
            };
            entry.send_pos += n;
            entry.last_activity = self.now;
            if entry.send_pos >= entry.send_buf.len() {
                entry.send_buf.clear();
                entry.send_pos = 0;
                entry.requests.mark_sent();
            } else {
                return Ok(());
            }
        }
    }

    /// Read whatever is available from `peer`'s connection and hand
    /// back every response it completed, paired with the request it
    /// matches. Collecting into an owned `Vec` first (rather than
    /// dispatching inline) means the pool entry's borrow ends before
    /// `handle_response` needs to borrow the rest of `self` to issue
    /// follow-up requests.
    fn read_connection(&mut self, peer: Peer) -> Result<Vec<(PendingRequest, net::http::Response)>, Error> {
        let Some(entry) = self.pool.get_mut(&peer) else {
            return Ok(Vec::new());
        };

        match entry.conn.session()? {
            SessionStatus::None => return Ok(Vec::new()),
            SessionStatus::New | SessionStatus::Connected => {}
        }

        let mut out = Vec::new();
        let mut scratch = vec![0u8; self.config.buffer_size];
        loop {
            let n = match entry.conn.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => n,
                Err(Error::Io(e)) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            };
            entry.last_activity = self.now;
            entry.recv.fill_from(&scratch[..n]);
            loop {
                match entry.reader.poll(&mut entry.recv) {
                    Ok(Some(response)) => {
                        let Some(req) = entry.requests.pop_match() else {
                            log::debug!("response from {peer:?} with no matching request");
                            continue;
                        };
                        out.push((req, response));
                    }
                    Ok(None) => {
                        entry.recv.compact();
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(out)
    }

    fn service_token(&mut self, token: Token, readable: bool, writable: bool) -> Result<(), Error> {
        let Some(peer) = self.pool.peer_for_token(token) else {
            return Ok(());
        };

        if writable {
            if let Err(e) = self.flush_connection(peer) {
                self.handle_transport_loss(peer, e);
                return Ok(());
            }
        }

        if readable {
            match self.read_connection(peer) {
                Ok(responses) => {
                    for (req, resp) in responses {
                        self.handle_response(req, resp)?;
                    }
                }
                Err(e) => self.handle_transport_loss(peer, e),
            }
        }

        Ok(())
    }

    fn handle_response(&mut self, req: PendingRequest, resp: net::http::Response) -> Result<(), Error> {
        let id = self.retrieve.resolved(StubId(req.context as usize));
        if resp.status != 200 {
            self.ingest_status(id, resp.status, resp.location.as_deref());
            return Ok(());
        }
        let Some(content_type) = resp.content_type.as_deref().and_then(ContentType::from_media_type) else {
            return Ok(());
        };
        let type_id = self
            .retrieve
            .get(id)
            .map(|s| s.type_id)
            .ok_or_else(|| Error::Inconsistent(format!("response for unknown stub {id:?}")))?;
        let obj = codec::parse_complete(
            &self.registry.schema,
            type_id,
            content_type,
            &resp.body,
            self.config.buffer_size,
        )?;
        self.ingest_resource(id, obj)
    }
}
