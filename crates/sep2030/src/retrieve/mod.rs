// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resource retrieval over a stub dependency graph.
//!
//! Each resource fetched from a server gets a [`Stub`] which tracks its
//! retrieval status and is linked to the stubs of its subordinate
//! resources (declared statically in the [`crate::schema::registry::Registry`]'s
//! [`crate::schema::registry::DepEntry`] table). A stub is *complete* once it has
//! a resource and every dependency it requires has itself completed;
//! completion propagates up through `reqs` the same way a reference
//! count reaching zero would.

pub mod stub;

use crate::net::pool::Peer;
use crate::schema::registry::Registry;
use crate::schema::{TypeId, TypedObject, Value};
use crate::Error;

pub use stub::{Stub, StubId, StubStatus};

/// Events the retrieval engine surfaces to the caller after processing
/// a response or a poll tick.
#[derive(Debug)]
pub enum Event {
    /// A stub transitioned from incomplete to complete.
    ResourceComplete(StubId),
    /// A previously complete resource was re-fetched with new content.
    ResourceUpdate(StubId),
    /// A resource is no longer reachable (404/410) and should be torn
    /// down along with its subordinates.
    ResourceRemove(StubId),
    /// Retrieval permanently failed for a stub (non-2xx/404/410, or a
    /// transport error that exhausted retry).
    RetrieveFail(StubId, Error),
    /// A list stub needs another page fetched to continue paging.
    FetchPage(StubId, u32, u32),
    /// A plain GET is needed to retrieve (or re-retrieve) a stub's
    /// resource.
    FetchResource(StubId),
}

pub struct RetrieveEngine {
    stubs: Vec<Option<Stub>>,
}

impl Default for RetrieveEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RetrieveEngine {
    pub fn new() -> Self {
        Self { stubs: Vec::new() }
    }

    pub fn get(&self, id: StubId) -> Option<&Stub> {
        self.stubs.get(id.0).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: StubId) -> Option<&mut Stub> {
        self.stubs.get_mut(id.0).and_then(|s| s.as_mut())
    }

    /// Follow a stub's `moved` chain to the stub that now actually
    /// represents the resource; a no-op for a stub that was never
    /// redirected.
    pub fn resolved(&self, id: StubId) -> StubId {
        let mut cur = id;
        while let Some(next) = self.get(cur).and_then(|s| s.moved) {
            if next == cur {
                break;
            }
            cur = next;
        }
        cur
    }

    /// Register a new stub for a resource and return its id. Does not
    /// by itself cause anything to be fetched; the caller emits
    /// [`Event::FetchResource`] for a brand-new stub.
    pub fn get_resource(&mut self, peer: Peer, type_id: TypeId, href: &str, count: u32) -> StubId {
        let mut stub = Stub::new(href.to_string(), type_id, peer);
        stub.all = count;
        self.stubs.push(Some(stub));
        StubId(self.stubs.len() - 1)
    }

    /// Link `dep` as a requirement of `parent`, using `flag` as both
    /// the bit `parent` tracks the requirement under and the bit
    /// `dep` is tagged with in its dependents. A no-op if `dep` is
    /// `None` (the link didn't exist on the parent object), and
    /// idempotent when called twice for the same (parent, dep) edge.
    pub fn new_dep(&mut self, parent: StubId, dep: Option<StubId>, flag: u8) -> Option<StubId> {
        let dep_id = dep?;
        let already_linked = self.get(parent).map(|p| p.reqs.contains(&dep_id)).unwrap_or(false);
        if already_linked {
            return Some(dep_id);
        }
        if let Some(d) = self.get_mut(dep_id) {
            d.flag = 1u64 << flag;
        }
        if let Some(p) = self.get_mut(parent) {
            p.flags |= 1u64 << flag;
            p.reqs.push(dep_id);
        }
        if let Some(d) = self.get_mut(dep_id) {
            d.deps.push(parent);
        }
        Some(dep_id)
    }

    /// Remove this stub as a requirement of every stub that depends on
    /// it and return any of those that just became complete as a
    /// result, recursively.
    fn propagate_completion(&mut self, id: StubId) -> Vec<Event> {
        let mut events = Vec::new();
        let deps = match self.get(id) {
            Some(s) => s.deps.clone(),
            None => return events,
        };
        for req_id in deps {
            let flag = self.get(id).map(|s| s.flag).unwrap_or(0);
            let now_ready = if let Some(req) = self.get_mut(req_id) {
                req.flags &= !flag;
                req.ready_to_complete() && !req.complete
            } else {
                false
            };
            if now_ready {
                if let Some(req) = self.get_mut(req_id) {
                    req.complete = true;
                }
                events.push(Event::ResourceComplete(req_id));
                events.extend(self.propagate_completion(req_id));
            }
        }
        events
    }

    /// Store a freshly retrieved object on its stub, dispatch any
    /// subordinate resources declared for its type in `registry`, and
    /// return the events this produced (new fetches to issue, and any
    /// completions this retrieval made possible).
    pub fn store_response(
        &mut self,
        id: StubId,
        registry: &Registry,
        obj: TypedObject,
    ) -> Result<Vec<Event>, Error> {
        let schema = &registry.schema;
        let type_id = self
            .get(id)
            .ok_or_else(|| Error::Inconsistent(format!("unknown stub {id:?}")))?
            .type_id;
        if obj.type_id != type_id && !schema.type_is_a(obj.type_id, type_id) {
            return Err(Error::Inconsistent(format!(
                "stub expected type {} but response was of type {}",
                schema.type_name(type_id),
                schema.type_name(obj.type_id)
            )));
        }

        let mut events = Vec::new();
        let was_new = matches!(self.get(id).map(|s| s.status), Some(StubStatus::New));

        // a List page: merge its items onto whatever was accumulated
        // from earlier pages, and note how many new items this page
        // itself contributed (needed to advance the paging cursor)
        let is_list = schema.type_is_a(type_id, registry_list_type(schema));
        let (obj, page_len) = if is_list {
            self.merge_list_page(id, schema, obj)
        } else {
            (obj, 0)
        };

        // dispatch subordinate links before storing, since the reqs
        // list is rebuilt from the fresh object every time
        let owner_name = schema.type_name(type_id);
        let mut new_deps = Vec::new();
        for entry in registry.deps.iter().filter(|e| e.owner == owner_name) {
            let Some(link_el) = schema.find_element(type_id, entry.link_name) else {
                continue;
            };
            let Some(Value::Child(link)) = obj.get(link_el.offset) else {
                continue;
            };
            let Some(href) = link.href(schema) else { continue };
            let Some(target_type) = schema.type_by_name(entry.target) else {
                continue;
            };
            let count = if schema.type_is_a(target_type, registry_list_type(schema)) {
                obj.link_all(schema, entry.link_name).unwrap_or(0)
            } else {
                0
            };
            let peer = self.get(id).map(|s| s.peer).unwrap();
            let dep_id = self.get_resource(peer, target_type, href, count);
            new_deps.push((dep_id, link_el.bit));
            events.push(Event::FetchResource(dep_id));
        }

        // the requirement set this stub carried into this retrieval;
        // kept on `list` so the reconciliation pass below can tell
        // which of them the fresh object no longer links to
        let old_reqs = self.get(id).map(|s| s.reqs.clone()).unwrap_or_default();

        if let Some(stub) = self.get_mut(id) {
            stub.list = old_reqs.clone();
            stub.obj = Some(obj);
            stub.status = StubStatus::Http(200);
            stub.reqs.clear();
            stub.flags = 0;
        }
        let new_ids: Vec<StubId> = new_deps.iter().map(|(dep_id, _)| *dep_id).collect();
        for (dep_id, bit) in new_deps {
            self.new_dep(id, Some(dep_id), bit);
        }

        // a subordinate this stub required before, but no longer links
        // to, loses this stub as a dependent; once nothing depends on
        // it anymore it's unreachable and gets torn down
        for stale in old_reqs.into_iter().filter(|dep_id| !new_ids.contains(dep_id)) {
            if let Some(dep) = self.get_mut(stale) {
                dep.deps.retain(|&p| p != id);
                if dep.deps.is_empty() {
                    events.push(Event::ResourceRemove(stale));
                    self.remove_stub(stale);
                }
            }
        }

        if is_list {
            if let Some(ev) = self.advance_page(id, page_len) {
                events.push(ev);
            }
        }

        let ready = self.get(id).map(|s| s.ready_to_complete()).unwrap_or(false);
        if ready {
            if let Some(stub) = self.get_mut(id) {
                if !stub.complete {
                    stub.complete = true;
                    events.push(if was_new {
                        Event::ResourceComplete(id)
                    } else {
                        Event::ResourceUpdate(id)
                    });
                } else {
                    events.push(Event::ResourceUpdate(id));
                }
            }
            events.extend(self.propagate_completion(id));
        }

        Ok(events)
    }

    /// Merge a freshly parsed list page onto whatever items this stub
    /// already accumulated from earlier pages, and record the stub's
    /// current `all` count. Returns the merged object and the number
    /// of items this page itself contributed (the paging cursor
    /// advances by that many, not by the merged total).
    fn merge_list_page(
        &mut self,
        id: StubId,
        schema: &crate::schema::Schema,
        mut obj: TypedObject,
    ) -> (TypedObject, u32) {
        let all = obj.list_all(schema).unwrap_or(0);
        if let Some(stub) = self.get_mut(id) {
            stub.all = all;
        }
        let Some(el) = schema.unbounded_element(obj.type_id) else {
            return (obj, 0);
        };
        let page_len = match obj.get(el.offset) {
            Some(Value::List(items)) => items.len() as u32,
            _ => 0,
        };
        let prior_items = match self.get(id).and_then(|s| s.obj.as_ref()) {
            Some(prior) => match prior.get(el.offset) {
                Some(Value::List(items)) => items.clone(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        if !prior_items.is_empty() {
            let mut merged = prior_items;
            if let Some(Value::List(new_items)) = obj.get(el.offset) {
                merged.extend(new_items.iter().cloned());
            }
            obj.put(el.offset, Value::List(merged));
        }
        (obj, page_len)
    }

    /// Record a non-2xx status for a stub. 404/410 tear it down (and
    /// any dependents are told to remove their copy); 301 registers a
    /// new stub at the redirected location, carries this stub's
    /// dependents over to it, and marks this one `moved` so any lookup
    /// against it resolves to the new stub instead (see [`Self::resolved`]);
    /// anything else is a hard failure.
    pub fn fail_response(&mut self, id: StubId, status: u16, location: Option<&str>) -> Vec<Event> {
        if let Some(stub) = self.get_mut(id) {
            stub.status = StubStatus::Http(status);
        }
        match status {
            301 => {
                let Some(loc) = location else {
                    return vec![Event::RetrieveFail(id, Error::HttpStatus(status))];
                };
                let Some(stub) = self.get(id) else {
                    return Vec::new();
                };
                let peer = stub.peer;
                let type_id = stub.type_id;
                let deps = stub.deps.clone();
                let flag = stub.flag;
                let new_id = self.get_resource(peer, type_id, loc, 0);
                if let Some(new_stub) = self.get_mut(new_id) {
                    new_stub.deps = deps;
                    new_stub.flag = flag;
                }
                if let Some(old) = self.get_mut(id) {
                    old.moved = Some(new_id);
                }
                vec![Event::FetchResource(new_id)]
            }
            404 | 410 => vec![Event::ResourceRemove(id)],
            _ => vec![Event::RetrieveFail(id, Error::HttpStatus(status))],
        }
    }

    /// Advance a list stub's paging cursor after a page has been
    /// merged into its object; returns the next page to fetch, if any
    /// remain.
    pub fn advance_page(&mut self, id: StubId, page_len: u32) -> Option<Event> {
        let stub = self.get_mut(id)?;
        stub.offset += page_len;
        if stub.offset < stub.all {
            Some(Event::FetchPage(id, stub.offset, stub.all.min(stub.offset + page_len)))
        } else {
            None
        }
    }

    pub fn remove_stub(&mut self, id: StubId) {
        if let Some(slot) = self.stubs.get_mut(id.0) {
            *slot = None;
        }
    }
}

/// Every `Registry` built by [`crate::schema::registry::build_registry`]
/// names its bounded-list base type `"List"`; used only to decide
/// whether a subordinate link's target carries a paging `all` count.
fn registry_list_type(schema: &crate::schema::Schema) -> TypeId {
    schema.type_by_name("List").unwrap_or(TypeId::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::address::Address;
    use crate::schema::registry::{build_registry, type_ids};
    use std::net::Ipv4Addr;

    fn peer() -> Peer {
        Peer {
            addr: Address::V4(Ipv4Addr::new(10, 0, 0, 1)),
            port: 443,
            secure: true,
        }
    }

    #[test]
    fn leaf_stub_completes_once_it_has_an_object() {
        let mut engine = RetrieveEngine::new();
        let id = engine.get_resource(peer(), type_ids::TIME, "/tm", 0);
        let registry = build_registry();
        let time = TypedObject::new(type_ids::TIME);
        let events = engine.store_response(id, &registry, time).unwrap();
        assert!(matches!(events[0], Event::ResourceComplete(_)));
        assert!(engine.get(id).unwrap().complete);
    }

    #[test]
    fn parent_completes_only_after_its_dependency_does() {
        let registry = build_registry();
        let schema = &registry.schema;
        let mut engine = RetrieveEngine::new();

        let parent_id = engine.get_resource(peer(), type_ids::DEVICE_CAPABILITY, "/dcap", 0);
        let dep_id = engine.get_resource(peer(), type_ids::TIME, "/tm", 0);
        let time_link_el = schema.find_element(type_ids::DEVICE_CAPABILITY, "TimeLink").unwrap();
        engine.new_dep(parent_id, Some(dep_id), time_link_el.bit);

        let mut parent_obj = TypedObject::new(type_ids::DEVICE_CAPABILITY);
        parent_obj.set_bit(time_link_el.bit);
        engine.get_mut(parent_id).unwrap().obj = Some(parent_obj);
        assert!(!engine.get(parent_id).unwrap().ready_to_complete());

        let time = TypedObject::new(type_ids::TIME);
        let events = engine.store_response(dep_id, &registry, time).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::ResourceComplete(id) if *id == parent_id)));
    }

    #[test]
    fn missing_resource_is_reported_for_removal() {
        let mut engine = RetrieveEngine::new();
        let id = engine.get_resource(peer(), type_ids::TIME, "/tm", 0);
        let events = engine.fail_response(id, 404, None);
        assert!(matches!(events[0], Event::ResourceRemove(_)));
    }

    #[test]
    fn redirect_moves_the_stub_and_refetches_at_the_new_location() {
        let mut engine = RetrieveEngine::new();
        let id = engine.get_resource(peer(), type_ids::TIME, "/tm", 0);
        let events = engine.fail_response(id, 301, Some("/tm2"));
        let new_id = match events.as_slice() {
            [Event::FetchResource(new_id)] => *new_id,
            other => panic!("expected a single fetch for the redirected location, got {other:?}"),
        };
        assert_eq!(engine.resolved(id), new_id);
        assert_eq!(engine.get(new_id).unwrap().href, "/tm2");
    }

    #[test]
    fn list_page_merges_items_and_requests_the_next_page() {
        let registry = build_registry();
        let schema = &registry.schema;
        let mut engine = RetrieveEngine::new();
        let id = engine.get_resource(peer(), type_ids::END_DEVICE_LIST, "/edev", 0);

        let all_el = schema.find_element(type_ids::END_DEVICE_LIST, "all").unwrap();
        let item_el = schema.find_element(type_ids::END_DEVICE_LIST, "EndDevice").unwrap();

        let mut page1 = TypedObject::new(type_ids::END_DEVICE_LIST);
        page1.put(all_el.offset, Value::U32(3));
        page1.set_bit(all_el.bit);
        page1.put(
            item_el.offset,
            Value::List(vec![
                TypedObject::new(type_ids::END_DEVICE),
                TypedObject::new(type_ids::END_DEVICE),
            ]),
        );
        page1.set_bit(item_el.bit);

        let events = engine.store_response(id, &registry, page1).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::FetchPage(pid, 2, 3) if *pid == id)));
        assert_eq!(engine.get(id).unwrap().offset, 2);

        let mut page2 = TypedObject::new(type_ids::END_DEVICE_LIST);
        page2.put(all_el.offset, Value::U32(3));
        page2.set_bit(all_el.bit);
        page2.put(item_el.offset, Value::List(vec![TypedObject::new(type_ids::END_DEVICE)]));
        page2.set_bit(item_el.bit);

        let events2 = engine.store_response(id, &registry, page2).unwrap();
        assert!(!events2.iter().any(|e| matches!(e, Event::FetchPage(..))));
        let stored = engine.get(id).unwrap().obj.as_ref().unwrap();
        match stored.get(item_el.offset) {
            Some(Value::List(items)) => assert_eq!(items.len(), 3),
            other => panic!("expected a merged 3-item list, got {other:?}"),
        }
    }

    #[test]
    fn stale_dependency_is_garbage_collected_when_no_longer_linked() {
        let registry = build_registry();
        let schema = &registry.schema;
        let mut engine = RetrieveEngine::new();
        let parent_id = engine.get_resource(peer(), type_ids::DEVICE_CAPABILITY, "/dcap", 0);
        let time_link_el = schema.find_element(type_ids::DEVICE_CAPABILITY, "TimeLink").unwrap();
        let href_el = schema.find_element(type_ids::LINK, "href").unwrap();

        let mut obj_with_link = TypedObject::new(type_ids::DEVICE_CAPABILITY);
        let mut link = TypedObject::new(type_ids::LINK);
        link.put(href_el.offset, Value::AnyUri("/tm".to_string()));
        link.set_bit(href_el.bit);
        obj_with_link.put(time_link_el.offset, Value::Child(Box::new(link)));
        obj_with_link.set_bit(time_link_el.bit);

        let events = engine.store_response(parent_id, &registry, obj_with_link).unwrap();
        let dep_id = events
            .iter()
            .find_map(|e| match e {
                Event::FetchResource(id) => Some(*id),
                _ => None,
            })
            .unwrap();
        assert_eq!(engine.get(parent_id).unwrap().reqs, vec![dep_id]);

        let obj_without_link = TypedObject::new(type_ids::DEVICE_CAPABILITY);
        let events2 = engine.store_response(parent_id, &registry, obj_without_link).unwrap();
        assert!(events2
            .iter()
            .any(|e| matches!(e, Event::ResourceRemove(id) if *id == dep_id)));
        assert!(engine.get(dep_id).is_none());
    }
}
