//! Suspension: wakeables, ping bookkeeping, and the unwind that hands a
//! suspended subtree to its nearest boundary.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::collections::map::HashMap;
use crate::element::Interrupt;
use crate::fiber::{FiberId, WorkTag};
use crate::flags::FiberFlags;
use crate::lanes::{Lane, Lanes, NO_LANES};
use crate::root::{RootHandle, RootState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WakeableId(u64);

impl WakeableId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WakeableId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A pending value a component can suspend on.
pub trait Wakeable {
    fn wakeable_id(&self) -> WakeableId;

    /// Registers `listener` to run once when the value settles. Runs it
    /// immediately if the value has already settled.
    fn subscribe(&self, listener: Box<dyn FnOnce()>);
}

enum ResourceState<T> {
    Pending,
    Fulfilled(T),
    Rejected(Rc<str>),
}

struct ResourceCell<T> {
    id: WakeableId,
    state: RefCell<ResourceState<T>>,
    listeners: RefCell<Vec<Box<dyn FnOnce()>>>,
    reads: Cell<usize>,
}

impl<T> ResourceCell<T> {
    fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), ResourceState::Pending)
    }

    fn settle(&self, next: ResourceState<T>) {
        {
            let mut state = self.state.borrow_mut();
            if !matches!(*state, ResourceState::Pending) {
                log::warn!("resource {:?} settled twice; keeping the first outcome", self.id);
                return;
            }
            *state = next;
        }
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for listener in listeners {
            listener();
        }
    }
}

impl<T> Wakeable for ResourceCell<T> {
    fn wakeable_id(&self) -> WakeableId {
        self.id
    }

    fn subscribe(&self, listener: Box<dyn FnOnce()>) {
        if self.is_pending() {
            self.listeners.borrow_mut().push(listener);
        } else {
            listener();
        }
    }
}

/// A value that resolves later, readable through [`crate::Hooks::use_resource`].
pub struct Resource<T>(Rc<ResourceCell<T>>);

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Resource(Rc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.0.state.borrow() {
            ResourceState::Pending => "pending",
            ResourceState::Fulfilled(_) => "fulfilled",
            ResourceState::Rejected(_) => "rejected",
        };
        f.debug_struct("Resource")
            .field("id", &self.0.id)
            .field("state", &state)
            .finish()
    }
}

impl<T: 'static> Default for Resource<T> {
    fn default() -> Self {
        Self::pending()
    }
}

impl<T: 'static> Resource<T> {
    pub fn pending() -> Self {
        Resource(Rc::new(ResourceCell {
            id: WakeableId::next(),
            state: RefCell::new(ResourceState::Pending),
            listeners: RefCell::new(Vec::new()),
            reads: Cell::new(0),
        }))
    }

    pub fn ready(value: T) -> Self {
        let resource = Self::pending();
        *resource.0.state.borrow_mut() = ResourceState::Fulfilled(value);
        resource
    }

    pub fn id(&self) -> WakeableId {
        self.0.id
    }

    pub fn is_pending(&self) -> bool {
        self.0.is_pending()
    }

    /// How many times a render read this resource.
    pub fn reads(&self) -> usize {
        self.0.reads.get()
    }

    pub fn resolve(&self, value: T) {
        self.0.settle(ResourceState::Fulfilled(value));
    }

    pub fn reject(&self, reason: impl Into<Rc<str>>) {
        self.0.settle(ResourceState::Rejected(reason.into()));
    }

    pub fn as_wakeable(&self) -> Rc<dyn Wakeable> {
        Rc::clone(&self.0) as Rc<dyn Wakeable>
    }
}

impl<T: Clone + 'static> Resource<T> {
    pub(crate) fn read(&self) -> Result<T, Interrupt> {
        self.0.reads.set(self.0.reads.get() + 1);
        match &*self.0.state.borrow() {
            ResourceState::Fulfilled(value) => Ok(value.clone()),
            ResourceState::Rejected(reason) => Err(Interrupt::Failed(anyhow::anyhow!(
                "resource {:?} rejected: {reason}",
                self.0.id
            ))),
            ResourceState::Pending => Err(Interrupt::Suspend(self.as_wakeable())),
        }
    }
}

#[derive(Debug, Default)]
struct PingEntry {
    lanes: Lanes,
    boundaries: Vec<FiberId>,
}

/// Which wakeables already carry a ping listener, per lane.
#[derive(Debug, Default)]
pub(crate) struct PingCache {
    entries: HashMap<WakeableId, PingEntry>,
}

impl PingCache {
    /// Records a suspension; true when a listener for `lane` is still missing.
    pub(crate) fn record(&mut self, id: WakeableId, lane: Lane, boundary: Option<FiberId>) -> bool {
        let entry = self.entries.entry(id).or_default();
        if let Some(boundary) = boundary {
            if !entry.boundaries.contains(&boundary) {
                entry.boundaries.push(boundary);
            }
        }
        if entry.lanes.contains(lane) {
            return false;
        }
        entry.lanes |= lane;
        true
    }

    /// Removes the entry for `id`, returning its lanes and the boundaries
    /// waiting on it.
    pub(crate) fn evict(&mut self, id: WakeableId) -> (Lanes, Vec<FiberId>) {
        self.entries
            .remove(&id)
            .map(|entry| (entry.lanes, entry.boundaries))
            .unwrap_or((NO_LANES, Vec::new()))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Marks the nearest suspense boundary to capture the suspension.
pub(crate) fn throw_exception(state: &mut RootState) -> Option<FiberId> {
    let boundary = state.work.suspense_handlers.last().copied();
    match boundary {
        Some(boundary) => state.arena[boundary].flags |= FiberFlags::SHOULD_CAPTURE,
        None => log::debug!("suspension has no boundary; the pass will be abandoned"),
    }
    boundary
}

/// Subscribes a retry for `lane` to `wakeable`.
pub(crate) fn attach_ping_listener(root: RootHandle, wakeable: &Rc<dyn Wakeable>, lane: Lane) {
    let id = wakeable.wakeable_id();
    log::trace!("attaching ping listener for {id:?} at {lane:?}");
    wakeable.subscribe(Box::new(move || root.ping(id, lane)));
}

/// Unwinds one fiber. Returns the fiber to resume from when `fiber` is a
/// boundary that captured the suspension.
pub(crate) fn unwind_work(state: &mut RootState, fiber: FiberId) -> Option<FiberId> {
    match state.arena[fiber].tag {
        WorkTag::SuspenseComponent => {
            pop_suspense_handler(state, fiber);
            let flags = state.arena[fiber].flags;
            if flags.contains(FiberFlags::SHOULD_CAPTURE) {
                state.arena[fiber].flags =
                    (flags - FiberFlags::SHOULD_CAPTURE) | FiberFlags::DID_CAPTURE;
                return Some(fiber);
            }
            None
        }
        WorkTag::ContextProvider => {
            state.work.contexts.pop();
            None
        }
        _ => None,
    }
}

pub(crate) fn push_suspense_handler(state: &mut RootState, fiber: FiberId) {
    state.work.suspense_handlers.push(fiber);
}

/// Pops `fiber` if it is the innermost handler; boundaries rendering their
/// fallback never pushed one.
pub(crate) fn pop_suspense_handler(state: &mut RootState, fiber: FiberId) {
    if state.work.suspense_handlers.last() == Some(&fiber) {
        state.work.suspense_handlers.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_notifies_listeners_once() {
        let resource: Resource<u32> = Resource::pending();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        resource
            .as_wakeable()
            .subscribe(Box::new(move || counter.set(counter.get() + 1)));
        resource.resolve(7);
        resource.resolve(8);
        assert_eq!(hits.get(), 1);
        assert_eq!(resource.read().expect("fulfilled"), 7);
    }

    #[test]
    fn late_subscriber_runs_immediately() {
        let resource = Resource::ready("done");
        let hit = Rc::new(Cell::new(false));
        let flag = Rc::clone(&hit);
        resource.as_wakeable().subscribe(Box::new(move || flag.set(true)));
        assert!(hit.get());
    }

    #[test]
    fn rejected_read_fails() {
        let resource: Resource<u8> = Resource::pending();
        resource.reject("offline");
        match resource.read() {
            Err(Interrupt::Failed(err)) => assert!(err.to_string().contains("offline")),
            other => panic!("unexpected read result: {other:?}"),
        }
    }

    #[test]
    fn ping_cache_dedupes_per_lane() {
        let mut cache = PingCache::default();
        let id = WakeableId::next();
        assert!(cache.record(id, Lanes::DEFAULT, None));
        assert!(!cache.record(id, Lanes::DEFAULT, None));
        assert!(cache.record(id, Lanes::TRANSITION, None));
        let (lanes, boundaries) = cache.evict(id);
        assert_eq!(lanes, Lanes::DEFAULT | Lanes::TRANSITION);
        assert!(boundaries.is_empty());
        assert_eq!(cache.len(), 0);
    }
}
