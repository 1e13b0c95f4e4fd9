//! Fiber roots: one per mounted container.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::element::Node;
use crate::error::ReconcilerError;
use crate::fiber::{create_host_root_fiber, FiberArena, FiberId, FiberQueue};
use crate::hooks::Effect;
use crate::lanes::{request_update_lane, Lane, Lanes, NO_LANE, NO_LANES};
use crate::platform::{CallbackHandle, HostConfig, InstanceId, PriorityLevel, TaskScheduler};
use crate::suspense::{PingCache, WakeableId};
use crate::update_queue::{create_update, Action};
use crate::work_loop::{self, WorkInProgress};

/// Per-root behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootOptions {
    /// Record commit invariant violations as errors instead of only logging them.
    pub strict: bool,
}

/// Effect lists waiting for the passive flush.
#[derive(Default)]
pub(crate) struct PendingPassiveEffects {
    pub(crate) unmount: Vec<Rc<[Rc<Effect>]>>,
    pub(crate) update: Vec<Rc<[Rc<Effect>]>>,
}

impl PendingPassiveEffects {
    pub(crate) fn is_empty(&self) -> bool {
        self.unmount.is_empty() && self.update.is_empty()
    }
}

pub(crate) struct RootState {
    pub(crate) arena: FiberArena,
    pub(crate) container: InstanceId,
    pub(crate) current: FiberId,
    pub(crate) finished_work: Option<FiberId>,
    pub(crate) finished_lane: Lane,
    /// The finished tree shows a fallback for a suspension still pending.
    pub(crate) finished_suspended: bool,
    pub(crate) pending_lanes: Lanes,
    pub(crate) suspended_lanes: Lanes,
    pub(crate) callback_node: Option<CallbackHandle>,
    pub(crate) callback_priority: Lane,
    pub(crate) pending_passive_effects: PendingPassiveEffects,
    pub(crate) passive_flush_scheduled: bool,
    pub(crate) ping_cache: PingCache,
    pub(crate) work: WorkInProgress,
}

impl RootState {
    fn new(container: InstanceId) -> Self {
        let mut arena = FiberArena::new();
        let current = create_host_root_fiber(&mut arena, container);
        Self {
            arena,
            container,
            current,
            finished_work: None,
            finished_lane: NO_LANE,
            finished_suspended: false,
            pending_lanes: NO_LANES,
            suspended_lanes: NO_LANES,
            callback_node: None,
            callback_priority: NO_LANE,
            pending_passive_effects: PendingPassiveEffects::default(),
            passive_flush_scheduled: false,
            ping_cache: PingCache::default(),
            work: WorkInProgress::default(),
        }
    }

    /// Highest-priority lane with work that is not parked on a suspension.
    pub(crate) fn next_lane(&self) -> Lane {
        (self.pending_lanes - self.suspended_lanes).highest_priority()
    }

    pub(crate) fn mark_root_updated(&mut self, lane: Lane) {
        self.pending_lanes |= lane;
        self.suspended_lanes = NO_LANES;
    }

    /// After a commit only the lanes still pending somewhere in the
    /// committed tree remain.
    pub(crate) fn mark_root_finished(&mut self, remaining_lanes: Lanes) {
        self.pending_lanes = remaining_lanes;
        self.suspended_lanes &= remaining_lanes;
    }

    pub(crate) fn drop_lanes(&mut self, lanes: Lanes) {
        self.pending_lanes -= lanes;
        self.suspended_lanes -= lanes;
    }

    pub(crate) fn mark_root_suspended(&mut self, lane: Lane) {
        self.suspended_lanes |= lane;
    }

    pub(crate) fn mark_root_pinged(&mut self, lanes: Lanes) {
        self.pending_lanes |= lanes;
        self.suspended_lanes -= lanes;
    }

    pub(crate) fn reset_callback(&mut self) {
        self.callback_node = None;
        self.callback_priority = NO_LANE;
    }
}

pub(crate) struct RootInner {
    pub(crate) state: RefCell<RootState>,
    pub(crate) host: RefCell<Box<dyn HostConfig>>,
    pub(crate) scheduler: Rc<dyn TaskScheduler>,
    pub(crate) options: RootOptions,
    pub(crate) sync_queue: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    pub(crate) flushing_sync: Cell<bool>,
    pub(crate) errors: RefCell<VecDeque<ReconcilerError>>,
}

impl RootInner {
    pub(crate) fn report_error(&self, error: ReconcilerError) {
        self.errors.borrow_mut().push_back(error);
    }
}

/// Owner of a mounted tree. Dropping it stops all scheduled work for the
/// root; handles held by dispatchers turn into no-ops.
pub struct FiberRoot {
    inner: Rc<RootInner>,
}

impl FiberRoot {
    pub fn create_container<H>(host: H, container: InstanceId, scheduler: Rc<dyn TaskScheduler>) -> Self
    where
        H: HostConfig + 'static,
    {
        Self::create_container_with_options(host, container, scheduler, RootOptions::default())
    }

    pub fn create_container_with_options<H>(
        host: H,
        container: InstanceId,
        scheduler: Rc<dyn TaskScheduler>,
        options: RootOptions,
    ) -> Self
    where
        H: HostConfig + 'static,
    {
        log::debug!("creating fiber root for container {container} ({options:?})");
        let inner = RootInner {
            state: RefCell::new(RootState::new(container)),
            host: RefCell::new(Box::new(host)),
            scheduler,
            options,
            sync_queue: RefCell::new(VecDeque::new()),
            flushing_sync: Cell::new(false),
            errors: RefCell::new(VecDeque::new()),
        };
        Self {
            inner: Rc::new(inner),
        }
    }

    /// Replaces the rendered tree. Root updates run at immediate priority,
    /// so the render happens on the next microtask flush.
    pub fn update_container(&self, element: impl Into<Node>) {
        let element = element.into();
        let inner = Rc::clone(&self.inner);
        let scheduler = Rc::clone(&inner.scheduler);
        scheduler.run_with_priority(PriorityLevel::Immediate, &mut || {
            let lane = request_update_lane(inner.scheduler.current_priority_level());
            let (root_fiber, queue) = {
                let state = inner.state.borrow();
                let queue = match &state.arena[state.current].update_queue {
                    FiberQueue::Root(queue) => Some(Rc::clone(queue)),
                    _ => None,
                };
                (state.current, queue)
            };
            let Some(queue) = queue else {
                log::error!("host root fiber lost its update queue");
                return;
            };
            queue
                .borrow_mut()
                .enqueue(create_update(Action::Replace(element.clone()), lane));
            work_loop::schedule_update_on_fiber(&inner, root_fiber, lane);
        });
    }

    /// Renders nothing into the container, tearing the tree down.
    pub fn unmount(&self) {
        self.update_container(Node::Empty);
    }

    /// Runs queued synchronous renders now and returns the first error a
    /// pass reported.
    pub fn flush_sync_work(&self) -> Result<(), ReconcilerError> {
        work_loop::flush_sync_callbacks(&self.inner);
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs pending passive effects now. Returns whether any ran.
    pub fn flush_passive_effects(&self) -> bool {
        work_loop::flush_passive_effects(&self.inner)
    }

    pub fn take_error(&self) -> Option<ReconcilerError> {
        self.inner.errors.borrow_mut().pop_front()
    }

    pub fn handle(&self) -> RootHandle {
        RootHandle(Rc::downgrade(&self.inner))
    }

    pub fn pending_lanes(&self) -> Lanes {
        self.inner.state.borrow().pending_lanes
    }

    pub fn suspended_lanes(&self) -> Lanes {
        self.inner.state.borrow().suspended_lanes
    }

    pub fn container(&self) -> InstanceId {
        self.inner.state.borrow().container
    }

    pub fn options(&self) -> RootOptions {
        self.inner.options
    }

    /// Number of fibers currently allocated, both trees included.
    pub fn fiber_count(&self) -> usize {
        self.inner.state.borrow().arena.len()
    }

    /// Runs `f` against the committed fiber tree and its root fiber.
    pub fn inspect<R>(&self, f: impl FnOnce(&FiberArena, FiberId) -> R) -> R {
        let state = self.inner.state.borrow();
        f(&state.arena, state.current)
    }

    pub fn has_pending_passive_effects(&self) -> bool {
        !self.inner.state.borrow().pending_passive_effects.is_empty()
    }
}

impl fmt::Debug for FiberRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("FiberRoot")
            .field("container", &state.container)
            .field("pending_lanes", &state.pending_lanes)
            .field("suspended_lanes", &state.suspended_lanes)
            .field("fibers", &state.arena.len())
            .finish()
    }
}

/// Mounts a new root on `container`.
pub fn create_container<H>(host: H, container: InstanceId, scheduler: Rc<dyn TaskScheduler>) -> FiberRoot
where
    H: HostConfig + 'static,
{
    FiberRoot::create_container(host, container, scheduler)
}

pub fn update_container(element: impl Into<Node>, root: &FiberRoot) {
    root.update_container(element);
}

/// Weak reference to a root, held by dispatchers and ping listeners.
#[derive(Clone)]
pub struct RootHandle(pub(crate) Weak<RootInner>);

impl RootHandle {
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub(crate) fn request_update_lane(&self) -> Lane {
        match self.0.upgrade() {
            Some(inner) => request_update_lane(inner.scheduler.current_priority_level()),
            None => Lanes::DEFAULT,
        }
    }

    pub(crate) fn schedule_update_on_fiber(&self, fiber: FiberId, lane: Lane) {
        match self.0.upgrade() {
            Some(inner) => work_loop::schedule_update_on_fiber(&inner, fiber, lane),
            None => log::warn!("update dispatched after its root was dropped"),
        }
    }

    pub(crate) fn ping(&self, wakeable: WakeableId, lane: Lane) {
        if let Some(inner) = self.0.upgrade() {
            work_loop::ping_suspended_root(&inner, wakeable, lane);
        }
    }
}

impl fmt::Debug for RootHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootHandle").field("alive", &self.is_alive()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspended_lanes_are_skipped_until_pinged() {
        let mut state = RootState::new(0);
        state.mark_root_updated(Lanes::DEFAULT);
        state.mark_root_suspended(Lanes::DEFAULT);
        assert_eq!(state.next_lane(), NO_LANE);

        state.mark_root_pinged(Lanes::DEFAULT);
        assert_eq!(state.next_lane(), Lanes::DEFAULT);

        state.mark_root_finished(Lanes::TRANSITION);
        assert_eq!(state.pending_lanes, Lanes::TRANSITION);
        state.drop_lanes(Lanes::TRANSITION);
        assert!(state.pending_lanes.is_empty());
    }

    #[test]
    fn new_update_clears_suspension() {
        let mut state = RootState::new(0);
        state.mark_root_updated(Lanes::TRANSITION);
        state.mark_root_suspended(Lanes::TRANSITION);
        state.mark_root_updated(Lanes::SYNC);
        assert_eq!(state.next_lane(), Lanes::SYNC);
        assert!(state.suspended_lanes.is_empty());
    }
}
