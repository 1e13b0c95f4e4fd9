//! Render scheduling and the work loop.
//!
//! A render pass walks the work-in-progress tree depth first: `begin_work`
//! descends, `complete_unit_of_work` climbs back up through siblings and
//! parents. The sync loop runs to completion; the concurrent loop polls
//! the scheduler between units and leaves the cursor in place when it
//! yields.

use std::rc::Rc;

use crate::begin_work::{begin_work, Interrupted};
use crate::commit::commit_root;
use crate::context::ContextStack;
use crate::fiber::{create_work_in_progress, FiberArena, FiberId, WorkTag};
use crate::element::Props;
use crate::error::ReconcilerError;
use crate::flags::{FiberFlags, HookEffectTags};
use crate::complete_work::complete_work;
use crate::lanes::{lanes_to_scheduler_priority, Lane, Lanes, NO_LANE};
use crate::platform::{Continuation, HostConfig, PriorityLevel};
use crate::root::{RootHandle, RootInner, RootState};
use crate::suspense::{attach_ping_listener, throw_exception, unwind_work, Wakeable, WakeableId};

/// Cursor state of the render pass in progress.
#[derive(Default)]
pub(crate) struct WorkInProgress {
    /// Work-in-progress host root of this pass.
    pub(crate) root: Option<FiberId>,
    /// Next fiber to begin.
    pub(crate) fiber: Option<FiberId>,
    pub(crate) render_lane: Lane,
    /// Set when a suspension found no boundary.
    pub(crate) abandoned: bool,
    /// Set when a boundary captured a suspension that has not pinged yet.
    pub(crate) captured: bool,
    pub(crate) contexts: ContextStack,
    pub(crate) suspense_handlers: Vec<FiberId>,
}

/// Result of one unit of work.
pub(crate) enum StepOutcome {
    Completed,
    Suspended(Rc<dyn Wakeable>),
    Errored(ReconcilerError),
}

enum RootExit {
    Completed,
    /// The concurrent loop yielded with work left.
    Incomplete,
    /// A suspension escaped every boundary.
    DidNotComplete,
}

pub(crate) fn schedule_update_on_fiber(inner: &Rc<RootInner>, fiber: FiberId, lane: Lane) {
    {
        let mut state = inner.state.borrow_mut();
        if !mark_update_lane_from_fiber_to_root(&mut state.arena, fiber, lane) {
            log::warn!("update on fiber {fiber:?} that is no longer mounted; ignoring");
            return;
        }
        state.mark_root_updated(lane);
    }
    log::trace!("scheduled update on {fiber:?} at {lane:?}");
    ensure_root_is_scheduled(inner);
}

/// Adds `lane` to the fiber's lanes and to the child lanes of every
/// ancestor, on both trees. Returns whether the walk reached the host root.
pub(crate) fn mark_update_lane_from_fiber_to_root(arena: &mut FiberArena, fiber: FiberId, lane: Lane) -> bool {
    let Some(source) = arena.get_mut(fiber) else {
        return false;
    };
    source.lanes |= lane;
    let mut parent = source.return_fiber;
    if let Some(alternate) = source.alternate.and_then(|id| arena.get_mut(id)) {
        alternate.lanes |= lane;
    }

    let mut node = fiber;
    while let Some(id) = parent {
        let Some(fiber) = arena.get_mut(id) else {
            return false;
        };
        fiber.child_lanes |= lane;
        parent = fiber.return_fiber;
        if let Some(alternate) = fiber.alternate.and_then(|alt| arena.get_mut(alt)) {
            alternate.child_lanes |= lane;
        }
        node = id;
    }
    arena.get(node).is_some_and(|fiber| fiber.tag == WorkTag::HostRoot)
}

/// Makes sure exactly one task is scheduled for the root's next lane.
pub(crate) fn ensure_root_is_scheduled(inner: &Rc<RootInner>) {
    let (lane, existing, existing_priority) = {
        let state = inner.state.borrow();
        (state.next_lane(), state.callback_node, state.callback_priority)
    };

    if lane.is_empty() {
        if let Some(handle) = existing {
            inner.scheduler.cancel_callback(handle);
        }
        inner.state.borrow_mut().reset_callback();
        return;
    }
    if lane == existing_priority {
        return;
    }
    if let Some(handle) = existing {
        inner.scheduler.cancel_callback(handle);
    }

    let callback_node = if lane == Lanes::SYNC {
        log::debug!("scheduling sync render in a microtask");
        let weak = Rc::downgrade(inner);
        inner.sync_queue.borrow_mut().push_back(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                perform_sync_work_on_root(&inner);
            }
        }));
        let weak = Rc::downgrade(inner);
        inner.host.borrow_mut().schedule_microtask(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                flush_sync_callbacks(&inner);
            }
        }));
        None
    } else {
        let priority = lanes_to_scheduler_priority(lane);
        log::debug!("scheduling concurrent render for {lane:?} at {priority:?}");
        let handle = RootHandle(Rc::downgrade(inner));
        Some(inner.scheduler.schedule_callback(
            priority,
            Box::new(move |did_timeout| perform_concurrent_work_on_root(handle, did_timeout)),
        ))
    };

    let mut state = inner.state.borrow_mut();
    state.callback_node = callback_node;
    state.callback_priority = lane;
}

/// Runs every queued sync render. Re-entrant calls are ignored.
pub(crate) fn flush_sync_callbacks(inner: &Rc<RootInner>) {
    if inner.flushing_sync.replace(true) {
        return;
    }
    loop {
        let task = inner.sync_queue.borrow_mut().pop_front();
        match task {
            Some(task) => task(),
            None => break,
        }
    }
    inner.flushing_sync.set(false);
}

fn perform_sync_work_on_root(inner: &Rc<RootInner>) {
    flush_passive_effects(inner);
    let lane = {
        let mut state = inner.state.borrow_mut();
        state.reset_callback();
        state.next_lane()
    };
    if lane != Lanes::SYNC {
        ensure_root_is_scheduled(inner);
        return;
    }
    match render_root(inner, lane, false) {
        Ok(RootExit::Completed) => commit_root(inner),
        Ok(RootExit::DidNotComplete) => {
            inner.state.borrow_mut().mark_root_suspended(lane);
            ensure_root_is_scheduled(inner);
        }
        Ok(RootExit::Incomplete) => {
            log::error!("sync render yielded; rescheduling");
            ensure_root_is_scheduled(inner);
        }
        Err(err) => fail_root(inner, lane, err),
    }
}

fn perform_concurrent_work_on_root(handle: RootHandle, did_timeout: bool) -> Continuation {
    let Some(inner) = handle.0.upgrade() else {
        return Continuation::Done;
    };
    let original_callback = inner.state.borrow().callback_node;
    if flush_passive_effects(&inner) && inner.state.borrow().callback_node != original_callback {
        // The flush scheduled different work; this task is stale.
        return Continuation::Done;
    }

    let lane = inner.state.borrow().next_lane();
    if lane.is_empty() {
        inner.state.borrow_mut().reset_callback();
        return Continuation::Done;
    }

    let time_slice = lane != Lanes::SYNC && !did_timeout;
    match render_root(&inner, lane, time_slice) {
        Ok(RootExit::Incomplete) => {
            ensure_root_is_scheduled(&inner);
            if inner.state.borrow().callback_node == original_callback {
                log::trace!("yielding render at {lane:?}");
                return Continuation::Continue(Box::new(move |did_timeout| {
                    perform_concurrent_work_on_root(handle, did_timeout)
                }));
            }
        }
        Ok(RootExit::Completed) => commit_root(&inner),
        Ok(RootExit::DidNotComplete) => {
            let mut state = inner.state.borrow_mut();
            state.mark_root_suspended(lane);
            state.reset_callback();
            drop(state);
            ensure_root_is_scheduled(&inner);
        }
        Err(err) => fail_root(&inner, lane, err),
    }
    Continuation::Done
}

fn fail_root(inner: &Rc<RootInner>, lane: Lane, err: ReconcilerError) {
    log::error!("render at {lane:?} failed: {err}");
    {
        let mut state = inner.state.borrow_mut();
        state.drop_lanes(lane);
        state.reset_callback();
    }
    inner.report_error(err);
    ensure_root_is_scheduled(inner);
}

fn render_root(inner: &Rc<RootInner>, lane: Lane, time_slice: bool) -> Result<RootExit, ReconcilerError> {
    {
        let mut state = inner.state.borrow_mut();
        if state.work.render_lane != lane || state.work.fiber.is_none() {
            prepare_fresh_stack(&mut state, lane);
        }
    }

    loop {
        let outcome = if time_slice {
            work_loop_concurrent(inner, lane)
        } else {
            work_loop_sync(inner, lane)
        };
        match outcome {
            StepOutcome::Completed => break,
            StepOutcome::Suspended(wakeable) => throw_and_unwind(inner, wakeable, lane),
            StepOutcome::Errored(err) => {
                inner.state.borrow_mut().work = WorkInProgress::default();
                return Err(err);
            }
        }
    }

    let mut state = inner.state.borrow_mut();
    if state.work.abandoned {
        log::warn!("render at {lane:?} did not complete: suspended outside any boundary");
        state.work = WorkInProgress::default();
        return Ok(RootExit::DidNotComplete);
    }
    if state.work.fiber.is_some() {
        return Ok(RootExit::Incomplete);
    }
    state.finished_work = state.work.root.take();
    state.finished_lane = lane;
    state.finished_suspended = state.work.captured;
    state.work = WorkInProgress::default();
    Ok(RootExit::Completed)
}

fn prepare_fresh_stack(state: &mut RootState, lane: Lane) {
    log::trace!("preparing fresh stack for {lane:?}");
    state.finished_work = None;
    state.finished_lane = NO_LANE;
    state.finished_suspended = false;
    let root = create_work_in_progress(&mut state.arena, state.current, Props::Empty);
    state.arena[root].return_fiber = None;
    state.arena[root].sibling = None;
    state.work = WorkInProgress {
        root: Some(root),
        fiber: Some(root),
        render_lane: lane,
        ..WorkInProgress::default()
    };
}

fn work_loop_sync(inner: &Rc<RootInner>, lane: Lane) -> StepOutcome {
    loop {
        let Some(fiber) = inner.state.borrow().work.fiber else {
            return StepOutcome::Completed;
        };
        match perform_unit_of_work(inner, fiber, lane) {
            StepOutcome::Completed => {}
            interrupted => return interrupted,
        }
    }
}

fn work_loop_concurrent(inner: &Rc<RootInner>, lane: Lane) -> StepOutcome {
    loop {
        let Some(fiber) = inner.state.borrow().work.fiber else {
            return StepOutcome::Completed;
        };
        if inner.scheduler.should_yield() {
            return StepOutcome::Completed;
        }
        match perform_unit_of_work(inner, fiber, lane) {
            StepOutcome::Completed => {}
            interrupted => return interrupted,
        }
    }
}

fn perform_unit_of_work(inner: &Rc<RootInner>, fiber: FiberId, lane: Lane) -> StepOutcome {
    let next = match begin_work(inner, fiber, lane) {
        Ok(next) => next,
        Err(Interrupted::Suspend(wakeable)) => return StepOutcome::Suspended(wakeable),
        Err(Interrupted::Fatal(err)) => return StepOutcome::Errored(err),
    };

    let mut state = inner.state.borrow_mut();
    let props = state.arena[fiber].pending_props.clone();
    state.arena[fiber].memoized_props = Some(props);
    match next {
        Some(next) => state.work.fiber = Some(next),
        None => {
            let mut host = inner.host.borrow_mut();
            complete_unit_of_work(&mut state, &mut **host, fiber);
        }
    }
    StepOutcome::Completed
}

fn complete_unit_of_work(state: &mut RootState, host: &mut dyn HostConfig, fiber: FiberId) {
    let mut node = fiber;
    loop {
        complete_work(state, host, node);
        if let Some(sibling) = state.arena[node].sibling {
            state.work.fiber = Some(sibling);
            return;
        }
        match state.arena[node].return_fiber {
            Some(parent) if Some(node) != state.work.root => node = parent,
            _ => {
                state.work.fiber = None;
                return;
            }
        }
    }
}

/// Hands a suspension to the nearest boundary and unwinds to it.
fn throw_and_unwind(inner: &Rc<RootInner>, wakeable: Rc<dyn Wakeable>, lane: Lane) {
    let needs_listener = {
        let mut state = inner.state.borrow_mut();
        let unit = state.work.fiber;
        let boundary = throw_exception(&mut state);
        if boundary.is_some() {
            state.work.captured = true;
        }
        let needs_listener = state.ping_cache.record(wakeable.wakeable_id(), lane, boundary);
        if let Some(unit) = unit {
            unwind_unit_of_work(&mut state, unit);
        }
        needs_listener
    };
    if needs_listener {
        attach_ping_listener(RootHandle(Rc::downgrade(inner)), &wakeable, lane);
    }
}

fn unwind_unit_of_work(state: &mut RootState, unit: FiberId) {
    let mut node = Some(unit);
    while let Some(id) = node {
        if let Some(resume) = unwind_work(state, id) {
            state.work.fiber = Some(resume);
            return;
        }
        let parent = if Some(id) == state.work.root {
            None
        } else {
            state.arena[id].return_fiber
        };
        if let Some(parent) = parent {
            let fiber = &mut state.arena[parent];
            fiber.subtree_flags = FiberFlags::empty();
            fiber.deletions.clear();
            fiber.flags -= FiberFlags::CHILD_DELETION;
        }
        node = parent;
    }
    state.work.fiber = None;
    state.work.abandoned = true;
}

/// Settled wakeable: retry the boundaries that were waiting on it.
pub(crate) fn ping_suspended_root(inner: &Rc<RootInner>, wakeable: WakeableId, lane: Lane) {
    {
        let mut state = inner.state.borrow_mut();
        let (lanes, boundaries) = state.ping_cache.evict(wakeable);
        let lanes = lanes | lane;
        for boundary in boundaries {
            mark_update_lane_from_fiber_to_root(&mut state.arena, boundary, lanes);
        }
        if state.work.render_lane.intersects(lanes) {
            state.work.captured = false;
        }
        state.mark_root_pinged(lanes);
    }
    log::debug!("{wakeable:?} settled; retrying at {lane:?}");
    ensure_root_is_scheduled(inner);
}

/// Runs pending passive effects: all unmount destroys, then update
/// destroys, then update creates. Returns whether any list was flushed.
pub(crate) fn flush_passive_effects(inner: &Rc<RootInner>) -> bool {
    let pending = {
        let mut state = inner.state.borrow_mut();
        state.passive_flush_scheduled = false;
        std::mem::take(&mut state.pending_passive_effects)
    };
    if pending.is_empty() {
        return false;
    }
    log::debug!(
        "flushing passive effects: {} unmounted, {} updated",
        pending.unmount.len(),
        pending.update.len()
    );

    for effects in &pending.unmount {
        for effect in effects.iter() {
            if effect.has_tags(HookEffectTags::PASSIVE) {
                effect.destroy();
                effect.clear_has_effect();
            }
        }
    }
    let mounted = HookEffectTags::PASSIVE | HookEffectTags::HAS_EFFECT;
    for effects in &pending.update {
        for effect in effects.iter().filter(|effect| effect.has_tags(mounted)) {
            effect.destroy();
        }
    }
    for effects in &pending.update {
        for effect in effects.iter().filter(|effect| effect.has_tags(mounted)) {
            effect.create();
        }
    }

    flush_sync_callbacks(inner);
    true
}

pub(crate) fn schedule_passive_flush(inner: &Rc<RootInner>) {
    let weak = Rc::downgrade(inner);
    inner.scheduler.schedule_callback(
        PriorityLevel::Normal,
        Box::new(move |_| {
            if let Some(inner) = weak.upgrade() {
                flush_passive_effects(&inner);
            }
            Continuation::Done
        }),
    );
}
