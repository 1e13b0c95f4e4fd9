//! Commit phase: applies a finished work-in-progress tree to the host.
//!
//! Runs in three passes over the fibers whose subtree flags intersect the
//! pass mask: mutation (placements, updates, deletions, visibility), the
//! tree swap, then layout (ref attachment). Passive effects are only
//! collected here and flushed later by the scheduler.

use std::rc::Rc;

use crate::element::OffscreenMode;
use crate::error::ReconcilerError;
use crate::fiber::{FiberArena, FiberId, FiberQueue, MemoizedState, WorkTag};
use crate::flags::FiberFlags;
use crate::lanes::NO_LANE;
use crate::platform::{HostConfig, InstanceId};
use crate::root::{RootInner, RootState};
use crate::work_loop::{ensure_root_is_scheduled, schedule_passive_flush};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassiveBucket {
    Unmount,
    Update,
}

struct CommitContext<'a> {
    state: &'a mut RootState,
    host: &'a mut dyn HostConfig,
    violations: Vec<ReconcilerError>,
}

pub(crate) fn commit_root(inner: &Rc<RootInner>) {
    let (finished, lane, schedule_passive) = {
        let mut state = inner.state.borrow_mut();
        let Some(finished) = state.finished_work.take() else {
            return;
        };
        let lane = std::mem::replace(&mut state.finished_lane, NO_LANE);
        if lane == NO_LANE {
            log::warn!("committing a finished tree without a lane");
        }
        let fiber = &state.arena[finished];
        let remaining = fiber.lanes | fiber.child_lanes;
        let has_passive = (fiber.flags | fiber.subtree_flags).intersects(FiberFlags::PASSIVE_MASK);
        state.mark_root_finished(remaining);
        if std::mem::take(&mut state.finished_suspended) {
            // Hidden primary children keep the lane; only a ping retries it.
            let parked = remaining & lane;
            if !parked.is_empty() {
                log::debug!("parking {parked:?} until the suspended value settles");
                state.mark_root_suspended(parked);
            }
        }
        state.reset_callback();
        let schedule = has_passive && !state.passive_flush_scheduled;
        if schedule {
            state.passive_flush_scheduled = true;
        }
        (finished, lane, schedule)
    };
    log::debug!("committing render at {lane:?}");

    if schedule_passive {
        schedule_passive_flush(inner);
    }

    let violations = {
        let mut state = inner.state.borrow_mut();
        let mut host = inner.host.borrow_mut();
        let mut commit = CommitContext {
            state: &mut state,
            host: &mut **host,
            violations: Vec::new(),
        };
        let root = &commit.state.arena[finished];
        let effects = root.flags | root.subtree_flags;
        if effects.intersects(FiberFlags::MUTATION_MASK | FiberFlags::PASSIVE_MASK) {
            commit.commit_mutation_effects(finished);
        }
        commit.state.current = finished;
        if effects.intersects(FiberFlags::LAYOUT_MASK) {
            commit.commit_layout_effects(finished);
        }
        consume_root_updates(commit.state, finished);
        let swept = commit.state.arena.sweep(finished);
        log::trace!("swept {swept} detached fibers, {} live", commit.state.arena.len());
        commit.violations
    };

    for violation in violations {
        if inner.options.strict {
            log::error!("commit invariant violated: {violation}");
            inner.report_error(violation);
        } else {
            log::warn!("commit invariant violated: {violation}");
        }
    }

    ensure_root_is_scheduled(inner);
}

/// Drops the root updates the committed pass consumed.
fn consume_root_updates(state: &mut RootState, root: FiberId) {
    let fiber = &mut state.arena[root];
    let consumed = match &mut fiber.memoized_state {
        MemoizedState::Root(memo) => std::mem::take(&mut memo.consumed),
        _ => 0,
    };
    if let FiberQueue::Root(queue) = &fiber.update_queue {
        queue.borrow_mut().consume_front(consumed);
    }
}

/// Fibers under `root` whose subtree intersects `mask`, children before
/// parents, fixing `return_fiber` links on the way down.
fn collect_effect_fibers(arena: &mut FiberArena, root: FiberId, mask: FiberFlags) -> Vec<FiberId> {
    let mut order = Vec::new();
    let mut stack = vec![(root, false)];
    while let Some((id, visited)) = stack.pop() {
        if visited {
            order.push(id);
            continue;
        }
        stack.push((id, true));
        if arena[id].subtree_flags.intersects(mask) {
            for child in arena.children(id).into_iter().rev() {
                arena[child].return_fiber = Some(id);
                stack.push((child, false));
            }
        }
    }
    order
}

impl CommitContext<'_> {
    fn commit_mutation_effects(&mut self, root: FiberId) {
        let mask = FiberFlags::MUTATION_MASK | FiberFlags::PASSIVE_MASK;
        for id in collect_effect_fibers(&mut self.state.arena, root, mask) {
            self.commit_mutation_effects_on_fiber(id);
        }
    }

    fn commit_mutation_effects_on_fiber(&mut self, id: FiberId) {
        let flags = self.state.arena[id].flags;
        let tag = self.state.arena[id].tag;

        if flags.contains(FiberFlags::CHILD_DELETION) {
            let deletions = std::mem::take(&mut self.state.arena[id].deletions);
            for deleted in deletions {
                self.commit_deletion(id, deleted);
            }
            self.state.arena[id].flags -= FiberFlags::CHILD_DELETION;
        }
        if flags.contains(FiberFlags::PLACEMENT) {
            self.commit_placement(id);
            self.state.arena[id].flags -= FiberFlags::PLACEMENT;
        }
        if flags.contains(FiberFlags::UPDATE) {
            self.commit_update(id);
            self.state.arena[id].flags -= FiberFlags::UPDATE;
        }
        if flags.contains(FiberFlags::PASSIVE_EFFECT) {
            self.collect_passive_effects(id, PassiveBucket::Update);
            self.state.arena[id].flags -= FiberFlags::PASSIVE_EFFECT;
        }
        if flags.contains(FiberFlags::REF) && tag == WorkTag::HostComponent {
            let previous = self.state.arena[id]
                .alternate
                .and_then(|alternate| self.state.arena.get(alternate))
                .and_then(|current| current.node_ref.clone());
            if let Some(previous) = previous {
                previous.set(None);
            }
        }
        if flags.contains(FiberFlags::VISIBILITY) && tag == WorkTag::OffscreenComponent {
            let hidden = self.state.arena[id].pending_props.offscreen_mode() == Some(OffscreenMode::Hidden);
            self.hide_or_unhide_all_children(id, hidden);
            self.state.arena[id].flags -= FiberFlags::VISIBILITY;
        }
    }

    fn commit_layout_effects(&mut self, root: FiberId) {
        for id in collect_effect_fibers(&mut self.state.arena, root, FiberFlags::LAYOUT_MASK) {
            let fiber = &mut self.state.arena[id];
            if !fiber.flags.contains(FiberFlags::REF) {
                continue;
            }
            fiber.flags -= FiberFlags::REF;
            if let (Some(node_ref), Some(instance)) = (&fiber.node_ref, fiber.state_node) {
                if fiber.tag == WorkTag::HostComponent {
                    node_ref.set(Some(instance));
                }
            }
        }
    }

    fn commit_placement(&mut self, id: FiberId) {
        let Some(parent) = get_host_parent(&self.state.arena, id) else {
            self.host_parent_missing(id);
            return;
        };
        let before = get_host_sibling(&mut self.state.arena, id);
        insert_or_append_placement_node(&self.state.arena, self.host, id, parent, before);
    }

    fn commit_update(&mut self, id: FiberId) {
        let fiber = &self.state.arena[id];
        let Some(instance) = fiber.state_node else {
            return;
        };
        match fiber.tag {
            WorkTag::HostComponent => {
                if let Some(props) = fiber.pending_props.host() {
                    self.host.commit_update(instance, props);
                }
            }
            WorkTag::HostText => {
                if let Some(text) = fiber.pending_props.text() {
                    self.host.commit_text_update(instance, text);
                }
            }
            other => log::warn!("update flag on a {other:?} fiber"),
        }
    }

    /// Unmounts the subtree rooted at `deleted`, a former child of `parent`:
    /// removes its top-level host nodes, detaches refs, and queues effect
    /// teardown for every function component in it.
    fn commit_deletion(&mut self, parent: FiberId, deleted: FiberId) {
        if !self.state.arena.contains(deleted) {
            return;
        }
        let mut host_children: Vec<InstanceId> = Vec::new();
        let mut stack = vec![(deleted, false)];
        while let Some((id, under_host)) = stack.pop() {
            let fiber = &self.state.arena[id];
            match fiber.tag {
                WorkTag::HostComponent => {
                    if let (false, Some(instance)) = (under_host, fiber.state_node) {
                        host_children.push(instance);
                    }
                    if let Some(node_ref) = &fiber.node_ref {
                        node_ref.set(None);
                    }
                }
                WorkTag::HostText => {
                    if let (false, Some(instance)) = (under_host, fiber.state_node) {
                        host_children.push(instance);
                    }
                }
                WorkTag::FunctionComponent => self.collect_passive_effects(id, PassiveBucket::Unmount),
                _ => {}
            }
            let under_host = under_host || self.state.arena[id].is_host();
            for child in self.state.arena.children(id).into_iter().rev() {
                stack.push((child, under_host));
            }
        }

        if !host_children.is_empty() {
            match get_host_parent_inclusive(&self.state.arena, parent) {
                Some(host_parent) => {
                    for child in host_children {
                        self.host.remove_child(host_parent, child);
                    }
                }
                None => self.host_parent_missing(deleted),
            }
        }

        for id in [Some(deleted), self.state.arena[deleted].alternate].into_iter().flatten() {
            if let Some(fiber) = self.state.arena.get_mut(id) {
                fiber.return_fiber = None;
                fiber.child = None;
            }
        }
    }

    fn collect_passive_effects(&mut self, id: FiberId, bucket: PassiveBucket) {
        let fiber = &self.state.arena[id];
        if fiber.tag != WorkTag::FunctionComponent {
            return;
        }
        let FiberQueue::Effects(effects) = &fiber.update_queue else {
            return;
        };
        if effects.is_empty() {
            return;
        }
        let effects = Rc::clone(effects);
        let pending = &mut self.state.pending_passive_effects;
        match bucket {
            PassiveBucket::Unmount => pending.unmount.push(effects),
            PassiveBucket::Update => pending.update.push(effects),
        }
    }

    /// Toggles the outermost host nodes under an offscreen fiber, leaving
    /// nested hidden offscreen subtrees alone.
    fn hide_or_unhide_all_children(&mut self, offscreen: FiberId, hidden: bool) {
        let arena = &self.state.arena;
        let mut stack: Vec<FiberId> = arena.children(offscreen);
        stack.reverse();
        while let Some(id) = stack.pop() {
            let fiber = &arena[id];
            match fiber.tag {
                WorkTag::HostComponent => {
                    if let Some(instance) = fiber.state_node {
                        if hidden {
                            self.host.hide_instance(instance);
                        } else {
                            self.host.unhide_instance(instance);
                        }
                    }
                    continue;
                }
                WorkTag::HostText => {
                    if let Some(instance) = fiber.state_node {
                        if hidden {
                            self.host.hide_text_instance(instance);
                        } else {
                            let text = fiber.pending_props.text().cloned().unwrap_or_else(|| Rc::from(""));
                            self.host.unhide_text_instance(instance, &text);
                        }
                    }
                    continue;
                }
                WorkTag::OffscreenComponent
                    if fiber.pending_props.offscreen_mode() == Some(OffscreenMode::Hidden) =>
                {
                    continue;
                }
                _ => {}
            }
            let mut children = arena.children(id);
            children.reverse();
            stack.extend(children);
        }
    }

    fn host_parent_missing(&mut self, fiber: FiberId) {
        self.violations.push(ReconcilerError::HostParentMissing { fiber });
    }
}

fn host_node_of(arena: &FiberArena, id: FiberId) -> Option<InstanceId> {
    let fiber = &arena[id];
    match fiber.tag {
        WorkTag::HostComponent | WorkTag::HostRoot => fiber.state_node,
        _ => None,
    }
}

/// Instance of the nearest host ancestor of `fiber`.
fn get_host_parent(arena: &FiberArena, fiber: FiberId) -> Option<InstanceId> {
    let parent = arena.get(fiber)?.return_fiber?;
    get_host_parent_inclusive(arena, parent)
}

fn get_host_parent_inclusive(arena: &FiberArena, fiber: FiberId) -> Option<InstanceId> {
    let mut node = Some(fiber);
    while let Some(id) = node {
        let fiber = arena.get(id)?;
        if matches!(fiber.tag, WorkTag::HostComponent | WorkTag::HostRoot) {
            return host_node_of(arena, id);
        }
        node = fiber.return_fiber;
    }
    None
}

/// First host node after `fiber` in document order under the same host
/// parent that is not itself being placed.
fn get_host_sibling(arena: &mut FiberArena, fiber: FiberId) -> Option<InstanceId> {
    let mut node = fiber;
    'siblings: loop {
        while arena[node].sibling.is_none() {
            let parent = arena[node].return_fiber?;
            if matches!(arena[parent].tag, WorkTag::HostComponent | WorkTag::HostRoot) {
                return None;
            }
            node = parent;
        }
        let parent = arena[node].return_fiber;
        let sibling = arena[node].sibling?;
        arena[sibling].return_fiber = parent;
        node = sibling;

        while !arena[node].is_host() {
            if arena[node].flags.contains(FiberFlags::PLACEMENT) {
                continue 'siblings;
            }
            if arena[node].tag == WorkTag::OffscreenComponent
                && arena[node].pending_props.offscreen_mode() == Some(OffscreenMode::Hidden)
                && arena[node].child.is_none()
            {
                continue 'siblings;
            }
            match arena[node].child {
                Some(child) => {
                    arena[child].return_fiber = Some(node);
                    node = child;
                }
                None => continue 'siblings,
            }
        }

        if !arena[node].flags.contains(FiberFlags::PLACEMENT) {
            return arena[node].state_node;
        }
    }
}

fn insert_or_append_placement_node(
    arena: &FiberArena,
    host: &mut dyn HostConfig,
    fiber: FiberId,
    parent: InstanceId,
    before: Option<InstanceId>,
) {
    let node = &arena[fiber];
    if node.is_host() {
        if let Some(instance) = node.state_node {
            match before {
                Some(before) => host.insert_before(parent, instance, before),
                None => host.append_child(parent, instance),
            }
        }
        return;
    }
    let mut child = node.child;
    while let Some(id) = child {
        insert_or_append_placement_node(arena, host, id, parent, before);
        child = arena[id].sibling;
    }
}
