//! Begin phase: renders one fiber and returns its first child.

use std::rc::Rc;

use crate::child_fibers::reconcile_children;
use crate::element::{ElementType, Node, OffscreenMode, Props};
use crate::error::ReconcilerError;
use crate::fiber::{
    create_fiber_from_fragment, create_fiber_from_offscreen, create_work_in_progress, offscreen_props,
    FiberArena, FiberId, FiberQueue, MemoizedState, RootMemo, WorkTag,
};
use crate::flags::FiberFlags;
use crate::hooks::{render_with_hooks, Hooks};
use crate::element::Interrupt;
use crate::lanes::{Lane, NO_LANES};
use crate::root::{RootHandle, RootInner, RootState};
use crate::suspense::{push_suspense_handler, Wakeable};
use crate::update_queue::process_update_queue;

/// Why a fiber's begin did not produce children.
pub(crate) enum Interrupted {
    Suspend(Rc<dyn Wakeable>),
    Fatal(ReconcilerError),
}

pub(crate) fn begin_work(inner: &Rc<RootInner>, wip: FiberId, render_lane: Lane) -> Result<Option<FiberId>, Interrupted> {
    let mut state = inner.state.borrow_mut();
    let tag = state.arena[wip].tag;

    if tag != WorkTag::HostRoot && can_bail_out(&state.arena, wip, render_lane) {
        match tag {
            WorkTag::ContextProvider => push_provider(&mut state, wip),
            WorkTag::SuspenseComponent => push_suspense_handler(&mut state, wip),
            _ => {}
        }
        return Ok(bailout_on_already_finished_work(&mut state.arena, wip, render_lane));
    }

    state.arena[wip].lanes = NO_LANES;
    match tag {
        WorkTag::HostRoot => Ok(update_host_root(&mut state, wip, render_lane)),
        WorkTag::HostComponent => Ok(update_host_component(&mut state.arena, wip)),
        WorkTag::HostText => Ok(None),
        WorkTag::Fragment => Ok(update_fragment(&mut state.arena, wip)),
        WorkTag::ContextProvider => Ok(update_context_provider(&mut state, wip)),
        WorkTag::SuspenseComponent => Ok(update_suspense_component(&mut state, wip)),
        WorkTag::OffscreenComponent => Ok(update_offscreen_component(&mut state.arena, wip)),
        WorkTag::FunctionComponent => {
            drop(state);
            update_function_component(inner, wip, render_lane)
        }
    }
}

fn can_bail_out(arena: &FiberArena, wip: FiberId, render_lane: Lane) -> bool {
    let fiber = &arena[wip];
    let Some(current) = fiber.alternate.and_then(|id| arena.get(id)) else {
        return false;
    };
    let same_props = current
        .memoized_props
        .as_ref()
        .is_some_and(|props| props.ptr_eq(&fiber.pending_props));
    same_props
        && current.element_type == fiber.element_type
        && !current.lanes.intersects(render_lane)
        && !fiber.flags.contains(FiberFlags::DID_CAPTURE)
}

fn bailout_on_already_finished_work(arena: &mut FiberArena, wip: FiberId, render_lane: Lane) -> Option<FiberId> {
    if !arena[wip].child_lanes.intersects(render_lane) {
        log::trace!("bailing out of {:?} subtree", arena[wip].tag);
        return None;
    }
    clone_child_fibers(arena, wip);
    arena[wip].child
}

/// Gives `wip` fresh work-in-progress copies of its current children.
fn clone_child_fibers(arena: &mut FiberArena, wip: FiberId) {
    let Some(mut current_child) = arena[wip].child else {
        return;
    };
    let props = arena[current_child].pending_props.clone();
    let mut new_child = create_work_in_progress(arena, current_child, props);
    arena[new_child].return_fiber = Some(wip);
    arena[wip].child = Some(new_child);

    while let Some(next_current) = arena[current_child].sibling {
        let props = arena[next_current].pending_props.clone();
        let next = create_work_in_progress(arena, next_current, props);
        arena[next].return_fiber = Some(wip);
        arena[new_child].sibling = Some(next);
        new_child = next;
        current_child = next_current;
    }
    arena[new_child].sibling = None;
}

fn update_host_root(state: &mut RootState, wip: FiberId, render_lane: Lane) -> Option<FiberId> {
    let arena = &mut state.arena;
    let FiberQueue::Root(queue) = arena[wip].update_queue.clone() else {
        log::error!("host root fiber has no root update queue");
        return None;
    };
    let previous = match &arena[wip].memoized_state {
        MemoizedState::Root(memo) => memo.clone(),
        _ => RootMemo::default(),
    };

    let updates: Vec<_> = queue.borrow().iter().cloned().collect();
    let total = updates.len();
    let processed = process_update_queue(previous.base.clone(), updates, render_lane);
    let consumed = total - processed.base_queue.len();
    arena[wip].lanes |= processed.skipped_lanes;

    let next = processed.memoized_state;
    arena[wip].memoized_state = MemoizedState::Root(RootMemo {
        element: next.clone(),
        base: processed.base_state,
        consumed,
    });

    if next.same(&previous.element) {
        return bailout_on_already_finished_work(arena, wip, render_lane);
    }
    reconcile_children(arena, wip, &next);
    arena[wip].child
}

fn update_host_component(arena: &mut FiberArena, wip: FiberId) -> Option<FiberId> {
    let Some(props) = arena[wip].pending_props.host().cloned() else {
        log::warn!("host component rendered without host props");
        return None;
    };
    mark_ref(arena, wip);
    reconcile_children(arena, wip, &props.children);
    arena[wip].child
}

fn mark_ref(arena: &mut FiberArena, wip: FiberId) {
    let current_ref = arena[wip]
        .alternate
        .and_then(|id| arena.get(id))
        .map(|current| current.node_ref.clone());
    let fiber = &mut arena[wip];
    let changed = match (current_ref, &fiber.node_ref) {
        (None, Some(_)) => true,
        (Some(Some(previous)), Some(next)) => !previous.ptr_eq(next),
        (Some(None), Some(_)) => true,
        _ => false,
    };
    if changed {
        fiber.flags |= FiberFlags::REF;
    }
}

fn update_fragment(arena: &mut FiberArena, wip: FiberId) -> Option<FiberId> {
    let children = match &arena[wip].pending_props {
        Props::Fragment(items) => Node::List(Rc::clone(items)),
        _ => Node::Empty,
    };
    reconcile_children(arena, wip, &children);
    arena[wip].child
}

pub(crate) fn push_provider(state: &mut RootState, wip: FiberId) {
    let fiber = &state.arena[wip];
    if let (Some(ElementType::Provider(id)), Props::Provider(props)) = (&fiber.element_type, &fiber.pending_props) {
        let (id, value) = (*id, Rc::clone(&props.value));
        state.work.contexts.push(id, value);
    }
}

fn update_context_provider(state: &mut RootState, wip: FiberId) -> Option<FiberId> {
    push_provider(state, wip);
    let children = match &state.arena[wip].pending_props {
        Props::Provider(props) => props.children.clone(),
        _ => Node::Empty,
    };
    reconcile_children(&mut state.arena, wip, &children);
    state.arena[wip].child
}

fn update_offscreen_component(arena: &mut FiberArena, wip: FiberId) -> Option<FiberId> {
    let children = match &arena[wip].pending_props {
        Props::Offscreen(props) => props.children.clone(),
        _ => Node::Empty,
    };
    reconcile_children(arena, wip, &children);
    arena[wip].child
}

fn update_suspense_component(state: &mut RootState, wip: FiberId) -> Option<FiberId> {
    let Props::Suspense(props) = state.arena[wip].pending_props.clone() else {
        log::warn!("suspense boundary rendered without suspense props");
        return None;
    };
    let show_fallback = state.arena[wip].flags.contains(FiberFlags::DID_CAPTURE);
    if show_fallback {
        state.arena[wip].flags -= FiberFlags::DID_CAPTURE;
    } else {
        push_suspense_handler(state, wip);
    }

    let current_offscreen = state.arena[wip]
        .alternate
        .and_then(|id| state.arena.get(id))
        .and_then(|current| current.child)
        .filter(|id| state.arena.contains(*id));
    let arena = &mut state.arena;
    let fiber = match (current_offscreen, show_fallback) {
        (None, false) => mount_suspense_primary_children(arena, wip, props.children.clone()),
        (None, true) => mount_suspense_fallback_children(arena, wip, props.children.clone(), &props.fallback),
        (Some(current), false) => update_suspense_primary_children(arena, wip, current, props.children.clone()),
        (Some(current), true) => {
            update_suspense_fallback_children(arena, wip, current, props.children.clone(), &props.fallback)
        }
    };
    Some(fiber)
}

fn fallback_items(fallback: &Node) -> Rc<[Node]> {
    match fallback {
        Node::List(items) => Rc::clone(items),
        Node::Empty => Rc::from(Vec::new()),
        other => Rc::from(vec![other.clone()]),
    }
}

fn mount_suspense_primary_children(arena: &mut FiberArena, wip: FiberId, children: Node) -> FiberId {
    let offscreen = create_fiber_from_offscreen(arena, offscreen_props(OffscreenMode::Visible, children));
    arena[offscreen].return_fiber = Some(wip);
    arena[wip].child = Some(offscreen);
    offscreen
}

fn mount_suspense_fallback_children(arena: &mut FiberArena, wip: FiberId, children: Node, fallback: &Node) -> FiberId {
    let props = offscreen_props(OffscreenMode::Hidden, children);
    let offscreen = create_fiber_from_offscreen(arena, props.clone());
    // Never begun, so its memoized mode is recorded here.
    arena[offscreen].memoized_props = Some(props);
    let fallback = create_fiber_from_fragment(arena, fallback_items(fallback), None);

    arena[offscreen].return_fiber = Some(wip);
    arena[fallback].return_fiber = Some(wip);
    arena[offscreen].sibling = Some(fallback);
    arena[wip].child = Some(offscreen);
    fallback
}

fn update_suspense_primary_children(
    arena: &mut FiberArena,
    wip: FiberId,
    current_offscreen: FiberId,
    children: Node,
) -> FiberId {
    let current_fallback = arena[current_offscreen].sibling;
    let offscreen = create_work_in_progress(arena, current_offscreen, offscreen_props(OffscreenMode::Visible, children));
    arena[offscreen].return_fiber = Some(wip);
    arena[offscreen].sibling = None;
    arena[wip].child = Some(offscreen);

    if let Some(fallback) = current_fallback {
        let fiber = &mut arena[wip];
        if !fiber.deletions.contains(&fallback) {
            fiber.deletions.push(fallback);
        }
        fiber.flags |= FiberFlags::CHILD_DELETION;
    }
    offscreen
}

fn update_suspense_fallback_children(
    arena: &mut FiberArena,
    wip: FiberId,
    current_offscreen: FiberId,
    children: Node,
    fallback: &Node,
) -> FiberId {
    let current_fallback = arena[current_offscreen].sibling;
    let props = offscreen_props(OffscreenMode::Hidden, children);
    let offscreen = create_work_in_progress(arena, current_offscreen, props.clone());
    arena[offscreen].memoized_props = Some(props);

    let fallback_props = Props::Fragment(fallback_items(fallback));
    let fallback = match current_fallback {
        Some(current) => create_work_in_progress(arena, current, fallback_props),
        None => {
            let items = match fallback_props {
                Props::Fragment(items) => items,
                _ => Rc::from(Vec::new()),
            };
            let created = create_fiber_from_fragment(arena, items, None);
            arena[created].flags |= FiberFlags::PLACEMENT;
            created
        }
    };

    arena[offscreen].return_fiber = Some(wip);
    arena[fallback].return_fiber = Some(wip);
    arena[fallback].sibling = None;
    arena[offscreen].sibling = Some(fallback);
    arena[wip].child = Some(offscreen);
    fallback
}

fn update_function_component(
    inner: &Rc<RootInner>,
    wip: FiberId,
    render_lane: Lane,
) -> Result<Option<FiberId>, Interrupted> {
    let (component, props, previous, contexts) = {
        let state = inner.state.borrow();
        let fiber = &state.arena[wip];
        let Some(ElementType::Component(component)) = fiber.element_type.clone() else {
            log::warn!("function component fiber without a component type");
            return Ok(None);
        };
        let previous = fiber
            .alternate
            .and_then(|id| state.arena.get(id))
            .map(|current| current.memoized_state.hooks().to_vec());
        (component, fiber.pending_props.clone(), previous, state.work.contexts.snapshot())
    };

    let name = component.name();
    let handle = RootHandle(Rc::downgrade(inner));
    let mut hooks = Hooks::new(wip, name, previous, render_lane, handle, contexts);
    let result = render_with_hooks(&component, &props, &mut hooks);
    let output = hooks.finish(result.is_ok());

    if let Some(detail) = output.mismatch {
        return Err(Interrupted::Fatal(ReconcilerError::HookMismatch { component: name, detail }));
    }
    let children = match result {
        Ok(children) => children,
        Err(Interrupt::Suspend(wakeable)) => return Err(Interrupted::Suspend(wakeable)),
        Err(Interrupt::Failed(source)) => {
            return Err(Interrupted::Fatal(ReconcilerError::Component { component: name, source }))
        }
    };

    let mut state = inner.state.borrow_mut();
    let fiber = &mut state.arena[wip];
    fiber.memoized_state = MemoizedState::Hooks(output.hooks);
    fiber.update_queue = FiberQueue::Effects(output.effects.into());
    fiber.lanes |= output.skipped_lanes;
    if output.passive {
        fiber.flags |= FiberFlags::PASSIVE_EFFECT;
    }
    reconcile_children(&mut state.arena, wip, &children);
    Ok(state.arena[wip].child)
}
