//! Complete phase: creates host instances for mounted fibers, flags
//! updates, and bubbles flags and lanes to the parent.

use crate::element::{ElementType, OffscreenMode};
use crate::fiber::{FiberArena, FiberId, WorkTag};
use crate::flags::FiberFlags;
use crate::lanes::NO_LANES;
use crate::platform::{HostConfig, InstanceId};
use crate::root::RootState;
use crate::suspense::pop_suspense_handler;

pub(crate) fn complete_work(state: &mut RootState, host: &mut dyn HostConfig, wip: FiberId) {
    let current = state.arena[wip].alternate.filter(|id| state.arena.contains(*id));
    match state.arena[wip].tag {
        WorkTag::HostComponent => {
            complete_host_component(&mut state.arena, host, wip, current);
            bubble_properties(&mut state.arena, wip);
        }
        WorkTag::HostText => {
            complete_host_text(&mut state.arena, host, wip, current);
            bubble_properties(&mut state.arena, wip);
        }
        WorkTag::HostRoot | WorkTag::FunctionComponent | WorkTag::Fragment | WorkTag::OffscreenComponent => {
            bubble_properties(&mut state.arena, wip);
        }
        WorkTag::ContextProvider => {
            state.work.contexts.pop();
            bubble_properties(&mut state.arena, wip);
        }
        WorkTag::SuspenseComponent => {
            pop_suspense_handler(state, wip);
            mark_visibility_change(&mut state.arena, wip);
            bubble_properties(&mut state.arena, wip);
        }
    }
}

fn complete_host_component(arena: &mut FiberArena, host: &mut dyn HostConfig, wip: FiberId, current: Option<FiberId>) {
    let fiber = &arena[wip];
    if let (Some(current), Some(_)) = (current, fiber.state_node) {
        let unchanged = arena[current]
            .memoized_props
            .as_ref()
            .is_some_and(|props| props.ptr_eq(&fiber.pending_props));
        if !unchanged {
            arena[wip].flags |= FiberFlags::UPDATE;
        }
        return;
    }

    let Some(ElementType::Host(tag)) = fiber.element_type.clone() else {
        log::warn!("host component fiber without a tag");
        return;
    };
    let Some(props) = fiber.pending_props.host().cloned() else {
        log::warn!("host component <{tag}> without host props");
        return;
    };
    let instance = host.create_instance(&tag, &props);
    append_all_children(arena, host, instance, wip);
    arena[wip].state_node = Some(instance);
}

fn complete_host_text(arena: &mut FiberArena, host: &mut dyn HostConfig, wip: FiberId, current: Option<FiberId>) {
    let fiber = &arena[wip];
    let Some(text) = fiber.pending_props.text().cloned() else {
        log::warn!("text fiber without text props");
        return;
    };
    if let (Some(current), Some(_)) = (current, fiber.state_node) {
        let previous = arena[current].memoized_props.as_ref().and_then(|props| props.text().cloned());
        if previous.as_deref() != Some(&*text) {
            arena[wip].flags |= FiberFlags::UPDATE;
        }
        return;
    }
    let instance = host.create_text_instance(&text);
    arena[wip].state_node = Some(instance);
}

/// Appends the nearest host descendants of `wip` to `parent`.
fn append_all_children(arena: &FiberArena, host: &mut dyn HostConfig, parent: InstanceId, wip: FiberId) {
    let mut child = arena[wip].child;
    while let Some(id) = child {
        let fiber = &arena[id];
        if fiber.is_host() {
            if let Some(instance) = fiber.state_node {
                host.append_child(parent, instance);
            }
        } else if fiber.child.is_some() {
            append_all_children(arena, host, parent, id);
        }
        child = fiber.sibling;
    }
}

/// Flags the primary offscreen child when its visibility flipped.
fn mark_visibility_change(arena: &mut FiberArena, wip: FiberId) {
    let Some(offscreen) = arena[wip].child else {
        return;
    };
    // A bailed-out boundary still points at the committed offscreen fiber.
    if arena[offscreen].return_fiber != Some(wip) || arena[offscreen].tag != WorkTag::OffscreenComponent {
        return;
    }
    let next = arena[offscreen].pending_props.offscreen_mode();
    let previous = arena[offscreen]
        .alternate
        .and_then(|id| arena.get(id))
        .and_then(|current| current.memoized_props.as_ref())
        .and_then(|props| props.offscreen_mode());
    if let (Some(previous), Some(next)) = (previous, next) {
        if previous != next {
            log::trace!(
                "suspense boundary switches to {}",
                if next == OffscreenMode::Hidden { "fallback" } else { "primary" }
            );
            arena[offscreen].flags |= FiberFlags::VISIBILITY;
        }
    }
}

/// Folds the children's flags and lanes into `wip`. Children still shared
/// with the current tree carry flags that were already committed, so only
/// their lanes count.
pub(crate) fn bubble_properties(arena: &mut FiberArena, wip: FiberId) {
    let did_bailout = arena[wip]
        .alternate
        .and_then(|id| arena.get(id))
        .is_some_and(|current| current.child == arena[wip].child);
    let mut subtree_flags = FiberFlags::empty();
    let mut child_lanes = NO_LANES;
    let mut child = arena[wip].child;
    while let Some(id) = child {
        let fiber = &mut arena[id];
        if !did_bailout {
            subtree_flags |= fiber.subtree_flags | fiber.flags;
        }
        child_lanes |= fiber.lanes | fiber.child_lanes;
        fiber.return_fiber = Some(wip);
        child = fiber.sibling;
    }
    let fiber = &mut arena[wip];
    fiber.subtree_flags |= subtree_flags;
    fiber.child_lanes = child_lanes;
}
