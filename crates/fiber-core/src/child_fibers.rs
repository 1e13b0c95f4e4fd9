//! Child reconciliation: diffs a fiber's current children against the new
//! child value and produces the work-in-progress child list.

use std::rc::Rc;

use crate::collections::map::{HashMap, HashSet};
use crate::element::{Element, ElementType, Key, Node, Props};
use crate::fiber::{
    create_fiber_from_element, create_fiber_from_fragment, create_fiber_from_text,
    create_work_in_progress, FiberArena, FiberId, WorkTag,
};
use crate::flags::FiberFlags;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ChildKey {
    Explicit(Key),
    Index(usize),
}

/// Child diff. With `track_effects` off (first mount of a subtree) no
/// placement or deletion flags are recorded; the subtree is inserted as a
/// whole by its mounted ancestor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChildReconciler {
    track_effects: bool,
}

impl ChildReconciler {
    pub(crate) fn new(track_effects: bool) -> Self {
        Self { track_effects }
    }

    pub(crate) fn reconcile_child_fibers(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        new_child: &Node,
    ) -> Option<FiberId> {
        let unwrapped;
        let new_child = match new_child {
            Node::Element(element) if is_unkeyed_fragment(element) => match &element.props {
                Props::Fragment(items) => {
                    unwrapped = Node::List(Rc::clone(items));
                    &unwrapped
                }
                _ => new_child,
            },
            other => other,
        };

        match new_child {
            Node::Element(element) => {
                let fiber = self.reconcile_single_element(arena, return_fiber, current_first_child, element);
                Some(self.place_single_child(arena, fiber))
            }
            Node::Text(content) => {
                let fiber = self.reconcile_single_text_node(arena, return_fiber, current_first_child, content);
                Some(self.place_single_child(arena, fiber))
            }
            Node::List(items) => self.reconcile_children_array(arena, return_fiber, current_first_child, items),
            Node::Empty => {
                self.delete_remaining_children(arena, return_fiber, current_first_child);
                None
            }
        }
    }

    fn reconcile_single_element(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        let mut current = current_first_child;
        while let Some(child) = current {
            if arena[child].key != element.key {
                self.delete_child(arena, return_fiber, child);
                current = arena[child].sibling;
                continue;
            }
            if arena[child].element_type.as_ref() == Some(&element.ty) {
                let existing = use_fiber(arena, child, element.props.clone());
                arena[existing].return_fiber = Some(return_fiber);
                arena[existing].node_ref = element.node_ref.clone();
                let rest = arena[child].sibling;
                self.delete_remaining_children(arena, return_fiber, rest);
                return existing;
            }
            self.delete_remaining_children(arena, return_fiber, Some(child));
            break;
        }

        let fiber = create_fiber_from_element(arena, element);
        arena[fiber].return_fiber = Some(return_fiber);
        fiber
    }

    fn reconcile_single_text_node(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        content: &Rc<str>,
    ) -> FiberId {
        if let Some(child) = current_first_child {
            if arena[child].tag == WorkTag::HostText {
                let existing = use_fiber(arena, child, Props::Text(Rc::clone(content)));
                arena[existing].return_fiber = Some(return_fiber);
                let rest = arena[child].sibling;
                self.delete_remaining_children(arena, return_fiber, rest);
                return existing;
            }
        }
        self.delete_remaining_children(arena, return_fiber, current_first_child);
        let fiber = create_fiber_from_text(arena, Rc::clone(content));
        arena[fiber].return_fiber = Some(return_fiber);
        fiber
    }

    fn place_single_child(&self, arena: &mut FiberArena, fiber: FiberId) -> FiberId {
        if self.track_effects && arena[fiber].alternate.is_none() {
            arena[fiber].flags |= FiberFlags::PLACEMENT;
        }
        fiber
    }

    /// Keyed list diff. Reused children are matched by key (or position when
    /// unkeyed); a reused child whose old index is behind the furthest old
    /// index kept so far is moved, everything else stays in place.
    fn reconcile_children_array(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        items: &[Node],
    ) -> Option<FiberId> {
        let mut existing: HashMap<ChildKey, FiberId> = HashMap::default();
        let mut current = current_first_child;
        while let Some(child) = current {
            let next = arena[child].sibling;
            let key = child_key(arena[child].key.as_ref(), arena[child].index);
            if existing.contains_key(&key) {
                // Only the first fiber per key can be matched; later ones go now.
                log::warn!("duplicate child key {key:?} among current children");
                self.delete_child(arena, return_fiber, child);
            } else {
                existing.insert(key, child);
            }
            current = next;
        }

        let mut seen: HashSet<Key> = HashSet::default();
        let mut last_placed_index = 0;
        let mut first_new: Option<FiberId> = None;
        let mut last_new: Option<FiberId> = None;

        for (index, item) in items.iter().enumerate() {
            if let Node::Element(Element { key: Some(key), .. }) = item {
                if !seen.insert(Rc::clone(key)) {
                    log::warn!("encountered two children with the same key `{key}`");
                }
            }
            let Some(new_fiber) = self.update_from_map(arena, &mut existing, index, item) else {
                continue;
            };
            arena[new_fiber].index = index;
            arena[new_fiber].return_fiber = Some(return_fiber);

            match last_new {
                Some(previous) => arena[previous].sibling = Some(new_fiber),
                None => first_new = Some(new_fiber),
            }
            last_new = Some(new_fiber);

            if !self.track_effects {
                continue;
            }
            match arena[new_fiber].alternate {
                Some(current) => {
                    let old_index = arena[current].index;
                    if old_index < last_placed_index {
                        arena[new_fiber].flags |= FiberFlags::PLACEMENT;
                    } else {
                        last_placed_index = old_index;
                    }
                }
                None => arena[new_fiber].flags |= FiberFlags::PLACEMENT,
            }
        }

        if let Some(last) = last_new {
            arena[last].sibling = None;
        }

        // Anything still in the map was not reused; delete in sibling order.
        let mut current = current_first_child;
        while let Some(child) = current {
            let key = child_key(arena[child].key.as_ref(), arena[child].index);
            if existing.get(&key) == Some(&child) {
                self.delete_child(arena, return_fiber, child);
            }
            current = arena[child].sibling;
        }

        first_new
    }

    fn update_from_map(
        &self,
        arena: &mut FiberArena,
        existing: &mut HashMap<ChildKey, FiberId>,
        index: usize,
        item: &Node,
    ) -> Option<FiberId> {
        match item {
            Node::Empty => None,
            Node::Text(content) => {
                let key = ChildKey::Index(index);
                if let Some(&before) = existing.get(&key) {
                    if arena[before].tag == WorkTag::HostText {
                        existing.remove(&key);
                        return Some(use_fiber(arena, before, Props::Text(Rc::clone(content))));
                    }
                }
                Some(create_fiber_from_text(arena, Rc::clone(content)))
            }
            Node::Element(element) => {
                let key = child_key(element.key.as_ref(), index);
                if let Some(&before) = existing.get(&key) {
                    if arena[before].element_type.as_ref() == Some(&element.ty) {
                        existing.remove(&key);
                        let fiber = use_fiber(arena, before, element.props.clone());
                        arena[fiber].node_ref = element.node_ref.clone();
                        return Some(fiber);
                    }
                }
                Some(create_fiber_from_element(arena, element))
            }
            Node::List(items) => {
                let key = ChildKey::Index(index);
                let before = existing.get(&key).copied();
                Some(update_fragment(arena, before, Rc::clone(items), existing, key))
            }
        }
    }

    fn delete_child(&self, arena: &mut FiberArena, return_fiber: FiberId, child: FiberId) {
        if !self.track_effects {
            return;
        }
        let parent = &mut arena[return_fiber];
        parent.deletions.push(child);
        parent.flags |= FiberFlags::CHILD_DELETION;
    }

    fn delete_remaining_children(&self, arena: &mut FiberArena, return_fiber: FiberId, first: Option<FiberId>) {
        if !self.track_effects {
            return;
        }
        let mut current = first;
        while let Some(child) = current {
            self.delete_child(arena, return_fiber, child);
            current = arena[child].sibling;
        }
    }
}

fn is_unkeyed_fragment(element: &Element) -> bool {
    element.ty == ElementType::Fragment && element.key.is_none()
}

fn child_key(key: Option<&Key>, index: usize) -> ChildKey {
    match key {
        Some(key) => ChildKey::Explicit(Rc::clone(key)),
        None => ChildKey::Index(index),
    }
}

/// Work-in-progress copy of `fiber` as the only child so far.
fn use_fiber(arena: &mut FiberArena, fiber: FiberId, props: Props) -> FiberId {
    let clone = create_work_in_progress(arena, fiber, props);
    arena[clone].index = 0;
    arena[clone].sibling = None;
    clone
}

/// Reuses the unkeyed fragment at a list position, or creates one.
fn update_fragment(
    arena: &mut FiberArena,
    current: Option<FiberId>,
    items: Rc<[Node]>,
    existing: &mut HashMap<ChildKey, FiberId>,
    key: ChildKey,
) -> FiberId {
    match current {
        Some(current) if arena[current].tag == WorkTag::Fragment && arena[current].key.is_none() => {
            existing.remove(&key);
            use_fiber(arena, current, Props::Fragment(items))
        }
        _ => create_fiber_from_fragment(arena, items, None),
    }
}

/// Reconciles `children` under `wip`, diffing against the current tree when
/// `wip` has one.
pub(crate) fn reconcile_children(arena: &mut FiberArena, wip: FiberId, children: &Node) {
    let current = arena[wip].alternate.filter(|id| arena.contains(*id));
    let current_child = current.and_then(|current| arena[current].child);
    let reconciler = ChildReconciler::new(current.is_some());
    let child = reconciler.reconcile_child_fibers(arena, wip, current_child, children);
    arena[wip].child = child;
}

#[cfg(test)]
#[path = "tests/child_fibers_tests.rs"]
mod tests;
