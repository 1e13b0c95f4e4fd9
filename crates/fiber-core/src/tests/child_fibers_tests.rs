use super::*;
use crate::element::{el, text};
use crate::fiber::create_fiber_from_element;

fn keyed(keys: &[&str]) -> Node {
    Node::List(
        keys.iter()
            .map(|key| Node::from(el("li").key(*key)))
            .collect::<Vec<_>>()
            .into(),
    )
}

/// Mounts `children` under a fresh parent and returns a work-in-progress
/// twin of that parent ready for an update diff.
fn mounted(arena: &mut FiberArena, children: &Node) -> (FiberId, FiberId) {
    let parent = create_fiber_from_element(arena, &el("ul").build());
    let first = ChildReconciler::new(false).reconcile_child_fibers(arena, parent, None, children);
    arena[parent].child = first;
    let wip = create_work_in_progress(arena, parent, Props::Empty);
    (parent, wip)
}

fn keys_of(arena: &FiberArena, parent: FiberId) -> Vec<String> {
    arena
        .children(parent)
        .into_iter()
        .map(|id| arena[id].key().unwrap_or("-").to_string())
        .collect()
}

fn placed(arena: &FiberArena, parent: FiberId) -> Vec<String> {
    arena
        .children(parent)
        .into_iter()
        .filter(|id| arena[*id].flags.contains(FiberFlags::PLACEMENT))
        .map(|id| arena[id].key().unwrap_or("-").to_string())
        .collect()
}

fn reconcile_update(arena: &mut FiberArena, parent: FiberId, wip: FiberId, children: &Node) {
    let current = arena[parent].child;
    let first = ChildReconciler::new(true).reconcile_child_fibers(arena, wip, current, children);
    arena[wip].child = first;
}

#[test]
fn mount_does_not_flag_children() {
    let mut arena = FiberArena::new();
    let (parent, _) = mounted(&mut arena, &keyed(&["a", "b"]));
    assert_eq!(keys_of(&arena, parent), ["a", "b"]);
    assert!(placed(&arena, parent).is_empty());
}

#[test]
fn moving_last_to_front_flags_the_rest() {
    let mut arena = FiberArena::new();
    let (parent, wip) = mounted(&mut arena, &keyed(&["a", "b", "c"]));
    reconcile_update(&mut arena, parent, wip, &keyed(&["c", "a", "b"]));

    assert_eq!(keys_of(&arena, wip), ["c", "a", "b"]);
    assert_eq!(placed(&arena, wip), ["a", "b"]);
    assert!(arena[wip].deletions.is_empty());
}

#[test]
fn moving_first_to_back_flags_only_it() {
    let mut arena = FiberArena::new();
    let (parent, wip) = mounted(&mut arena, &keyed(&["a", "b", "c"]));
    reconcile_update(&mut arena, parent, wip, &keyed(&["b", "c", "a"]));
    assert_eq!(placed(&arena, wip), ["a"]);
}

#[test]
fn reused_children_are_alternates_of_current() {
    let mut arena = FiberArena::new();
    let (parent, wip) = mounted(&mut arena, &keyed(&["a", "b"]));
    let old: Vec<FiberId> = arena.children(parent);
    reconcile_update(&mut arena, parent, wip, &keyed(&["b", "a"]));
    let new: Vec<FiberId> = arena.children(wip);
    assert_eq!(arena[new[0]].alternate, Some(old[1]));
    assert_eq!(arena[new[1]].alternate, Some(old[0]));
    assert_eq!(arena[new[0]].index(), 0);
    assert_eq!(arena[new[1]].index(), 1);
}

#[test]
fn removed_keys_become_deletions_in_order() {
    let mut arena = FiberArena::new();
    let (parent, wip) = mounted(&mut arena, &keyed(&["a", "b", "c", "d"]));
    let old = arena.children(parent);
    reconcile_update(&mut arena, parent, wip, &keyed(&["c"]));

    assert_eq!(arena[wip].deletions, vec![old[0], old[1], old[3]]);
    assert!(arena[wip].flags.contains(FiberFlags::CHILD_DELETION));
    assert!(placed(&arena, wip).is_empty());
}

#[test]
fn type_change_under_same_key_replaces() {
    let mut arena = FiberArena::new();
    let (parent, wip) = mounted(&mut arena, &Node::from(el("li").key("x")));
    let old = arena[parent].child.expect("child");
    reconcile_update(&mut arena, parent, wip, &Node::from(el("p").key("x")));

    let new = arena[wip].child.expect("child");
    assert_ne!(new, old);
    assert!(arena[new].alternate.is_none());
    assert!(arena[new].flags.contains(FiberFlags::PLACEMENT));
    assert_eq!(arena[wip].deletions, vec![old]);
}

#[test]
fn text_child_is_reused() {
    let mut arena = FiberArena::new();
    let (parent, wip) = mounted(&mut arena, &text("one"));
    let old = arena[parent].child.expect("child");
    reconcile_update(&mut arena, parent, wip, &text("two"));

    let new = arena[wip].child.expect("child");
    assert_eq!(arena[new].alternate, Some(old));
    assert_eq!(arena[new].pending_props.text().map(|t| t.to_string()), Some("two".into()));
    assert!(arena[wip].deletions.is_empty());
}

#[test]
fn unkeyed_top_level_fragment_is_unwrapped() {
    let mut arena = FiberArena::new();
    let children = Node::from(crate::element::fragment(vec![text("a"), text("b")]));
    let (parent, _) = mounted(&mut arena, &children);
    let tags: Vec<WorkTag> = arena.children(parent).into_iter().map(|id| arena[id].tag()).collect();
    assert_eq!(tags, [WorkTag::HostText, WorkTag::HostText]);
}

#[test]
fn nested_list_becomes_fragment_fiber() {
    let mut arena = FiberArena::new();
    let children = Node::List(vec![text("head"), keyed(&["a", "b"])].into());
    let (parent, wip) = mounted(&mut arena, &children);
    let tags: Vec<WorkTag> = arena.children(parent).into_iter().map(|id| arena[id].tag()).collect();
    assert_eq!(tags, [WorkTag::HostText, WorkTag::Fragment]);

    let old_fragment = arena.children(parent)[1];
    reconcile_update(&mut arena, parent, wip, &Node::List(vec![text("head"), keyed(&["b"])].into()));
    let new_fragment = arena.children(wip)[1];
    assert_eq!(arena[new_fragment].alternate, Some(old_fragment));
}

#[test]
fn empty_child_deletes_everything() {
    let mut arena = FiberArena::new();
    let (parent, wip) = mounted(&mut arena, &keyed(&["a", "b"]));
    reconcile_update(&mut arena, parent, wip, &Node::Empty);
    assert!(arena[wip].child.is_none());
    assert_eq!(arena[wip].deletions.len(), 2);
}
