use std::cell::RefCell;

use fiber_core::{FiberArena, FiberId, HostOp, WorkTag};
use fiber_testing::prelude::*;

thread_local! {
    static SET_LABEL: RefCell<Option<Dispatch<String>>> = const { RefCell::new(None) };
}

fn label(hooks: &mut Hooks, _: &()) -> Render {
    let (value, set_value) = hooks.use_state(|| "1".to_string());
    SET_LABEL.with(|slot| *slot.borrow_mut() = Some(set_value));
    Ok(el("span").child(value).into())
}

fn set_label(value: &str) {
    let set = SET_LABEL.with(|slot| slot.borrow().clone()).expect("label rendered");
    set.set(value.to_string());
}

fn find(arena: &FiberArena, from: FiberId, tag: WorkTag) -> Option<FiberId> {
    let mut stack = vec![from];
    while let Some(id) = stack.pop() {
        if arena.get(id).map(|fiber| fiber.tag()) == Some(tag) {
            return Some(id);
        }
        let mut children = arena.children(id);
        children.reverse();
        stack.extend(children);
    }
    None
}

#[test]
fn text_child_update_reuses_the_fiber() {
    let root = TestRoot::new();
    root.render(component(label, ()));
    assert_eq!(root.html(), "<span>1</span>");
    let text_node = root.host().children(root.host().children(root.container())[0])[0];
    root.take_ops();

    root.act_with(|| set_label("2"));
    assert_eq!(root.html(), "<span>2</span>");
    let ops = root.take_ops();
    assert!(ops.contains(&HostOp::TextUpdate {
        id: text_node,
        text: "2".to_string()
    }));
    assert!(!ops.iter().any(|op| matches!(
        op,
        HostOp::CreateText { .. }
            | HostOp::CreateInstance { .. }
            | HostOp::Remove { .. }
            | HostOp::Append { .. }
            | HostOp::InsertBefore { .. }
    )));
}

#[test]
fn alternate_pairs_stay_stable_across_renders() {
    let root = TestRoot::new();
    root.render(component(label, ()));
    root.act_with(|| set_label("2"));

    let (first, first_alternate) = root.root().inspect(|arena, current| {
        let text = find(arena, current, WorkTag::HostText).expect("text fiber");
        (text, arena.get(text).and_then(|fiber| fiber.alternate()))
    });
    let first_alternate = first_alternate.expect("text fiber has an alternate after an update");

    for value in ["3", "4", "5"] {
        root.act_with(|| set_label(value));
        root.root().inspect(|arena, current| {
            let text = find(arena, current, WorkTag::HostText).expect("text fiber");
            assert!(text == first || text == first_alternate, "pair member reused");
            let alternate = arena.get(text).and_then(|fiber| fiber.alternate());
            let expected = if text == first { first_alternate } else { first };
            assert_eq!(alternate, Some(expected));
            assert_eq!(arena.get(expected).and_then(|fiber| fiber.alternate()), Some(text));
        });
    }
    assert_eq!(root.html(), "<span>5</span>");
}

#[test]
fn host_root_alternates_point_at_each_other() {
    let root = TestRoot::new();
    root.render(el("div"));
    root.render(el("div").attr("class", "x"));
    root.root().inspect(|arena, current| {
        let alternate = arena.get(current).and_then(|fiber| fiber.alternate()).expect("root alternate");
        assert_eq!(arena.get(alternate).and_then(|fiber| fiber.alternate()), Some(current));
        assert_eq!(arena.get(current).map(|fiber| fiber.tag()), Some(WorkTag::HostRoot));
    });
    assert_eq!(root.html(), "<div class=\"x\"></div>");
}
