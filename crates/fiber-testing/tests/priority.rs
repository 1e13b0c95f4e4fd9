use std::cell::RefCell;

use fiber_core::{Lanes, PriorityLevel, StartTransition};
use fiber_testing::prelude::*;

thread_local! {
    static SETTERS: RefCell<Option<(Dispatch<u32>, Dispatch<u32>)>> = const { RefCell::new(None) };
    static TRANSITION: RefCell<Option<StartTransition>> = const { RefCell::new(None) };
}

fn setters() -> (Dispatch<u32>, Dispatch<u32>) {
    SETTERS.with(|slot| slot.borrow().clone()).expect("panel rendered")
}

fn leaf(_: &mut Hooks, label: &String) -> Render {
    Ok(el("i").child(label.clone()).into())
}

/// Renders enough fibers that a one-unit yield budget stops mid-tree.
fn panel(hooks: &mut Hooks, _: &()) -> Render {
    let (urgent, set_urgent) = hooks.use_state(|| 0u32);
    let (background, set_background) = hooks.use_state(|| 0u32);
    SETTERS.with(|slot| *slot.borrow_mut() = Some((set_urgent, set_background)));
    Ok(el("section")
        .child(component(leaf, format!("u{urgent}")))
        .child(component(leaf, format!("b{background}")))
        .into())
}

#[test]
fn urgent_update_supersedes_in_flight_render() {
    let root = TestRoot::new();
    root.render(component(panel, ()));
    assert_eq!(root.html(), "<section><i>u0</i><i>b0</i></section>");

    root.scheduler().set_yield_budget(Some(1));
    let (set_urgent, set_background) = setters();
    set_background.set(1);
    assert_eq!(root.scheduler().pending_priorities(), [PriorityLevel::Normal]);

    // Start the default-lane render and let it yield part way.
    assert!(root.scheduler().run_next());
    assert_eq!(root.scheduler().pending_count(), 1, "render continuation queued");
    assert_eq!(root.html(), "<section><i>u0</i><i>b0</i></section>");

    root.run_with_priority(PriorityLevel::UserBlocking, || set_urgent.set(1));
    assert_eq!(root.scheduler().pending_priorities(), [PriorityLevel::UserBlocking]);

    root.scheduler().set_yield_budget(None);
    assert!(root.scheduler().run_next());
    assert_eq!(root.html(), "<section><i>u1</i><i>b0</i></section>");
    assert!(root.root().pending_lanes().contains(Lanes::DEFAULT));

    root.act();
    assert_eq!(root.html(), "<section><i>u1</i><i>b1</i></section>");
    assert!(root.root().pending_lanes().is_empty());
}

#[test]
fn yielding_render_resumes_where_it_stopped() {
    let root = TestRoot::new();
    root.render(component(panel, ()));
    root.scheduler().set_yield_budget(Some(1));

    let (_, set_background) = setters();
    set_background.set(2);
    let before = root.scheduler().tasks_run();
    root.act();
    assert!(root.scheduler().tasks_run() - before > 1, "render was split over several tasks");
    assert_eq!(root.html(), "<section><i>u0</i><i>b2</i></section>");
}

#[test]
fn timed_out_tasks_render_without_yielding() {
    let root = TestRoot::new();
    root.render(component(panel, ()));
    root.scheduler().set_yield_budget(Some(0));
    root.scheduler().set_time_out_tasks(true);

    let (_, set_background) = setters();
    set_background.set(4);
    assert!(root.scheduler().run_next());
    assert_eq!(root.html(), "<section><i>u0</i><i>b4</i></section>");
}

fn search(hooks: &mut Hooks, _: &()) -> Render {
    let (query, set_query) = hooks.use_state(|| 0u32);
    let (pending, start) = hooks.use_transition();
    SETTERS.with(|slot| *slot.borrow_mut() = Some((set_query.clone(), set_query)));
    TRANSITION.with(|slot| *slot.borrow_mut() = Some(start));
    Ok(text(format!("{}:{query}", if pending { "pending" } else { "idle" })))
}

#[test]
fn transition_shows_pending_before_the_deferred_value() {
    let root = TestRoot::new();
    root.render(component(search, ()));
    assert_eq!(root.html(), "idle:0");

    let start = TRANSITION.with(|slot| slot.borrow().clone()).expect("search rendered");
    let (set_query, _) = setters();
    start.start(|| set_query.set(9));
    assert!(root.root().pending_lanes().contains(Lanes::TRANSITION));

    // The pending flag renders in the default lane first.
    assert!(root.scheduler().run_next());
    assert_eq!(root.html(), "pending:0");

    root.act();
    assert_eq!(root.html(), "idle:9");
}
