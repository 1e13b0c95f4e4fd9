use std::cell::{Cell, RefCell};

use fiber_core::{Lanes, Resource};
use fiber_testing::prelude::*;

thread_local! {
    static SET_COUNT: RefCell<Option<Dispatch<i32>>> = const { RefCell::new(None) };
    static SET_GATE: RefCell<Option<Dispatch<i32>>> = const { RefCell::new(None) };
    static GATED_RENDERS: Cell<usize> = const { Cell::new(0) };
}

fn counter(hooks: &mut Hooks, _: &()) -> Render {
    let (count, set_count) = hooks.use_state(|| 0);
    SET_COUNT.with(|slot| *slot.borrow_mut() = Some(set_count));
    Ok(el("span").child(count.to_string()).into())
}

fn set_count(value: i32) {
    let set = SET_COUNT.with(|slot| slot.borrow().clone()).expect("counter rendered");
    set.set(value);
}

fn reader(hooks: &mut Hooks, resource: &Resource<String>) -> Render {
    let value = hooks.use_resource(resource)?;
    Ok(el("p").child(value).into())
}

/// Reads the resource only once its own state has been bumped.
fn gated(hooks: &mut Hooks, resource: &Resource<String>) -> Render {
    GATED_RENDERS.with(|renders| renders.set(renders.get() + 1));
    let (n, set_n) = hooks.use_state(|| 0);
    SET_GATE.with(|slot| *slot.borrow_mut() = Some(set_n));
    if n == 0 {
        return Ok(el("p").child("idle").into());
    }
    let value = hooks.use_resource(resource)?;
    Ok(el("p").child(format!("{value}:{n}")).into())
}

fn gated_renders() -> usize {
    GATED_RENDERS.with(Cell::get)
}

fn app(_: &mut Hooks, resource: &Resource<String>) -> Render {
    Ok(el("div")
        .child(component(counter, ()))
        .child(suspense(text("loading"), component(reader, resource.clone())))
        .into())
}

#[test]
fn fallback_then_primary_after_resolution() {
    let root = TestRoot::new();
    let resource = Resource::pending();
    root.render(component(app, resource.clone()));
    assert_eq!(root.html(), "<div><span>0</span>loading</div>");
    assert!(root.take_error().is_none());

    root.act_with(|| set_count(3));
    assert_eq!(root.html(), "<div><span>3</span>loading</div>");

    root.act_with(|| resource.resolve("ready".to_string()));
    assert_eq!(root.html(), "<div><span>3</span><p>ready</p></div>");
}

#[test]
fn resolution_retries_at_the_original_lane() {
    let root = TestRoot::new();
    let resource = Resource::pending();
    root.render(component(app, resource.clone()));

    resource.resolve("sync".to_string());
    // Root updates are sync, so the retry lands in the sync lane and is
    // flushed by a microtask rather than a scheduled task.
    assert!(root.root().pending_lanes().contains(Lanes::SYNC));
    root.flush_microtasks();
    assert_eq!(root.html(), "<div><span>0</span><p>sync</p></div>");
}

#[test]
fn suspending_again_hides_primary_content_without_unmounting() {
    let root = TestRoot::new();
    root.render(component(app, Resource::ready("first".to_string())));
    assert_eq!(root.html(), "<div><span>0</span><p>first</p></div>");
    root.act_with(|| set_count(5));

    let second = Resource::pending();
    root.render(component(app, second.clone()));
    let html = root.html();
    assert!(html.contains("<p hidden>first</p>"), "{html}");
    assert!(html.contains("loading"), "{html}");
    assert!(html.starts_with("<div><span>5</span>"), "{html}");

    root.act_with(|| second.resolve("second".to_string()));
    assert_eq!(root.html(), "<div><span>5</span><p>second</p></div>");
}

#[test]
fn suspending_without_a_boundary_keeps_the_previous_tree() {
    let root = TestRoot::new();
    root.render(el("em").child("old"));

    let resource = Resource::pending();
    root.render(component(reader, resource.clone()));
    assert_eq!(root.html(), "<em>old</em>");
    assert!(root.root().suspended_lanes().contains(Lanes::SYNC));
    assert!(root.take_error().is_none());

    root.act_with(|| resource.resolve("new".to_string()));
    assert_eq!(root.html(), "<p>new</p>");
    assert!(root.root().suspended_lanes().is_empty());
}

#[test]
fn rejected_resource_fails_the_pass() {
    let root = TestRoot::new();
    let resource = Resource::pending();
    root.render(component(app, resource.clone()));
    root.act_with(|| resource.reject("offline"));

    let err = root.take_error().expect("rejection surfaces");
    assert!(format!("{:#}", anyhow::Error::from(err)).contains("offline"));
    assert_eq!(root.html(), "<div><span>0</span>loading</div>");
}

#[test]
fn state_update_that_suspends_waits_for_the_ping() {
    let root = TestRoot::new();
    let resource = Resource::pending();
    root.render(el("div").child(suspense(text("loading"), component(gated, resource.clone()))));
    assert_eq!(root.html(), "<div><p>idle</p></div>");
    assert_eq!(gated_renders(), 1);

    let tasks = root.scheduler().tasks_run();
    let set = SET_GATE.with(|slot| slot.borrow().clone()).expect("gated rendered");
    root.act_with(|| set.set(1));

    assert_eq!(root.html(), "<div><p hidden>idle</p>loading</div>");
    assert_eq!(gated_renders(), 2, "one suspended pass, no retries before the ping");
    assert!(root.scheduler().tasks_run() - tasks <= 2, "render task plus at most a passive flush");
    assert!(!root.scheduler().has_pending());
    assert!(root.root().suspended_lanes().contains(Lanes::DEFAULT));

    root.act_with(|| resource.resolve("ready".to_string()));
    assert_eq!(root.html(), "<div><p>ready:1</p></div>");
    assert_eq!(gated_renders(), 3);
    assert!(root.root().pending_lanes().is_empty());
}
