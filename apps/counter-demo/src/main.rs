use std::cell::RefCell;

use anyhow::Context as _;
use fiber_core::prelude::*;
use fiber_core::{create_context, Context, FiberRoot, MemoryHost, PriorityLevel, StartTransition, TaskScheduler};
use fiber_runtime_std::StdRuntime;

thread_local! {
    static CONTROLS: RefCell<Option<Controls>> = const { RefCell::new(None) };
    static THEME: Context<&'static str> = create_context("light");
}

/// Handles captured from the last render, standing in for UI events.
#[derive(Clone)]
struct Controls {
    set_count: Dispatch<i32>,
    set_order: Dispatch<Vec<&'static str>>,
    start_transition: StartTransition,
}

fn theme() -> Context<&'static str> {
    THEME.with(Clone::clone)
}

fn controls() -> anyhow::Result<Controls> {
    CONTROLS
        .with(|slot| slot.borrow().clone())
        .context("app has not rendered yet")
}

fn fruit(hooks: &mut Hooks, name: &&'static str) -> Render {
    let theme = hooks.use_context(&theme());
    Ok(el("li").attr("class", theme).child(*name).into())
}

fn details(hooks: &mut Hooks, resource: &Resource<String>) -> Render {
    let body = hooks.use_resource(resource)?;
    Ok(el("p").child(body).into())
}

fn app(hooks: &mut Hooks, resource: &Resource<String>) -> Render {
    let (count, set_count) = hooks.use_state(|| 0);
    let (order, set_order) = hooks.use_state(|| vec!["apple", "banana", "cherry"]);
    let (pending, start_transition) = hooks.use_transition();
    CONTROLS.with(|slot| {
        *slot.borrow_mut() = Some(Controls {
            set_count,
            set_order,
            start_transition,
        })
    });

    hooks.use_effect(
        move || {
            log::info!("count is now {count}");
            Cleanup::new(move || log::debug!("leaving count {count}"))
        },
        deps![count],
    );

    let list = el("ul").children(order.iter().map(|name| component(fruit, *name).with_key(*name)));
    Ok(el("main")
        .attr("data-pending", pending.to_string())
        .child(el("h1").child(format!("Count: {count}")))
        .child(theme().provider("dark", list))
        .child(suspense(el("p").child("Loading details..."), component(details, resource.clone())))
        .into())
}

fn pump(host: &MemoryHost, runtime: &StdRuntime) {
    while host.has_pending_microtasks() || runtime.has_pending_tasks() {
        host.run_microtasks();
        runtime.run_until_idle();
    }
}

fn report(step: &str, root: &FiberRoot, host: &MemoryHost) -> anyhow::Result<()> {
    if let Some(err) = root.take_error() {
        return Err(err).with_context(|| format!("render failed during `{step}`"));
    }
    println!("[{step}]");
    println!("{}", host.serialize(root.container()));
    println!();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("=== Fiber Counter Example ===");
    println!("Each step dispatches updates and prints the committed host tree:");
    println!("  - State updates re-render only what changed");
    println!("  - Keyed list reordering moves nodes instead of recreating them");
    println!("  - Suspense shows a fallback until data arrives");
    println!("  - Urgent updates render ahead of transitions");
    println!();

    let runtime = StdRuntime::new();
    let host = MemoryHost::new();
    let container = host.create_container();
    let root = runtime.create_root(host.clone(), container);
    let resource = Resource::pending();

    root.update_container(component(app, resource.clone()));
    pump(&host, &runtime);
    report("mount", &root, &host)?;

    controls()?.set_count.update(|count| count + 1);
    pump(&host, &runtime);
    report("increment", &root, &host)?;

    host.take_ops();
    controls()?.set_order.set(vec!["cherry", "apple", "banana"]);
    pump(&host, &runtime);
    let moves = host.take_ops().len();
    report("reorder", &root, &host)?;
    log::info!("reorder committed {moves} host operations");

    resource.resolve("Fresh fruit, delivered daily.".to_string());
    pump(&host, &runtime);
    report("data arrived", &root, &host)?;

    let controls = controls()?;
    controls
        .start_transition
        .start(|| controls.set_order.set(vec!["banana", "cherry", "apple"]));
    runtime
        .scheduler()
        .run_with_priority(PriorityLevel::UserBlocking, &mut || controls.set_count.set(10));
    pump(&host, &runtime);
    report("urgent count with background reorder", &root, &host)?;

    root.unmount();
    pump(&host, &runtime);
    report("unmount", &root, &host)?;
    Ok(())
}
