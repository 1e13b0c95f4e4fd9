use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fiber_core::{
    CallbackHandle, Continuation, FiberRoot, HostOp, InstanceId, MemoryHost, Node, PriorityLevel, ReconcilerError,
    RootOptions, SchedulerTask, TaskScheduler,
};

/// Upper bound on drive iterations before `act` gives up on a root that
/// keeps rescheduling itself.
const MAX_ACT_ITERATIONS: usize = 10_000;

struct QueuedTask {
    handle: CallbackHandle,
    priority: PriorityLevel,
    callback: SchedulerTask,
}

/// Deterministic scheduler for tests.
///
/// Tasks only run when the test asks for them. Higher priorities run first,
/// ties run in scheduling order. The yield budget controls how many
/// `should_yield` polls a task gets before it is told to yield, which lets
/// a test stop a concurrent render part way through.
#[derive(Default)]
pub struct ScriptedScheduler {
    queue: RefCell<Vec<QueuedTask>>,
    next_handle: Cell<u64>,
    current_priority: Cell<Option<PriorityLevel>>,
    yield_budget: Cell<Option<usize>>,
    remaining: Cell<usize>,
    time_out_tasks: Cell<bool>,
    ran: Cell<usize>,
}

impl ScriptedScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every task gets `units` non-yielding polls; `None` never yields.
    pub fn set_yield_budget(&self, units: Option<usize>) {
        self.yield_budget.set(units);
    }

    /// Runs subsequent tasks as if they had expired.
    pub fn set_time_out_tasks(&self, timed_out: bool) {
        self.time_out_tasks.set(timed_out);
    }

    pub fn pending_count(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    /// Priorities of queued tasks in the order they would run.
    pub fn pending_priorities(&self) -> Vec<PriorityLevel> {
        let mut priorities: Vec<_> = self.queue.borrow().iter().map(|task| task.priority).collect();
        priorities.sort();
        priorities
    }

    /// Number of task invocations so far, continuations included.
    pub fn tasks_run(&self) -> usize {
        self.ran.get()
    }

    /// Runs the most urgent queued task. Returns `false` when idle.
    pub fn run_next(&self) -> bool {
        let next = {
            let mut queue = self.queue.borrow_mut();
            let index = queue
                .iter()
                .enumerate()
                .min_by_key(|(index, task)| (task.priority, *index))
                .map(|(index, _)| index);
            index.map(|index| queue.remove(index))
        };
        let Some(task) = next else {
            return false;
        };
        self.remaining.set(self.yield_budget.get().unwrap_or(usize::MAX));
        self.ran.set(self.ran.get() + 1);
        let previous = self.current_priority.replace(Some(task.priority));
        let continuation = (task.callback)(self.time_out_tasks.get());
        self.current_priority.set(previous);
        if let Continuation::Continue(callback) = continuation {
            // Continuations run ahead of anything scheduled after them.
            self.queue.borrow_mut().insert(
                0,
                QueuedTask {
                    handle: task.handle,
                    priority: task.priority,
                    callback,
                },
            );
        }
        true
    }

    /// Runs tasks until none are queued. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl TaskScheduler for ScriptedScheduler {
    fn schedule_callback(&self, priority: PriorityLevel, task: SchedulerTask) -> CallbackHandle {
        let handle = CallbackHandle(self.next_handle.get());
        self.next_handle.set(handle.0 + 1);
        self.queue.borrow_mut().push(QueuedTask {
            handle,
            priority,
            callback: task,
        });
        handle
    }

    fn cancel_callback(&self, handle: CallbackHandle) {
        self.queue.borrow_mut().retain(|task| task.handle != handle);
    }

    fn should_yield(&self) -> bool {
        let remaining = self.remaining.get();
        if remaining == 0 {
            return true;
        }
        self.remaining.set(remaining - 1);
        false
    }

    fn current_priority_level(&self) -> PriorityLevel {
        self.current_priority.get().unwrap_or_default()
    }

    fn run_with_priority(&self, priority: PriorityLevel, f: &mut dyn FnMut()) {
        let previous = self.current_priority.replace(Some(priority));
        f();
        self.current_priority.set(previous);
    }
}

/// Headless harness mounting one root into a [`MemoryHost`].
///
/// `TestRoot` owns the host, a [`ScriptedScheduler`] and the root, and
/// exposes helpers for driving work until idle and inspecting the output.
pub struct TestRoot {
    host: MemoryHost,
    scheduler: Rc<ScriptedScheduler>,
    root: FiberRoot,
    container: InstanceId,
}

impl TestRoot {
    pub fn new() -> Self {
        Self::with_options(RootOptions::default())
    }

    pub fn with_options(options: RootOptions) -> Self {
        let host = MemoryHost::new();
        let container = host.create_container();
        let scheduler = Rc::new(ScriptedScheduler::new());
        let root = FiberRoot::create_container_with_options(host.clone(), container, scheduler.clone(), options);
        Self {
            host,
            scheduler,
            root,
            container,
        }
    }

    /// Replaces the rendered tree and drives it to completion.
    pub fn render(&self, node: impl Into<Node>) {
        self.root.update_container(node);
        self.act();
    }

    /// Runs `f`, then drives all resulting work until idle.
    pub fn act_with<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = f();
        self.act();
        result
    }

    /// Dispatches from inside `f` at `priority` without draining.
    pub fn run_with_priority(&self, priority: PriorityLevel, f: impl FnOnce()) {
        let mut f = Some(f);
        self.scheduler.run_with_priority(priority, &mut || {
            if let Some(f) = f.take() {
                f();
            }
        });
    }

    /// Alternates microtask flushes and scheduled tasks until both queues
    /// are empty.
    pub fn act(&self) {
        for _ in 0..MAX_ACT_ITERATIONS {
            let microtasks = self.host.run_microtasks();
            let ran_task = self.scheduler.run_next();
            if microtasks == 0 && !ran_task && !self.host.has_pending_microtasks() {
                return;
            }
        }
        log::error!("act gave up after {MAX_ACT_ITERATIONS} iterations; the root keeps rescheduling");
    }

    /// Runs queued microtasks only, leaving scheduled tasks alone.
    pub fn flush_microtasks(&self) -> usize {
        self.host.run_microtasks()
    }

    /// Markup of everything rendered into the container.
    pub fn html(&self) -> String {
        self.host.serialize(self.container)
    }

    pub fn ops(&self) -> Vec<HostOp> {
        self.host.ops()
    }

    pub fn take_ops(&self) -> Vec<HostOp> {
        self.host.take_ops()
    }

    pub fn take_error(&self) -> Option<ReconcilerError> {
        self.root.take_error()
    }

    pub fn root(&self) -> &FiberRoot {
        &self.root
    }

    pub fn host(&self) -> &MemoryHost {
        &self.host
    }

    pub fn scheduler(&self) -> &ScriptedScheduler {
        &self.scheduler
    }

    pub fn container(&self) -> InstanceId {
        self.container
    }
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for tests that only need temporary access to a
/// `TestRoot`.
pub fn run_test_root<R>(f: impl FnOnce(&TestRoot) -> R) -> R {
    let root = TestRoot::new();
    f(&root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiber_core::{el, text};

    #[test]
    fn scripted_scheduler_orders_by_priority_then_fifo() {
        let scheduler = ScriptedScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (priority, name) in [
            (PriorityLevel::Low, "low"),
            (PriorityLevel::UserBlocking, "blocking"),
            (PriorityLevel::Low, "low 2"),
        ] {
            let log = Rc::clone(&log);
            scheduler.schedule_callback(
                priority,
                Box::new(move |_| {
                    log.borrow_mut().push(name);
                    Continuation::Done
                }),
            );
        }
        assert_eq!(scheduler.run_all(), 3);
        assert_eq!(*log.borrow(), ["blocking", "low", "low 2"]);
    }

    #[test]
    fn yield_budget_resets_per_task() {
        let scheduler = ScriptedScheduler::new();
        scheduler.set_yield_budget(Some(2));
        scheduler.schedule_callback(PriorityLevel::Normal, Box::new(|_| Continuation::Done));
        scheduler.run_next();
        let polls: Vec<bool> = (0..3).map(|_| scheduler.should_yield()).collect();
        assert_eq!(polls, [false, false, true]);
        scheduler.schedule_callback(PriorityLevel::Normal, Box::new(|_| Continuation::Done));
        scheduler.run_next();
        assert!(!scheduler.should_yield());
    }

    #[test]
    fn test_root_renders_and_records_ops() {
        run_test_root(|root| {
            root.render(el("p").child(text("hi")));
            assert_eq!(root.html(), "<p>hi</p>");
            assert!(root
                .take_ops()
                .iter()
                .any(|op| matches!(op, HostOp::CreateInstance { tag, .. } if tag == "p")));
            root.render(Node::Empty);
            assert_eq!(root.html(), "");
        });
    }
}
