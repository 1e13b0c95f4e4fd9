//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform
//! abstraction traits defined in `fiber-core`. Applications construct a
//! [`StdRuntime`], create roots through it, and pump
//! [`StdRuntime::run_until_idle`] from their event loop.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use fiber_core::{
    CallbackHandle, Clock, Continuation, FiberRoot, HostConfig, InstanceId, PriorityLevel, RootOptions,
    SchedulerTask, TaskScheduler,
};

/// Never expires.
pub const NO_TIMEOUT: i64 = i64::MAX;

/// Tuning knobs for [`StdScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Length of one time slice; `should_yield` turns true once a task ran
    /// this long.
    pub frame_interval_ms: u64,
    pub immediate_timeout_ms: i64,
    pub user_blocking_timeout_ms: i64,
    pub normal_timeout_ms: i64,
    pub low_timeout_ms: i64,
    pub idle_timeout_ms: i64,
}

impl SchedulerConfig {
    pub fn timeout_for(&self, priority: PriorityLevel) -> i64 {
        match priority {
            PriorityLevel::Immediate => self.immediate_timeout_ms,
            PriorityLevel::UserBlocking => self.user_blocking_timeout_ms,
            PriorityLevel::Normal => self.normal_timeout_ms,
            PriorityLevel::Low => self.low_timeout_ms,
            PriorityLevel::Idle => self.idle_timeout_ms,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 5,
            immediate_timeout_ms: -1,
            user_blocking_timeout_ms: 250,
            normal_timeout_ms: 5_000,
            low_timeout_ms: 10_000,
            idle_timeout_ms: NO_TIMEOUT,
        }
    }
}

struct ScheduledTask {
    handle: CallbackHandle,
    priority: PriorityLevel,
    expiration: i64,
    callback: SchedulerTask,
}

/// Single-threaded task queue ordered by expiration time.
///
/// Tasks scheduled at a more urgent priority get an earlier expiration and
/// therefore run first; ties keep insertion order. A task whose expiration
/// has passed runs with `did_timeout = true`.
pub struct StdScheduler<C: Clock = StdClock> {
    clock: C,
    origin: C::Instant,
    config: SchedulerConfig,
    queue: RefCell<Vec<ScheduledTask>>,
    next_handle: Cell<u64>,
    current_priority: Cell<PriorityLevel>,
    slice_start: Cell<Option<C::Instant>>,
    frame_waker: RefCell<Option<Rc<dyn Fn()>>>,
}

impl StdScheduler<StdClock> {
    pub fn new() -> Self {
        Self::with_clock(StdClock, SchedulerConfig::default())
    }
}

impl<C: Clock> StdScheduler<C> {
    pub fn with_clock(clock: C, config: SchedulerConfig) -> Self {
        let origin = clock.now();
        Self {
            clock,
            origin,
            config,
            queue: RefCell::new(Vec::new()),
            next_handle: Cell::new(1),
            current_priority: Cell::new(PriorityLevel::Normal),
            slice_start: Cell::new(None),
            frame_waker: RefCell::new(None),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Registers a waker invoked whenever a task is queued.
    pub fn set_frame_waker(&self, waker: impl Fn() + 'static) {
        *self.frame_waker.borrow_mut() = Some(Rc::new(waker));
    }

    /// Clears any registered frame waker.
    pub fn clear_frame_waker(&self) {
        *self.frame_waker.borrow_mut() = None;
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    pub fn pending_task_count(&self) -> usize {
        self.queue.borrow().len()
    }

    fn now_ms(&self) -> i64 {
        i64::try_from(self.clock.elapsed_millis(self.origin)).unwrap_or(i64::MAX)
    }

    fn wake(&self) {
        let waker = self.frame_waker.borrow().clone();
        if let Some(waker) = waker {
            waker();
        }
    }

    fn pop_next(&self) -> Option<ScheduledTask> {
        let mut queue = self.queue.borrow_mut();
        let index = queue
            .iter()
            .enumerate()
            .min_by_key(|(index, task)| (task.expiration, *index))
            .map(|(index, _)| index)?;
        Some(queue.remove(index))
    }

    /// Runs one task. Returns `false` when the queue was empty.
    pub fn run_next(&self) -> bool {
        let Some(task) = self.pop_next() else {
            return false;
        };
        let did_timeout = task.expiration <= self.now_ms();
        log::trace!(
            "running task {:?} at {:?} (timed out: {did_timeout})",
            task.handle,
            task.priority
        );
        let previous = self.current_priority.replace(task.priority);
        self.slice_start.set(Some(self.clock.now()));
        let continuation = (task.callback)(did_timeout);
        self.slice_start.set(None);
        self.current_priority.set(previous);
        if let Continuation::Continue(callback) = continuation {
            // Continuations keep their slot so the handle stays cancellable.
            self.queue.borrow_mut().push(ScheduledTask {
                handle: task.handle,
                priority: task.priority,
                expiration: task.expiration,
                callback,
            });
        }
        true
    }

    /// Runs tasks until the queue is empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Default for StdScheduler<StdClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> fmt::Debug for StdScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field("config", &self.config)
            .field("pending", &self.queue.borrow().len())
            .field("current_priority", &self.current_priority.get())
            .finish()
    }
}

impl<C: Clock> TaskScheduler for StdScheduler<C> {
    fn schedule_callback(&self, priority: PriorityLevel, task: SchedulerTask) -> CallbackHandle {
        let handle = CallbackHandle(self.next_handle.get());
        self.next_handle.set(handle.0 + 1);
        let expiration = self.now_ms().saturating_add(self.config.timeout_for(priority));
        log::trace!("scheduling task {handle:?} at {priority:?}, expires at {expiration}");
        self.queue.borrow_mut().push(ScheduledTask {
            handle,
            priority,
            expiration,
            callback: task,
        });
        self.wake();
        handle
    }

    fn cancel_callback(&self, handle: CallbackHandle) {
        self.queue.borrow_mut().retain(|task| task.handle != handle);
    }

    fn should_yield(&self) -> bool {
        match self.slice_start.get() {
            Some(start) => self.clock.elapsed_millis(start) >= self.config.frame_interval_ms,
            None => false,
        }
    }

    fn current_priority_level(&self) -> PriorityLevel {
        self.current_priority.get()
    }

    fn run_with_priority(&self, priority: PriorityLevel, f: &mut dyn FnMut()) {
        let previous = self.current_priority.replace(priority);
        f();
        self.current_priority.set(previous);
    }
}

/// Clock implementation backed by [`std::time`].
#[derive(Debug, Default, Clone)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn elapsed_millis(&self, since: Self::Instant) -> u64 {
        since.elapsed().as_millis() as u64
    }
}

impl StdClock {
    /// Returns the elapsed time as a [`Duration`] for convenience.
    pub fn elapsed(&self, since: Instant) -> Duration {
        since.elapsed()
    }
}

/// Convenience container bundling the standard scheduler and clock.
#[derive(Clone)]
pub struct StdRuntime {
    scheduler: Rc<StdScheduler>,
    clock: Rc<StdClock>,
}

impl StdRuntime {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            scheduler: Rc::new(StdScheduler::with_clock(StdClock, config)),
            clock: Rc::new(StdClock),
        }
    }

    /// Mounts a new root whose work runs on this runtime's scheduler.
    pub fn create_root<H>(&self, host: H, container: InstanceId) -> FiberRoot
    where
        H: HostConfig + 'static,
    {
        self.create_root_with_options(host, container, RootOptions::default())
    }

    pub fn create_root_with_options<H>(&self, host: H, container: InstanceId, options: RootOptions) -> FiberRoot
    where
        H: HostConfig + 'static,
    {
        FiberRoot::create_container_with_options(host, container, self.scheduler.clone(), options)
    }

    /// Returns the scheduler implementation.
    pub fn scheduler(&self) -> Rc<StdScheduler> {
        Rc::clone(&self.scheduler)
    }

    /// Returns the clock implementation.
    pub fn clock(&self) -> Rc<StdClock> {
        Rc::clone(&self.clock)
    }

    /// Registers a waker to be called when work is scheduled.
    pub fn set_frame_waker(&self, waker: impl Fn() + 'static) {
        self.scheduler.set_frame_waker(waker);
    }

    /// Clears any previously registered frame waker.
    pub fn clear_frame_waker(&self) {
        self.scheduler.clear_frame_waker();
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.scheduler.has_pending_tasks()
    }

    pub fn run_until_idle(&self) -> usize {
        self.scheduler.run_until_idle()
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}
