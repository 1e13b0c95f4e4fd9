//! Platform abstraction traits for the reconciler.
//!
//! The engine never touches a concrete output tree or event loop. Output
//! mutations go through [`HostConfig`], task scheduling goes through
//! [`TaskScheduler`], and timing goes through [`Clock`].

use std::fmt;

use crate::element::HostProps;

/// Opaque handle to a host instance (element, text node or container).
pub type InstanceId = usize;

/// Output-tree adapter.
///
/// The reconciler calls these during the render phase (instance creation)
/// and the commit phase (everything else). Implementations must not call
/// back into the reconciler synchronously; deferred work belongs in
/// [`HostConfig::schedule_microtask`].
pub trait HostConfig {
    fn create_instance(&mut self, tag: &str, props: &HostProps) -> InstanceId;

    fn create_text_instance(&mut self, text: &str) -> InstanceId;

    fn append_child(&mut self, parent: InstanceId, child: InstanceId);

    fn insert_before(&mut self, parent: InstanceId, child: InstanceId, before: InstanceId);

    fn remove_child(&mut self, parent: InstanceId, child: InstanceId);

    fn commit_update(&mut self, instance: InstanceId, props: &HostProps);

    fn commit_text_update(&mut self, instance: InstanceId, text: &str);

    fn hide_instance(&mut self, instance: InstanceId);

    fn unhide_instance(&mut self, instance: InstanceId);

    fn hide_text_instance(&mut self, instance: InstanceId);

    /// Restores a blanked text node to `text`.
    fn unhide_text_instance(&mut self, instance: InstanceId, text: &str);

    /// Queues `task` to run after the current task finishes.
    fn schedule_microtask(&mut self, task: Box<dyn FnOnce()>);
}

/// Scheduler priority levels, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityLevel {
    Immediate = 1,
    UserBlocking = 2,
    Normal = 3,
    Low = 4,
    Idle = 5,
}

impl Default for PriorityLevel {
    fn default() -> Self {
        PriorityLevel::Normal
    }
}

/// Handle returned by [`TaskScheduler::schedule_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackHandle(pub u64);

/// Scheduled task body. The flag tells whether the task ran past its timeout.
pub type SchedulerTask = Box<dyn FnOnce(bool) -> Continuation>;

/// What a task wants after it ran.
pub enum Continuation {
    Done,
    /// Run this in place of the finished task, keeping its handle.
    Continue(SchedulerTask),
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Continuation::Done => f.write_str("Done"),
            Continuation::Continue(_) => f.write_str("Continue(..)"),
        }
    }
}

/// Cooperative task scheduler.
///
/// Single threaded: every method is called from the thread that owns the
/// roots, so implementations use interior mutability rather than locks.
pub trait TaskScheduler {
    fn schedule_callback(&self, priority: PriorityLevel, task: SchedulerTask) -> CallbackHandle;

    /// Cancelling a handle that already ran (or is running) is a no-op.
    fn cancel_callback(&self, handle: CallbackHandle);

    /// Polled between units of work in the concurrent loop.
    fn should_yield(&self) -> bool;

    fn current_priority_level(&self) -> PriorityLevel;

    fn run_with_priority(&self, priority: PriorityLevel, f: &mut dyn FnMut());
}

/// Time source a scheduler measures slices and task deadlines against.
pub trait Clock {
    type Instant: Copy;

    fn now(&self) -> Self::Instant;

    /// Whole milliseconds between `since` and now.
    fn elapsed_millis(&self, since: Self::Instant) -> u64;
}
