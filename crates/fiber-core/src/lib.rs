//! Fiber reconciliation engine.
//!
//! Components describe output as [`Node`] trees; a [`FiberRoot`] diffs each
//! new description against the committed fiber tree and applies the
//! difference to a [`HostConfig`], scheduling work through a
//! [`TaskScheduler`].

mod begin_work;
mod child_fibers;
pub mod collections;
mod commit;
mod complete_work;
mod context;
mod element;
mod error;
mod fiber;
mod flags;
mod hooks;
mod host;
pub mod lanes;
pub mod platform;
mod root;
mod suspense;
pub mod update_queue;
mod work_loop;

pub use context::{create_context, Context, ContextId};
pub use element::{
    component, el, fragment, suspense, text, ComponentType, Element, ElementType, HostElement, HostProps,
    Interrupt, Key, Node, OffscreenMode, Props, Render,
};
pub use error::ReconcilerError;
pub use fiber::{Fiber, FiberArena, FiberId, WorkTag};
pub use flags::{FiberFlags, HookEffectTags};
pub use hooks::{Cleanup, Dep, Dispatch, Hooks, NodeRef, RefObject, StartTransition};
pub use host::{HostOp, MemoryHost};
pub use lanes::{Lane, Lanes};
pub use platform::{
    CallbackHandle, Clock, Continuation, HostConfig, InstanceId, PriorityLevel, SchedulerTask, TaskScheduler,
};
pub use root::{create_container, update_container, FiberRoot, RootHandle, RootOptions};
pub use suspense::{Resource, Wakeable, WakeableId};

pub mod prelude {
    pub use crate::{
        component, deps, el, fragment, suspense, text, Cleanup, Context, Dispatch, Element, Hooks, Node, NodeRef,
        Render, Resource,
    };
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod reconciler_tests;
