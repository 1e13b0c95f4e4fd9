//! Hook state machine.
//!
//! A function component receives a [`Hooks`] render context. Each hook call
//! appends one record to the work-in-progress list; on updates the record is
//! paired with the record at the same position in the previous render.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::context::{Context, ContextValues};
use crate::element::{ComponentType, Interrupt, Props, Render};
use crate::fiber::FiberId;
use crate::flags::HookEffectTags;
use crate::lanes::{Lanes, TransitionScope, NO_LANES};
use crate::platform::InstanceId;
use crate::root::RootHandle;
use crate::suspense::Resource;
use crate::update_queue::{create_update, process_update_queue, Action, Update, UpdateQueue};

/// One hook record. State and ref records are type-erased; the concrete
/// type is recovered by downcasting on the next render.
#[derive(Clone)]
pub(crate) enum Hook {
    State(Rc<dyn Any>),
    Effect(Rc<Effect>),
    Ref(Rc<dyn Any>),
    Transition(StartTransition),
}

impl Hook {
    fn kind(&self) -> &'static str {
        match self {
            Hook::State(_) => "use_state",
            Hook::Effect(_) => "use_effect",
            Hook::Ref(_) => "use_ref",
            Hook::Transition(_) => "use_transition",
        }
    }
}

struct StateHook<T> {
    memoized_state: T,
    base_state: T,
    base_queue: VecDeque<Update<T>>,
    queue: Rc<RefCell<UpdateQueue<T>>>,
    dispatch: Dispatch<T>,
}

/// Setter returned by [`Hooks::use_state`].
pub struct Dispatch<T> {
    queue: Rc<RefCell<UpdateQueue<T>>>,
    fiber: FiberId,
    root: RootHandle,
}

impl<T> Clone for Dispatch<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Rc::clone(&self.queue),
            fiber: self.fiber,
            root: self.root.clone(),
        }
    }
}

impl<T> fmt::Debug for Dispatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch").field("fiber", &self.fiber).finish()
    }
}

impl<T: 'static> Dispatch<T> {
    pub fn set(&self, value: T) {
        self.dispatch(Action::Replace(value));
    }

    pub fn update(&self, reducer: impl Fn(&T) -> T + 'static) {
        self.dispatch(Action::Reduce(Rc::new(reducer)));
    }

    fn dispatch(&self, action: Action<T>) {
        let lane = self.root.request_update_lane();
        self.queue.borrow_mut().enqueue(create_update(action, lane));
        self.root.schedule_update_on_fiber(self.fiber, lane);
    }
}

/// Teardown returned by an effect's create callback.
#[derive(Default)]
pub struct Cleanup {
    callback: Option<Box<dyn FnOnce()>>,
}

impl Cleanup {
    pub fn new(callback: impl FnOnce() + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    fn run(self) {
        if let Some(callback) = self.callback {
            callback();
        }
    }
}

type EffectCreate = Box<dyn FnOnce() -> Cleanup>;

pub struct Effect {
    tag: Cell<HookEffectTags>,
    create: RefCell<Option<EffectCreate>>,
    /// Shared by every generation of the same effect hook.
    cleanup: Rc<RefCell<Option<Cleanup>>>,
    deps: Option<Vec<Dep>>,
}

impl Effect {
    pub(crate) fn has_tags(&self, tags: HookEffectTags) -> bool {
        self.tag.get().contains(tags)
    }

    pub(crate) fn clear_has_effect(&self) {
        self.tag.set(self.tag.get() - HookEffectTags::HAS_EFFECT);
    }

    pub(crate) fn destroy(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup.run();
        }
    }

    pub(crate) fn create(&self) {
        let create = self.create.borrow_mut().take();
        if let Some(create) = create {
            let cleanup = create();
            *self.cleanup.borrow_mut() = Some(cleanup);
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("tag", &self.tag.get())
            .field("deps", &self.deps)
            .finish()
    }
}

/// One entry of an effect dependency list.
#[derive(Clone)]
pub enum Dep {
    Unit,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Char(char),
    Str(Rc<str>),
    /// Compared by allocation identity.
    Shared(Rc<dyn Any>),
}

impl Dep {
    pub fn shared<T: 'static>(value: &Rc<T>) -> Self {
        Dep::Shared(Rc::clone(value) as Rc<dyn Any>)
    }

    /// Same-value comparison: NaN equals NaN, +0.0 and -0.0 differ.
    pub fn same_value(&self, other: &Dep) -> bool {
        match (self, other) {
            (Dep::Unit, Dep::Unit) => true,
            (Dep::Bool(a), Dep::Bool(b)) => a == b,
            (Dep::Int(a), Dep::Int(b)) => a == b,
            (Dep::Uint(a), Dep::Uint(b)) => a == b,
            (Dep::Float(a), Dep::Float(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (Dep::Char(a), Dep::Char(b)) => a == b,
            (Dep::Str(a), Dep::Str(b)) => a == b,
            (Dep::Shared(a), Dep::Shared(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dep::Unit => f.write_str("()"),
            Dep::Bool(value) => value.fmt(f),
            Dep::Int(value) => value.fmt(f),
            Dep::Uint(value) => value.fmt(f),
            Dep::Float(value) => value.fmt(f),
            Dep::Char(value) => value.fmt(f),
            Dep::Str(value) => value.fmt(f),
            Dep::Shared(value) => write!(f, "Shared({:p})", Rc::as_ptr(value) as *const ()),
        }
    }
}

macro_rules! dep_from {
    ($($ty:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(impl From<$ty> for Dep {
            fn from(value: $ty) -> Self {
                Dep::$variant(value as $target)
            }
        })*
    };
}

dep_from!(
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    isize => Int as i64,
    u8 => Uint as u64,
    u16 => Uint as u64,
    u32 => Uint as u64,
    u64 => Uint as u64,
    usize => Uint as u64,
    f32 => Float as f64,
    f64 => Float as f64,
);

impl From<()> for Dep {
    fn from(_: ()) -> Self {
        Dep::Unit
    }
}

impl From<bool> for Dep {
    fn from(value: bool) -> Self {
        Dep::Bool(value)
    }
}

impl From<char> for Dep {
    fn from(value: char) -> Self {
        Dep::Char(value)
    }
}

impl From<&str> for Dep {
    fn from(value: &str) -> Self {
        Dep::Str(Rc::from(value))
    }
}

impl From<String> for Dep {
    fn from(value: String) -> Self {
        Dep::Str(Rc::from(value))
    }
}

impl From<Rc<str>> for Dep {
    fn from(value: Rc<str>) -> Self {
        Dep::Str(value)
    }
}

/// Builds an effect dependency list: `deps![a, b]`, or `deps![]` to run once.
#[macro_export]
macro_rules! deps {
    ($($dep:expr),* $(,)?) => {
        ::core::option::Option::Some(::std::vec![$($crate::Dep::from($dep)),*])
    };
}

pub(crate) fn are_hook_inputs_equal(next: &[Dep], prev: &[Dep]) -> bool {
    next.len() == prev.len() && next.iter().zip(prev).all(|(a, b)| a.same_value(b))
}

/// A stable mutable cell returned by [`Hooks::use_ref`].
pub struct RefObject<T>(Rc<RefCell<T>>);

/// Ref attached to a host element's instance during commit.
pub type NodeRef = RefObject<Option<InstanceId>>;

impl<T> RefObject<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    pub fn set(&self, value: T) {
        *self.0.borrow_mut() = value;
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.borrow())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }

    pub fn ptr_eq(&self, other: &RefObject<T>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> RefObject<T> {
    pub fn current(&self) -> T {
        self.0.borrow().clone()
    }
}

impl<T> Clone for RefObject<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for RefObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefObject").field(&self.0.borrow()).finish()
    }
}

impl<T: Default> Default for RefObject<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Starter returned by [`Hooks::use_transition`].
#[derive(Clone)]
pub struct StartTransition {
    set_pending: Dispatch<bool>,
}

impl StartTransition {
    /// Runs `callback` with every update it dispatches tagged as a transition.
    pub fn start(&self, callback: impl FnOnce()) {
        self.set_pending.set(true);
        let scope = TransitionScope::enter();
        callback();
        self.set_pending.set(false);
        drop(scope);
    }
}

impl fmt::Debug for StartTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StartTransition")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HooksMode {
    Mount,
    Update,
}

/// Render context for one component body invocation.
pub struct Hooks {
    fiber: FiberId,
    component: &'static str,
    mode: HooksMode,
    previous: Vec<Hook>,
    hooks: Vec<Hook>,
    effects: Vec<Rc<Effect>>,
    render_lanes: Lanes,
    root: RootHandle,
    contexts: ContextValues,
    passive: bool,
    skipped_lanes: Lanes,
    mismatch: Option<String>,
}

/// What a finished body leaves behind for the fiber.
pub(crate) struct HooksOutput {
    pub(crate) hooks: Vec<Hook>,
    pub(crate) effects: Vec<Rc<Effect>>,
    pub(crate) passive: bool,
    pub(crate) skipped_lanes: Lanes,
    pub(crate) mismatch: Option<String>,
}

impl Hooks {
    pub(crate) fn new(
        fiber: FiberId,
        component: &'static str,
        previous: Option<Vec<Hook>>,
        render_lanes: Lanes,
        root: RootHandle,
        contexts: ContextValues,
    ) -> Self {
        let mode = if previous.is_some() {
            HooksMode::Update
        } else {
            HooksMode::Mount
        };
        Self {
            fiber,
            component,
            mode,
            previous: previous.unwrap_or_default(),
            hooks: Vec::new(),
            effects: Vec::new(),
            render_lanes,
            root,
            contexts,
            passive: false,
            skipped_lanes: NO_LANES,
            mismatch: None,
        }
    }

    pub fn component_name(&self) -> &'static str {
        self.component
    }

    pub fn render_lanes(&self) -> Lanes {
        self.render_lanes
    }

    fn previous_hook(&mut self, kind: &'static str) -> Option<Hook> {
        if self.mode == HooksMode::Mount {
            return None;
        }
        let index = self.hooks.len();
        match self.previous.get(index) {
            Some(hook) => Some(hook.clone()),
            None => {
                self.record_mismatch(format!(
                    "{kind} at position {index} was not called in the previous render"
                ));
                None
            }
        }
    }

    fn record_mismatch(&mut self, detail: String) {
        if self.mismatch.is_none() {
            self.mismatch = Some(detail);
        }
    }

    fn kind_mismatch(&mut self, expected: &'static str, found: &Hook) {
        let index = self.hooks.len();
        self.record_mismatch(format!(
            "{expected} at position {index} was {} in the previous render",
            found.kind()
        ));
    }

    pub fn use_state<T: Clone + 'static>(&mut self, initial: impl FnOnce() -> T) -> (T, Dispatch<T>) {
        match self.previous_hook("use_state") {
            Some(Hook::State(any)) => match any.downcast::<RefCell<StateHook<T>>>() {
                Ok(current) => return self.update_state(current),
                Err(_) => self.record_mismatch(format!(
                    "use_state at position {} changed its state type",
                    self.hooks.len()
                )),
            },
            Some(other) => self.kind_mismatch("use_state", &other),
            None => {}
        }
        self.mount_state(initial())
    }

    fn mount_state<T: Clone + 'static>(&mut self, value: T) -> (T, Dispatch<T>) {
        let queue = Rc::new(RefCell::new(UpdateQueue::new()));
        let dispatch = Dispatch {
            queue: Rc::clone(&queue),
            fiber: self.fiber,
            root: self.root.clone(),
        };
        let hook = StateHook {
            memoized_state: value.clone(),
            base_state: value.clone(),
            base_queue: VecDeque::new(),
            queue,
            dispatch: dispatch.clone(),
        };
        self.hooks.push(Hook::State(Rc::new(RefCell::new(hook))));
        (value, dispatch)
    }

    fn update_state<T: Clone + 'static>(&mut self, current: Rc<RefCell<StateHook<T>>>) -> (T, Dispatch<T>) {
        let next = {
            let mut current = current.borrow_mut();
            let pending = current.queue.borrow_mut().take_pending();
            // Pending updates move onto the committed record so a discarded
            // pass cannot lose them.
            current.base_queue.extend(pending);
            if current.base_queue.is_empty() {
                StateHook {
                    memoized_state: current.memoized_state.clone(),
                    base_state: current.base_state.clone(),
                    base_queue: VecDeque::new(),
                    queue: Rc::clone(&current.queue),
                    dispatch: current.dispatch.clone(),
                }
            } else {
                let processed = process_update_queue(
                    current.base_state.clone(),
                    current.base_queue.iter().cloned(),
                    self.render_lanes,
                );
                self.skipped_lanes |= processed.skipped_lanes;
                StateHook {
                    memoized_state: processed.memoized_state,
                    base_state: processed.base_state,
                    base_queue: processed.base_queue,
                    queue: Rc::clone(&current.queue),
                    dispatch: current.dispatch.clone(),
                }
            }
        };
        let result = (next.memoized_state.clone(), next.dispatch.clone());
        self.hooks.push(Hook::State(Rc::new(RefCell::new(next))));
        result
    }

    /// Schedules `create` to run after commit. With `deps` of `None` it runs
    /// after every render; otherwise only when a dependency changed.
    pub fn use_effect(&mut self, create: impl FnOnce() -> Cleanup + 'static, deps: Option<Vec<Dep>>) {
        let create: EffectCreate = Box::new(create);
        match self.previous_hook("use_effect") {
            Some(Hook::Effect(previous)) => {
                let cleanup = Rc::clone(&previous.cleanup);
                let unchanged = match (&deps, &previous.deps) {
                    (Some(next), Some(prev)) => are_hook_inputs_equal(next, prev),
                    _ => false,
                };
                let tag = if unchanged {
                    HookEffectTags::PASSIVE
                } else {
                    self.passive = true;
                    HookEffectTags::PASSIVE | HookEffectTags::HAS_EFFECT
                };
                self.push_effect(tag, create, cleanup, deps);
                return;
            }
            Some(other) => self.kind_mismatch("use_effect", &other),
            None => {}
        }
        self.passive = true;
        self.push_effect(
            HookEffectTags::PASSIVE | HookEffectTags::HAS_EFFECT,
            create,
            Rc::new(RefCell::new(None)),
            deps,
        );
    }

    fn push_effect(
        &mut self,
        tag: HookEffectTags,
        create: EffectCreate,
        cleanup: Rc<RefCell<Option<Cleanup>>>,
        deps: Option<Vec<Dep>>,
    ) {
        let effect = Rc::new(Effect {
            tag: Cell::new(tag),
            create: RefCell::new(Some(create)),
            cleanup,
            deps,
        });
        self.effects.push(Rc::clone(&effect));
        self.hooks.push(Hook::Effect(effect));
    }

    pub fn use_ref<T: 'static>(&mut self, initial: impl FnOnce() -> T) -> RefObject<T> {
        match self.previous_hook("use_ref") {
            Some(Hook::Ref(any)) => {
                if let Some(existing) = any.downcast_ref::<RefObject<T>>() {
                    let existing = existing.clone();
                    self.hooks.push(Hook::Ref(any));
                    return existing;
                }
                self.record_mismatch(format!(
                    "use_ref at position {} changed its value type",
                    self.hooks.len()
                ));
            }
            Some(other) => self.kind_mismatch("use_ref", &other),
            None => {}
        }
        let object = RefObject::new(initial());
        self.hooks.push(Hook::Ref(Rc::new(object.clone())));
        object
    }

    /// Reads the nearest provided value, or the context default.
    pub fn use_context<T: Clone + 'static>(&mut self, context: &Context<T>) -> T {
        self.contexts
            .get(&context.id())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
            .unwrap_or_else(|| context.default_value().clone())
    }

    pub fn use_transition(&mut self) -> (bool, StartTransition) {
        let (pending, set_pending) = self.use_state(|| false);
        match self.previous_hook("use_transition") {
            Some(Hook::Transition(start)) => {
                self.hooks.push(Hook::Transition(start.clone()));
                return (pending, start);
            }
            Some(other) => self.kind_mismatch("use_transition", &other),
            None => {}
        }
        let start = StartTransition { set_pending };
        self.hooks.push(Hook::Transition(start.clone()));
        (pending, start)
    }

    /// Unwraps a resource, suspending the component while it is pending.
    pub fn use_resource<T: Clone + 'static>(&mut self, resource: &Resource<T>) -> Result<T, Interrupt> {
        resource.read()
    }

    pub(crate) fn finish(mut self, completed: bool) -> HooksOutput {
        if completed && self.mode == HooksMode::Update && self.hooks.len() < self.previous.len() {
            let detail = format!(
                "rendered {} hooks, previous render had {}",
                self.hooks.len(),
                self.previous.len()
            );
            self.record_mismatch(detail);
        }
        HooksOutput {
            hooks: self.hooks,
            effects: self.effects,
            passive: self.passive,
            skipped_lanes: self.skipped_lanes,
            mismatch: self.mismatch,
        }
    }
}

/// Invokes a component body with a fresh hook cursor.
pub(crate) fn render_with_hooks(component: &ComponentType, props: &Props, hooks: &mut Hooks) -> Render {
    match props {
        Props::Component(props) => component.render(hooks, props.as_ref()),
        other => {
            log::warn!("component `{}` rendered with {:?} props", component.name(), other);
            Ok(crate::element::Node::Empty)
        }
    }
}

#[cfg(test)]
#[path = "tests/hooks_tests.rs"]
mod tests;
