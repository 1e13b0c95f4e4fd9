//! Fiber records and the arena that owns them.
//!
//! Fibers are addressed by [`FiberId`] handles into a [`FiberArena`]. The
//! `child`, `sibling` and `return_fiber` links and the `alternate` pairing
//! are plain handles; only the reconciler rewrites them.

use std::cell::RefCell;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use slotmap::{new_key_type, SlotMap};

use crate::collections::map::HashSet;
use crate::element::{
    Element, ElementType, Key, Node, OffscreenMode, OffscreenProps, Props,
};
use crate::flags::FiberFlags;
use crate::hooks::{Effect, Hook, NodeRef};
use crate::lanes::{Lanes, NO_LANES};
use crate::platform::InstanceId;
use crate::update_queue::UpdateQueue;

new_key_type! {
    pub struct FiberId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkTag {
    FunctionComponent,
    HostRoot,
    HostComponent,
    HostText,
    Fragment,
    ContextProvider,
    SuspenseComponent,
    OffscreenComponent,
}

/// Host root state: the rendered element, the state the first skipped
/// update applies to, and how many queued root updates the pass consumed.
#[derive(Clone, Default)]
pub(crate) struct RootMemo {
    pub(crate) element: Node,
    pub(crate) base: Node,
    pub(crate) consumed: usize,
}

#[derive(Clone, Default)]
pub(crate) enum MemoizedState {
    #[default]
    None,
    Hooks(Vec<Hook>),
    Root(RootMemo),
}

impl MemoizedState {
    pub(crate) fn hooks(&self) -> &[Hook] {
        match self {
            MemoizedState::Hooks(hooks) => hooks,
            _ => &[],
        }
    }
}

#[derive(Clone, Default)]
pub(crate) enum FiberQueue {
    #[default]
    None,
    Root(Rc<RefCell<UpdateQueue<Node>>>),
    /// Effects created by the last render of a function component, in order.
    Effects(Rc<[Rc<Effect>]>),
}

pub struct Fiber {
    pub(crate) tag: WorkTag,
    pub(crate) key: Option<Key>,
    pub(crate) element_type: Option<ElementType>,
    pub(crate) state_node: Option<InstanceId>,

    pub(crate) return_fiber: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) index: usize,
    pub(crate) node_ref: Option<NodeRef>,

    pub(crate) pending_props: Props,
    pub(crate) memoized_props: Option<Props>,
    pub(crate) memoized_state: MemoizedState,
    pub(crate) update_queue: FiberQueue,

    pub(crate) flags: FiberFlags,
    pub(crate) subtree_flags: FiberFlags,
    pub(crate) deletions: Vec<FiberId>,

    pub(crate) lanes: Lanes,
    pub(crate) child_lanes: Lanes,

    pub(crate) alternate: Option<FiberId>,
}

impl Fiber {
    pub(crate) fn new(tag: WorkTag, pending_props: Props, key: Option<Key>) -> Self {
        Self {
            tag,
            key,
            element_type: None,
            state_node: None,
            return_fiber: None,
            child: None,
            sibling: None,
            index: 0,
            node_ref: None,
            pending_props,
            memoized_props: None,
            memoized_state: MemoizedState::None,
            update_queue: FiberQueue::None,
            flags: FiberFlags::empty(),
            subtree_flags: FiberFlags::empty(),
            deletions: Vec::new(),
            lanes: NO_LANES,
            child_lanes: NO_LANES,
            alternate: None,
        }
    }

    pub fn tag(&self) -> WorkTag {
        self.tag
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn flags(&self) -> FiberFlags {
        self.flags
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn alternate(&self) -> Option<FiberId> {
        self.alternate
    }

    pub fn state_node(&self) -> Option<InstanceId> {
        self.state_node
    }

    pub(crate) fn is_host(&self) -> bool {
        matches!(self.tag, WorkTag::HostComponent | WorkTag::HostText)
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("tag", &self.tag)
            .field("key", &self.key)
            .field("type", &self.element_type)
            .field("index", &self.index)
            .field("flags", &self.flags)
            .field("lanes", &self.lanes)
            .finish()
    }
}

#[derive(Default)]
pub struct FiberArena {
    fibers: SlotMap<FiberId, Fiber>,
}

impl FiberArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, fiber: Fiber) -> FiberId {
        self.fibers.insert(fiber)
    }

    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.fibers.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.fibers.get_mut(id)
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    /// Children of `parent` in sibling order.
    pub fn children(&self, parent: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut next = self.get(parent).and_then(|fiber| fiber.child);
        while let Some(id) = next {
            out.push(id);
            next = self.get(id).and_then(|fiber| fiber.sibling);
        }
        out
    }

    /// Drops every fiber that is neither in the tree under `root` nor the
    /// alternate of such a fiber.
    pub(crate) fn sweep(&mut self, root: FiberId) -> usize {
        let mut live: HashSet<FiberId> = HashSet::default();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.fibers.get(id) else {
                continue;
            };
            if !live.insert(id) {
                continue;
            }
            if let Some(alternate) = fiber.alternate {
                live.insert(alternate);
            }
            if let Some(sibling) = fiber.sibling {
                if id != root {
                    stack.push(sibling);
                }
            }
            if let Some(child) = fiber.child {
                stack.push(child);
            }
        }
        let before = self.fibers.len();
        self.fibers.retain(|id, _| live.contains(&id));
        before - self.fibers.len()
    }
}

impl Index<FiberId> for FiberArena {
    type Output = Fiber;

    fn index(&self, id: FiberId) -> &Fiber {
        &self.fibers[id]
    }
}

impl IndexMut<FiberId> for FiberArena {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber {
        &mut self.fibers[id]
    }
}

/// Returns the work-in-progress twin of `current`, reusing the previous
/// alternate when one exists.
pub(crate) fn create_work_in_progress(arena: &mut FiberArena, current: FiberId, pending_props: Props) -> FiberId {
    let existing = arena[current].alternate.filter(|id| arena.contains(*id));
    let wip = match existing {
        Some(wip) => {
            let fiber = &mut arena[wip];
            fiber.pending_props = pending_props;
            fiber.flags = FiberFlags::empty();
            fiber.subtree_flags = FiberFlags::empty();
            fiber.deletions.clear();
            wip
        }
        None => {
            let source = &arena[current];
            let mut fiber = Fiber::new(source.tag, pending_props, source.key.clone());
            fiber.state_node = source.state_node;
            fiber.alternate = Some(current);
            let wip = arena.insert(fiber);
            arena[current].alternate = Some(wip);
            wip
        }
    };

    let source = &arena[current];
    let element_type = source.element_type.clone();
    let update_queue = source.update_queue.clone();
    let child = source.child;
    let memoized_props = source.memoized_props.clone();
    let memoized_state = source.memoized_state.clone();
    let node_ref = source.node_ref.clone();
    let lanes = source.lanes;
    let child_lanes = source.child_lanes;
    let index = source.index;

    let fiber = &mut arena[wip];
    fiber.element_type = element_type;
    fiber.update_queue = update_queue;
    fiber.child = child;
    fiber.memoized_props = memoized_props;
    fiber.memoized_state = memoized_state;
    fiber.node_ref = node_ref;
    fiber.lanes = lanes;
    fiber.child_lanes = child_lanes;
    fiber.index = index;
    wip
}

pub(crate) fn create_host_root_fiber(arena: &mut FiberArena, container: InstanceId) -> FiberId {
    let mut fiber = Fiber::new(WorkTag::HostRoot, Props::Empty, None);
    fiber.state_node = Some(container);
    fiber.memoized_state = MemoizedState::Root(RootMemo::default());
    fiber.update_queue = FiberQueue::Root(Rc::new(RefCell::new(UpdateQueue::new())));
    arena.insert(fiber)
}

pub(crate) fn create_fiber_from_element(arena: &mut FiberArena, element: &Element) -> FiberId {
    let tag = match &element.ty {
        ElementType::Host(_) => WorkTag::HostComponent,
        ElementType::Component(_) => WorkTag::FunctionComponent,
        ElementType::Fragment => WorkTag::Fragment,
        ElementType::Provider(_) => WorkTag::ContextProvider,
        ElementType::Suspense => WorkTag::SuspenseComponent,
        ElementType::Offscreen => WorkTag::OffscreenComponent,
    };
    let mut fiber = Fiber::new(tag, element.props.clone(), element.key.clone());
    fiber.element_type = Some(element.ty.clone());
    fiber.node_ref = element.node_ref.clone();
    arena.insert(fiber)
}

pub(crate) fn create_fiber_from_fragment(arena: &mut FiberArena, items: Rc<[Node]>, key: Option<Key>) -> FiberId {
    let mut fiber = Fiber::new(WorkTag::Fragment, Props::Fragment(items), key);
    fiber.element_type = Some(ElementType::Fragment);
    arena.insert(fiber)
}

pub(crate) fn create_fiber_from_text(arena: &mut FiberArena, content: Rc<str>) -> FiberId {
    arena.insert(Fiber::new(WorkTag::HostText, Props::Text(content), None))
}

pub(crate) fn offscreen_props(mode: OffscreenMode, children: Node) -> Props {
    Props::Offscreen(Rc::new(OffscreenProps { mode, children }))
}

pub(crate) fn create_fiber_from_offscreen(arena: &mut FiberArena, props: Props) -> FiberId {
    let mut fiber = Fiber::new(WorkTag::OffscreenComponent, props, None);
    fiber.element_type = Some(ElementType::Offscreen);
    arena.insert(fiber)
}
