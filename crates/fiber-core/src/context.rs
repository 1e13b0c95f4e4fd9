//! Context channels and the provider value stack.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::collections::map::HashMap;
use crate::element::{Element, ElementType, Node, Props, ProviderProps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A typed context channel with a default value.
pub struct Context<T> {
    id: ContextId,
    default: Rc<T>,
    _marker: PhantomData<T>,
}

impl<T: 'static> Context<T> {
    pub fn new(default: T) -> Self {
        Self {
            id: ContextId::next(),
            default: Rc::new(default),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Provides `value` to every consumer under `children`.
    pub fn provider(&self, value: T, children: impl Into<Node>) -> Element {
        let props = ProviderProps {
            value: Rc::new(value),
            children: children.into(),
        };
        Element::new(ElementType::Provider(self.id), Props::Provider(Rc::new(props)))
    }

    pub(crate) fn default_value(&self) -> &T {
        &self.default
    }
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: Rc::clone(&self.default),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.id).finish()
    }
}

pub fn create_context<T: 'static>(default: T) -> Context<T> {
    Context::new(default)
}

/// Current provider values for the fiber being rendered.
pub(crate) type ContextValues = HashMap<ContextId, Rc<dyn Any>>;

/// Provider stack for one render pass. Begin pushes, complete and unwind pop.
#[derive(Default)]
pub(crate) struct ContextStack {
    values: ContextValues,
    saved: Vec<(ContextId, Option<Rc<dyn Any>>)>,
}

impl ContextStack {
    pub(crate) fn push(&mut self, id: ContextId, value: Rc<dyn Any>) {
        let previous = self.values.insert(id, value);
        self.saved.push((id, previous));
    }

    pub(crate) fn pop(&mut self) {
        let Some((id, previous)) = self.saved.pop() else {
            log::warn!("context stack popped while empty");
            return;
        };
        match previous {
            Some(value) => {
                self.values.insert(id, value);
            }
            None => {
                self.values.remove(&id);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> ContextValues {
        self.values.clone()
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.saved.len()
    }
}
