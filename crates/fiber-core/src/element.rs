//! Element descriptors: the immutable description of what to render.

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::context::ContextId;
use crate::hooks::{Hooks, NodeRef};
use crate::suspense::Wakeable;

pub type Key = Rc<str>;

/// Result of a component body.
pub type Render = Result<Node, Interrupt>;

/// Non-local exits from a component body.
pub enum Interrupt {
    /// The body read a value that is not ready yet.
    Suspend(Rc<dyn Wakeable>),
    /// The body failed; the render pass is abandoned.
    Failed(anyhow::Error),
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Suspend(wakeable) => {
                f.debug_tuple("Suspend").field(&wakeable.wakeable_id()).finish()
            }
            Interrupt::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

impl From<anyhow::Error> for Interrupt {
    fn from(err: anyhow::Error) -> Self {
        Interrupt::Failed(err)
    }
}

/// A renderable child value.
#[derive(Clone, Default)]
pub enum Node {
    #[default]
    Empty,
    Text(Rc<str>),
    Element(Element),
    List(Rc<[Node]>),
}

impl Node {
    /// Identity comparison: true when both sides came from the same
    /// descriptor allocation.
    pub fn same(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Empty, Node::Empty) => true,
            (Node::Text(a), Node::Text(b)) => Rc::ptr_eq(a, b),
            (Node::Element(a), Node::Element(b)) => {
                a.ty == b.ty && a.key == b.key && a.props.ptr_eq(&b.props)
            }
            (Node::List(a), Node::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    fn from_children(mut children: Vec<Node>) -> Node {
        match children.len() {
            0 => Node::Empty,
            1 => children.pop().unwrap_or_default(),
            _ => Node::List(children.into()),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Empty => f.write_str("Empty"),
            Node::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Node::Element(element) => element.fmt(f),
            Node::List(items) => f.debug_list().entries(items.iter()).finish(),
        }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Node::Text(Rc::from(text))
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Node::Text(Rc::from(text))
    }
}

impl From<Rc<str>> for Node {
    fn from(text: Rc<str>) -> Self {
        Node::Text(text)
    }
}

macro_rules! node_from_display {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Node {
            fn from(value: $ty) -> Self {
                Node::Text(Rc::from(value.to_string()))
            }
        })*
    };
}

node_from_display!(i32, i64, u32, u64, usize, f64, char);

impl From<Vec<Node>> for Node {
    fn from(children: Vec<Node>) -> Self {
        Node::List(children.into())
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Node::Empty)
    }
}

impl From<()> for Node {
    fn from(_: ()) -> Self {
        Node::Empty
    }
}

/// Type-erased function component.
#[derive(Clone)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
    render: Rc<dyn Fn(&mut Hooks, &dyn Any) -> Render>,
}

impl ComponentType {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn render(&self, hooks: &mut Hooks, props: &dyn Any) -> Render {
        (self.render)(hooks, props)
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ElementType {
    Host(Rc<str>),
    Component(ComponentType),
    Fragment,
    Provider(ContextId),
    Suspense,
    Offscreen,
}

/// Reference-counted props. Two props are "the same" only when they share
/// an allocation.
#[derive(Clone)]
pub enum Props {
    Empty,
    Host(Rc<HostProps>),
    Text(Rc<str>),
    Component(Rc<dyn Any>),
    Fragment(Rc<[Node]>),
    Provider(Rc<ProviderProps>),
    Suspense(Rc<SuspenseProps>),
    Offscreen(Rc<OffscreenProps>),
}

impl Props {
    pub fn ptr_eq(&self, other: &Props) -> bool {
        match (self, other) {
            (Props::Empty, Props::Empty) => true,
            (Props::Host(a), Props::Host(b)) => Rc::ptr_eq(a, b),
            (Props::Text(a), Props::Text(b)) => Rc::ptr_eq(a, b),
            (Props::Component(a), Props::Component(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            (Props::Fragment(a), Props::Fragment(b)) => Rc::ptr_eq(a, b),
            (Props::Provider(a), Props::Provider(b)) => Rc::ptr_eq(a, b),
            (Props::Suspense(a), Props::Suspense(b)) => Rc::ptr_eq(a, b),
            (Props::Offscreen(a), Props::Offscreen(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn text(&self) -> Option<&Rc<str>> {
        match self {
            Props::Text(text) => Some(text),
            _ => None,
        }
    }

    pub(crate) fn host(&self) -> Option<&Rc<HostProps>> {
        match self {
            Props::Host(props) => Some(props),
            _ => None,
        }
    }

    pub(crate) fn offscreen_mode(&self) -> Option<OffscreenMode> {
        match self {
            Props::Offscreen(props) => Some(props.mode),
            _ => None,
        }
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Props::Empty => f.write_str("Empty"),
            Props::Host(props) => props.fmt(f),
            Props::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Props::Component(_) => f.write_str("Component(..)"),
            Props::Fragment(items) => f.debug_tuple("Fragment").field(&items.len()).finish(),
            Props::Provider(_) => f.write_str("Provider(..)"),
            Props::Suspense(_) => f.write_str("Suspense(..)"),
            Props::Offscreen(props) => f.debug_tuple("Offscreen").field(&props.mode).finish(),
        }
    }
}

/// Props of a host element: ordered attributes plus children.
#[derive(Debug, Clone, Default)]
pub struct HostProps {
    pub attributes: IndexMap<String, String>,
    pub children: Node,
}

pub struct ProviderProps {
    pub(crate) value: Rc<dyn Any>,
    pub(crate) children: Node,
}

pub struct SuspenseProps {
    pub(crate) children: Node,
    pub(crate) fallback: Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffscreenMode {
    Visible,
    Hidden,
}

pub struct OffscreenProps {
    pub(crate) mode: OffscreenMode,
    pub(crate) children: Node,
}

#[derive(Clone)]
pub struct Element {
    pub(crate) ty: ElementType,
    pub(crate) key: Option<Key>,
    pub(crate) node_ref: Option<NodeRef>,
    pub(crate) props: Props,
}

impl Element {
    pub(crate) fn new(ty: ElementType, props: Props) -> Self {
        Self {
            ty,
            key: None,
            node_ref: None,
            props,
        }
    }

    pub fn with_key(mut self, key: impl ToString) -> Self {
        self.key = Some(Rc::from(key.to_string()));
        self
    }

    pub fn with_ref(mut self, node_ref: &NodeRef) -> Self {
        self.node_ref = Some(node_ref.clone());
        self
    }

    pub fn element_type(&self) -> &ElementType {
        &self.ty
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("type", &self.ty)
            .field("key", &self.key)
            .field("props", &self.props)
            .finish()
    }
}

/// Builder for host elements, see [`el`].
#[derive(Debug, Clone)]
pub struct HostElement {
    tag: Rc<str>,
    key: Option<Key>,
    node_ref: Option<NodeRef>,
    attributes: IndexMap<String, String>,
    children: Vec<Node>,
}

/// Starts a host element with the given tag.
pub fn el(tag: &str) -> HostElement {
    HostElement {
        tag: Rc::from(tag),
        key: None,
        node_ref: None,
        attributes: IndexMap::new(),
        children: Vec::new(),
    }
}

impl HostElement {
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn key(mut self, key: impl ToString) -> Self {
        self.key = Some(Rc::from(key.to_string()));
        self
    }

    pub fn node_ref(mut self, node_ref: &NodeRef) -> Self {
        self.node_ref = Some(node_ref.clone());
        self
    }

    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I, N>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        // A list child keeps its own identity so its items are keyed
        // independently of the static siblings.
        let list: Vec<Node> = children.into_iter().map(Into::into).collect();
        self.children.push(Node::List(list.into()));
        self
    }

    pub fn build(self) -> Element {
        let props = HostProps {
            attributes: self.attributes,
            children: Node::from_children(self.children),
        };
        Element {
            ty: ElementType::Host(self.tag),
            key: self.key,
            node_ref: self.node_ref,
            props: Props::Host(Rc::new(props)),
        }
    }
}

impl From<HostElement> for Element {
    fn from(builder: HostElement) -> Self {
        builder.build()
    }
}

impl From<HostElement> for Node {
    fn from(builder: HostElement) -> Self {
        Node::Element(builder.build())
    }
}

pub fn text(content: impl Into<Rc<str>>) -> Node {
    Node::Text(content.into())
}

/// Describes a function component invocation.
///
/// The component's identity is the type of `render`, so two elements built
/// from the same function reconcile against each other.
pub fn component<P, F>(render: F, props: P) -> Element
where
    P: 'static,
    F: Fn(&mut Hooks, &P) -> Render + 'static,
{
    let name = std::any::type_name::<F>();
    let erased = move |hooks: &mut Hooks, props: &dyn Any| match props.downcast_ref::<P>() {
        Some(props) => render(hooks, props),
        None => Err(Interrupt::Failed(anyhow::anyhow!(
            "props of `{name}` have an unexpected type"
        ))),
    };
    let ty = ComponentType {
        id: TypeId::of::<F>(),
        name,
        render: Rc::new(erased),
    };
    Element::new(ElementType::Component(ty), Props::Component(Rc::new(props)))
}

pub fn fragment(children: Vec<Node>) -> Element {
    Element::new(ElementType::Fragment, Props::Fragment(children.into()))
}

/// A suspense boundary showing `fallback` while `children` are suspended.
pub fn suspense(fallback: impl Into<Node>, children: impl Into<Node>) -> Element {
    let props = SuspenseProps {
        children: children.into(),
        fallback: fallback.into(),
    };
    Element::new(ElementType::Suspense, Props::Suspense(Rc::new(props)))
}
