//! In-memory host adapter.
//!
//! `MemoryHost` keeps a DOM-like node table and a log of every mutation the
//! reconciler performs. It is a cheap handle: clones share the same tree,
//! so a test can keep one clone while the root owns another.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::element::HostProps;
use crate::platform::{HostConfig, InstanceId};

/// One host mutation, as recorded in the operation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    CreateInstance { id: InstanceId, tag: String },
    CreateText { id: InstanceId, text: String },
    Append { parent: InstanceId, child: InstanceId },
    InsertBefore { parent: InstanceId, child: InstanceId, before: InstanceId },
    Remove { parent: InstanceId, child: InstanceId },
    Update { id: InstanceId },
    TextUpdate { id: InstanceId, text: String },
    Hide { id: InstanceId },
    Unhide { id: InstanceId },
}

#[derive(Debug)]
enum MemoryNodeKind {
    Container,
    Element {
        tag: String,
        attributes: IndexMap<String, String>,
    },
    Text(String),
}

#[derive(Debug)]
struct MemoryNode {
    kind: MemoryNodeKind,
    parent: Option<InstanceId>,
    children: Vec<InstanceId>,
    hidden: bool,
}

impl MemoryNode {
    fn new(kind: MemoryNodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            hidden: false,
        }
    }
}

#[derive(Default)]
struct MemoryHostState {
    nodes: Vec<MemoryNode>,
    ops: Vec<HostOp>,
    microtasks: VecDeque<Box<dyn FnOnce()>>,
}

impl MemoryHostState {
    fn push(&mut self, node: MemoryNode) -> InstanceId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    fn detach(&mut self, child: InstanceId) {
        let Some(parent) = self.nodes.get(child).and_then(|node| node.parent) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.retain(|id| *id != child);
        }
        self.nodes[child].parent = None;
    }

    fn exists(&self, id: InstanceId) -> bool {
        if id < self.nodes.len() {
            return true;
        }
        log::warn!("memory host: unknown instance {id}");
        false
    }
}

#[derive(Clone, Default)]
pub struct MemoryHost {
    inner: Rc<RefCell<MemoryHostState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a detached container node to mount a root into.
    pub fn create_container(&self) -> InstanceId {
        self.inner.borrow_mut().push(MemoryNode::new(MemoryNodeKind::Container))
    }

    /// Runs queued microtasks, including ones queued while running, and
    /// returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.inner.borrow_mut().microtasks.pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn has_pending_microtasks(&self) -> bool {
        !self.inner.borrow().microtasks.is_empty()
    }

    pub fn children(&self, id: InstanceId) -> Vec<InstanceId> {
        self.inner
            .borrow()
            .nodes
            .get(id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: InstanceId) -> Option<InstanceId> {
        self.inner.borrow().nodes.get(id).and_then(|node| node.parent)
    }

    pub fn tag(&self, id: InstanceId) -> Option<String> {
        match &self.inner.borrow().nodes.get(id)?.kind {
            MemoryNodeKind::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn attribute(&self, id: InstanceId, name: &str) -> Option<String> {
        match &self.inner.borrow().nodes.get(id)?.kind {
            MemoryNodeKind::Element { attributes, .. } => attributes.get(name).cloned(),
            _ => None,
        }
    }

    pub fn text(&self, id: InstanceId) -> Option<String> {
        match &self.inner.borrow().nodes.get(id)?.kind {
            MemoryNodeKind::Text(text) => Some(text.clone()),
            _ => None,
        }
    }

    pub fn is_hidden(&self, id: InstanceId) -> bool {
        self.inner.borrow().nodes.get(id).is_some_and(|node| node.hidden)
    }

    /// Number of instances ever created, containers included.
    pub fn instance_count(&self) -> usize {
        self.inner.borrow().nodes.len()
    }

    pub fn ops(&self) -> Vec<HostOp> {
        self.inner.borrow().ops.clone()
    }

    pub fn take_ops(&self) -> Vec<HostOp> {
        std::mem::take(&mut self.inner.borrow_mut().ops)
    }

    /// Markup for the children of `id`, e.g. `<ul><li>a</li></ul>`. Hidden
    /// elements carry a `hidden` marker; hidden text renders empty.
    pub fn serialize(&self, id: InstanceId) -> String {
        let state = self.inner.borrow();
        let mut out = String::new();
        if let Some(node) = state.nodes.get(id) {
            for child in &node.children {
                serialize_node(&state, *child, &mut out);
            }
        }
        out
    }

    /// Indented one-node-per-line rendering of the tree under `id`.
    pub fn dump_tree(&self, id: InstanceId) -> String {
        let state = self.inner.borrow();
        let mut out = String::new();
        dump_node(&state, id, 0, &mut out);
        out
    }
}

fn serialize_node(state: &MemoryHostState, id: InstanceId, out: &mut String) {
    let Some(node) = state.nodes.get(id) else {
        return;
    };
    match &node.kind {
        MemoryNodeKind::Text(text) => out.push_str(text),
        MemoryNodeKind::Container => {
            for child in &node.children {
                serialize_node(state, *child, out);
            }
        }
        MemoryNodeKind::Element { tag, attributes } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attributes {
                let _ = write!(out, " {name}=\"{value}\"");
            }
            if node.hidden {
                out.push_str(" hidden");
            }
            out.push('>');
            for child in &node.children {
                serialize_node(state, *child, out);
            }
            let _ = write!(out, "</{tag}>");
        }
    }
}

fn dump_node(state: &MemoryHostState, id: InstanceId, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let Some(node) = state.nodes.get(id) else {
        let _ = writeln!(out, "{indent}[{id}] (missing)");
        return;
    };
    let hidden = if node.hidden { " (hidden)" } else { "" };
    match &node.kind {
        MemoryNodeKind::Container => {
            let _ = writeln!(out, "{indent}[{id}] container");
        }
        MemoryNodeKind::Element { tag, .. } => {
            let _ = writeln!(out, "{indent}[{id}] <{tag}>{hidden}");
        }
        MemoryNodeKind::Text(text) => {
            let _ = writeln!(out, "{indent}[{id}] {text:?}{hidden}");
        }
    }
    for child in &node.children {
        dump_node(state, *child, depth + 1, out);
    }
}

impl HostConfig for MemoryHost {
    fn create_instance(&mut self, tag: &str, props: &HostProps) -> InstanceId {
        let mut state = self.inner.borrow_mut();
        let id = state.push(MemoryNode::new(MemoryNodeKind::Element {
            tag: tag.to_string(),
            attributes: props.attributes.clone(),
        }));
        state.ops.push(HostOp::CreateInstance {
            id,
            tag: tag.to_string(),
        });
        id
    }

    fn create_text_instance(&mut self, text: &str) -> InstanceId {
        let mut state = self.inner.borrow_mut();
        let id = state.push(MemoryNode::new(MemoryNodeKind::Text(text.to_string())));
        state.ops.push(HostOp::CreateText {
            id,
            text: text.to_string(),
        });
        id
    }

    fn append_child(&mut self, parent: InstanceId, child: InstanceId) {
        let mut state = self.inner.borrow_mut();
        if !state.exists(parent) || !state.exists(child) {
            return;
        }
        state.detach(child);
        state.nodes[parent].children.push(child);
        state.nodes[child].parent = Some(parent);
        state.ops.push(HostOp::Append { parent, child });
    }

    fn insert_before(&mut self, parent: InstanceId, child: InstanceId, before: InstanceId) {
        let mut state = self.inner.borrow_mut();
        if !state.exists(parent) || !state.exists(child) {
            return;
        }
        state.detach(child);
        let position = state.nodes[parent].children.iter().position(|id| *id == before);
        match position {
            Some(index) => state.nodes[parent].children.insert(index, child),
            None => {
                log::warn!("memory host: {before} is not a child of {parent}; appending {child}");
                state.nodes[parent].children.push(child);
            }
        }
        state.nodes[child].parent = Some(parent);
        state.ops.push(HostOp::InsertBefore { parent, child, before });
    }

    fn remove_child(&mut self, parent: InstanceId, child: InstanceId) {
        let mut state = self.inner.borrow_mut();
        if !state.exists(parent) || !state.exists(child) {
            return;
        }
        if state.nodes[child].parent != Some(parent) {
            log::warn!("memory host: {child} is not a child of {parent}");
            return;
        }
        state.detach(child);
        state.ops.push(HostOp::Remove { parent, child });
    }

    fn commit_update(&mut self, instance: InstanceId, props: &HostProps) {
        let mut state = self.inner.borrow_mut();
        if !state.exists(instance) {
            return;
        }
        if let MemoryNodeKind::Element { attributes, .. } = &mut state.nodes[instance].kind {
            *attributes = props.attributes.clone();
        }
        state.ops.push(HostOp::Update { id: instance });
    }

    fn commit_text_update(&mut self, instance: InstanceId, text: &str) {
        let mut state = self.inner.borrow_mut();
        if !state.exists(instance) {
            return;
        }
        let node = &mut state.nodes[instance];
        if let MemoryNodeKind::Text(content) = &mut node.kind {
            if !node.hidden {
                *content = text.to_string();
            }
        }
        state.ops.push(HostOp::TextUpdate {
            id: instance,
            text: text.to_string(),
        });
    }

    fn hide_instance(&mut self, instance: InstanceId) {
        let mut state = self.inner.borrow_mut();
        if state.exists(instance) {
            state.nodes[instance].hidden = true;
            state.ops.push(HostOp::Hide { id: instance });
        }
    }

    fn unhide_instance(&mut self, instance: InstanceId) {
        let mut state = self.inner.borrow_mut();
        if state.exists(instance) {
            state.nodes[instance].hidden = false;
            state.ops.push(HostOp::Unhide { id: instance });
        }
    }

    fn hide_text_instance(&mut self, instance: InstanceId) {
        let mut state = self.inner.borrow_mut();
        if !state.exists(instance) {
            return;
        }
        let node = &mut state.nodes[instance];
        node.hidden = true;
        if let MemoryNodeKind::Text(content) = &mut node.kind {
            content.clear();
        }
        state.ops.push(HostOp::Hide { id: instance });
    }

    fn unhide_text_instance(&mut self, instance: InstanceId, text: &str) {
        let mut state = self.inner.borrow_mut();
        if !state.exists(instance) {
            return;
        }
        let node = &mut state.nodes[instance];
        node.hidden = false;
        if let MemoryNodeKind::Text(content) = &mut node.kind {
            *content = text.to_string();
        }
        state.ops.push(HostOp::Unhide { id: instance });
    }

    fn schedule_microtask(&mut self, task: Box<dyn FnOnce()>) {
        self.inner.borrow_mut().microtasks.push_back(task);
    }
}
