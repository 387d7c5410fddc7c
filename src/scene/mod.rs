//! Opaque scene fragments.
//!
//! The engine produces renderable fragments and assembles them into groups,
//! but never inspects fragment internals; the renderer is an external
//! collaborator. [`Node`] is the opaque handle handed across that boundary,
//! and [`Group`] is a node with an ordered, mutable child list.
//!
//! A container hands out its group node once; subsequent rebuilds mutate
//! the group's children in place, so parents observe updates without
//! re-attaching the fragment.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Identifies one paged subgraph of a large tiled dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    /// Subdivision level.
    pub level: u32,
    /// Row within the level.
    pub row: u32,
    /// Column within the level.
    pub col: u32,
}

impl PageKey {
    /// Create a page key.
    pub fn new(level: u32, row: u32, col: u32) -> Self {
        Self { level, row, col }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}/{}/{}", self.level, self.row, self.col)
    }
}

#[derive(Debug)]
struct NodeInner {
    label: Mutex<String>,
    /// `Some` for group nodes, `None` for leaves.
    children: Option<Mutex<Vec<Node>>>,
}

/// Opaque renderable fragment.
///
/// Nodes are cheap reference-counted handles; equality is handle identity,
/// never structural comparison.
#[derive(Debug, Clone)]
pub struct Node(Arc<NodeInner>);

impl Node {
    /// Create a leaf fragment with a diagnostic label.
    pub fn leaf(label: impl Into<String>) -> Self {
        Self(Arc::new(NodeInner {
            label: Mutex::new(label.into()),
            children: None,
        }))
    }

    /// The node's diagnostic label.
    pub fn label(&self) -> String {
        self.0.label.lock().expect("node label poisoned").clone()
    }

    /// True if both handles refer to the same fragment.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of children; zero for leaves.
    pub fn child_count(&self) -> usize {
        match &self.0.children {
            Some(children) => children.lock().expect("node children poisoned").len(),
            None => 0,
        }
    }

    /// Snapshot of the children; empty for leaves.
    pub fn children(&self) -> Vec<Node> {
        match &self.0.children {
            Some(children) => children.lock().expect("node children poisoned").clone(),
            None => Vec::new(),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// A group node with an ordered, mutable child list.
#[derive(Debug, Clone)]
pub struct Group(Node);

impl Group {
    /// Create an empty group.
    pub fn new(label: impl Into<String>) -> Self {
        Self(Node(Arc::new(NodeInner {
            label: Mutex::new(label.into()),
            children: Some(Mutex::new(Vec::new())),
        })))
    }

    /// The group viewed as an opaque node.
    pub fn node(&self) -> Node {
        self.0.clone()
    }

    /// Replace the diagnostic label.
    pub fn set_label(&self, label: impl Into<String>) {
        *self.0 .0.label.lock().expect("node label poisoned") = label.into();
    }

    /// Append a child, preserving insertion order.
    pub fn add_child(&self, child: Node) {
        self.children_mut().push(child);
    }

    /// Remove all children.
    pub fn clear_children(&self) {
        self.children_mut().clear();
    }

    /// Number of children.
    pub fn child_count(&self) -> usize {
        self.0.child_count()
    }

    /// Snapshot of the children in order.
    pub fn children(&self) -> Vec<Node> {
        self.0.children()
    }

    fn children_mut(&self) -> std::sync::MutexGuard<'_, Vec<Node>> {
        self.0
             .0
            .children
            .as_ref()
            .expect("group node has children")
            .lock()
            .expect("node children poisoned")
    }
}
