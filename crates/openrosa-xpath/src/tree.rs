//! In-memory tree implementation of [`DataNode`] used by tests and by the
//! form layer to materialize parsed instances.
//!
//! Nodes are `Arc`-backed with weak parent links; identity (and thus
//! node-set deduplication) is pointer identity, not structural equality.
//!
//! ```
//! use openrosa_xpath::tree::{elem, text, attr};
//! use openrosa_xpath::DataNode;
//!
//! // <data id="d"><a>1</a><b/></data>
//! let data = elem("data")
//!     .attr(attr("id", "d"))
//!     .child(elem("a").child(text("1")))
//!     .child(elem("b"))
//!     .build();
//!
//! assert_eq!(data.name().unwrap().local, "data");
//! assert_eq!(data.string_value(), "1");
//! ```

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use crate::model::{DataNode, NodeKind, QName};

#[derive(Debug)]
struct Inner {
    kind: NodeKind,
    name: Option<QName>,
    value: RwLock<Option<String>>, // text / attribute / comment / PI content
    parent: RwLock<Option<Weak<Inner>>>,
    attributes: RwLock<Vec<TreeNode>>,
    children: RwLock<Vec<TreeNode>>,
    cached_text: RwLock<Option<String>>, // memoized string value for element/document
}

/// An `Arc`-backed ordered tree node.
#[derive(Clone)]
pub struct TreeNode(Arc<Inner>);

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for TreeNode {}

impl std::hash::Hash for TreeNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeNode")
            .field("kind", &self.0.kind)
            .field("name", &self.0.name)
            .field("value", &self.0.value)
            .finish()
    }
}

impl TreeNode {
    fn new(kind: NodeKind, name: Option<QName>, value: Option<String>) -> Self {
        TreeNode(Arc::new(Inner {
            kind,
            name,
            value: RwLock::new(value),
            parent: RwLock::new(None),
            attributes: RwLock::new(Vec::new()),
            children: RwLock::new(Vec::new()),
            cached_text: RwLock::new(None),
        }))
    }

    pub fn document() -> TreeNodeBuilder {
        TreeNodeBuilder::new(NodeKind::Document, None, None)
    }

    pub fn element(name: &str) -> TreeNodeBuilder {
        TreeNodeBuilder::new(NodeKind::Element, Some(parse_name(name)), None)
    }

    pub fn attribute(name: &str, value: &str) -> TreeNode {
        TreeNode::new(NodeKind::Attribute, Some(parse_name(name)), Some(value.to_string()))
    }

    pub fn text(value: &str) -> TreeNode {
        TreeNode::new(NodeKind::Text, None, Some(value.to_string()))
    }

    pub fn comment(value: &str) -> TreeNode {
        TreeNode::new(NodeKind::Comment, None, Some(value.to_string()))
    }

    pub fn pi(target: &str, data: &str) -> TreeNode {
        TreeNode::new(
            NodeKind::ProcessingInstruction,
            Some(QName::local(target)),
            Some(data.to_string()),
        )
    }

    /// Value of the named attribute, if present.
    pub fn attribute_value(&self, local: &str) -> Option<String> {
        self.attributes()
            .into_iter()
            .find(|a| a.name().is_some_and(|n| n.local == local))
            .map(|a| a.string_value())
    }
}

fn parse_name(name: &str) -> QName {
    match name.find(':') {
        Some(idx) => QName::prefixed(&name[..idx], &name[idx + 1..]),
        None => QName::local(name),
    }
}

pub struct TreeNodeBuilder {
    node: TreeNode,
    pending_children: Vec<TreeNode>,
    pending_attrs: Vec<TreeNode>,
}

impl TreeNodeBuilder {
    fn new(kind: NodeKind, name: Option<QName>, value: Option<String>) -> Self {
        Self {
            node: TreeNode::new(kind, name, value),
            pending_children: Vec::new(),
            pending_attrs: Vec::new(),
        }
    }

    pub fn child(mut self, child: impl Into<TreeNodeOrBuilder>) -> Self {
        match child.into() {
            TreeNodeOrBuilder::Built(n) => self.pending_children.push(n),
            TreeNodeOrBuilder::Builder(b) => self.pending_children.push(b.build()),
        }
        self
    }

    pub fn children<I: IntoIterator<Item = TreeNodeOrBuilder>>(mut self, it: I) -> Self {
        for c in it {
            match c {
                TreeNodeOrBuilder::Built(n) => self.pending_children.push(n),
                TreeNodeOrBuilder::Builder(b) => self.pending_children.push(b.build()),
            }
        }
        self
    }

    pub fn attr(mut self, attr: TreeNode) -> Self {
        debug_assert!(attr.kind() == NodeKind::Attribute);
        self.pending_attrs.push(attr);
        self
    }

    pub fn attrs<I: IntoIterator<Item = TreeNode>>(mut self, attrs: I) -> Self {
        for a in attrs {
            debug_assert!(a.kind() == NodeKind::Attribute);
            self.pending_attrs.push(a);
        }
        self
    }

    pub fn build(self) -> TreeNode {
        {
            let mut attrs = self.node.0.attributes.write().expect("attribute lock");
            for a in &self.pending_attrs {
                *a.0.parent.write().expect("parent lock") = Some(Arc::downgrade(&self.node.0));
            }
            attrs.extend(self.pending_attrs);
        }
        {
            let mut ch = self.node.0.children.write().expect("child lock");
            for c in &self.pending_children {
                *c.0.parent.write().expect("parent lock") = Some(Arc::downgrade(&self.node.0));
            }
            ch.extend(self.pending_children);
        }
        if matches!(self.node.kind(), NodeKind::Element | NodeKind::Document) {
            // Populate the string value memo while the tree is still private.
            let _ = self.node.string_value();
        }
        self.node
    }
}

pub enum TreeNodeOrBuilder {
    Built(TreeNode),
    Builder(TreeNodeBuilder),
}

impl From<TreeNode> for TreeNodeOrBuilder {
    fn from(n: TreeNode) -> Self {
        TreeNodeOrBuilder::Built(n)
    }
}

impl From<TreeNodeBuilder> for TreeNodeOrBuilder {
    fn from(b: TreeNodeBuilder) -> Self {
        TreeNodeOrBuilder::Builder(b)
    }
}

// Convenience helpers for concise tree construction in tests.
pub fn doc() -> TreeNodeBuilder {
    TreeNode::document()
}
pub fn elem(name: &str) -> TreeNodeBuilder {
    TreeNode::element(name)
}
pub fn text(v: &str) -> TreeNode {
    TreeNode::text(v)
}
pub fn attr(name: &str, v: &str) -> TreeNode {
    TreeNode::attribute(name, v)
}
pub fn comment(v: &str) -> TreeNode {
    TreeNode::comment(v)
}

impl DataNode for TreeNode {
    fn kind(&self) -> NodeKind {
        self.0.kind
    }

    fn name(&self) -> Option<QName> {
        self.0.name.clone()
    }

    fn string_value(&self) -> String {
        match self.kind() {
            NodeKind::Text
            | NodeKind::Attribute
            | NodeKind::Comment
            | NodeKind::ProcessingInstruction => {
                self.0.value.read().expect("value lock").clone().unwrap_or_default()
            }
            NodeKind::Element | NodeKind::Document => {
                if let Some(cached) = self.0.cached_text.read().expect("memo lock").clone() {
                    return cached;
                }
                fn dfs(n: &TreeNode, out: &mut String) {
                    if n.kind() == NodeKind::Text {
                        if let Some(v) = &*n.0.value.read().expect("value lock") {
                            out.push_str(v);
                        }
                    }
                    for c in n.children() {
                        dfs(&c, out);
                    }
                }
                let mut out = String::new();
                dfs(self, &mut out);
                *self.0.cached_text.write().expect("memo lock") = Some(out.clone());
                out
            }
        }
    }

    fn parent(&self) -> Option<Self> {
        self.0
            .parent
            .read()
            .ok()?
            .as_ref()
            .and_then(Weak::upgrade)
            .map(TreeNode)
    }

    fn children(&self) -> Vec<Self> {
        self.0.children.read().map(|v| v.clone()).unwrap_or_default()
    }

    fn attributes(&self) -> Vec<Self> {
        self.0.attributes.read().map(|v| v.clone()).unwrap_or_default()
    }
}
