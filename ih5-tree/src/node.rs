//! In-memory node tree: groups, datasets and their attributes.
//!
//! Paths are POSIX-style; a leading `/` is accepted and ignored, so `/a/b`
//! and `a/b` address the same node relative to the tree root. Children and
//! attributes are kept in `BTreeMap`s so that all listings come out in name
//! order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;
use crate::{Error, Result};

/// Kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Group,
    Dataset,
}

/// A node in the tree: either a group or a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Group(GroupNode),
    Dataset(DatasetNode),
}

/// Interior node holding named children and attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    pub attrs: BTreeMap<String, Value>,
    pub children: BTreeMap<String, Node>,
}

/// Leaf node holding a value and attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetNode {
    pub attrs: BTreeMap<String, Value>,
    pub value: Value,
}

impl DatasetNode {
    pub fn new(value: Value) -> Self {
        DatasetNode {
            attrs: BTreeMap::new(),
            value,
        }
    }
}

/// Split a path into its non-empty segments.
///
/// Returns an error only for paths that consist of nothing but separators
/// being used where a proper path is required; `/` itself maps to an empty
/// segment list (the root).
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Group(_) => NodeKind::Group,
            Node::Dataset(_) => NodeKind::Dataset,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Node::Group(_))
    }

    pub fn is_dataset(&self) -> bool {
        matches!(self, Node::Dataset(_))
    }

    pub fn attrs(&self) -> &BTreeMap<String, Value> {
        match self {
            Node::Group(g) => &g.attrs,
            Node::Dataset(d) => &d.attrs,
        }
    }

    pub fn attrs_mut(&mut self) -> &mut BTreeMap<String, Value> {
        match self {
            Node::Group(g) => &mut g.attrs,
            Node::Dataset(d) => &mut d.attrs,
        }
    }

    pub fn as_group(&self) -> Option<&GroupNode> {
        match self {
            Node::Group(g) => Some(g),
            Node::Dataset(_) => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut GroupNode> {
        match self {
            Node::Group(g) => Some(g),
            Node::Dataset(_) => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&DatasetNode> {
        match self {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }

    pub fn as_dataset_mut(&mut self) -> Option<&mut DatasetNode> {
        match self {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }
}

impl GroupNode {
    /// Look up a node by path. Returns `None` if any segment is missing or
    /// a non-terminal segment is a dataset.
    pub fn get(&self, path: &str) -> Option<&Node> {
        let segs = segments(path);
        if segs.is_empty() {
            return None; // the root is not a child of itself
        }
        let mut curr = self;
        for (i, seg) in segs.iter().enumerate() {
            let child = curr.children.get(*seg)?;
            if i + 1 == segs.len() {
                return Some(child);
            }
            curr = child.as_group()?;
        }
        None
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Node> {
        let segs = segments(path);
        if segs.is_empty() {
            return None;
        }
        let mut curr = self;
        for (i, seg) in segs.iter().enumerate() {
            let child = curr.children.get_mut(*seg)?;
            if i + 1 == segs.len() {
                return Some(child);
            }
            curr = child.as_group_mut()?;
        }
        None
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Navigate to the parent group of `path`, creating missing intermediate
    /// groups along the way. Fails if an intermediate segment is a dataset.
    fn ensure_parent(&mut self, segs: &[&str], full: &str) -> Result<&mut GroupNode> {
        let mut curr = self;
        for seg in &segs[..segs.len() - 1] {
            curr = curr
                .children
                .entry(seg.to_string())
                .or_insert_with(|| Node::Group(GroupNode::default()))
                .as_group_mut()
                .ok_or_else(|| Error::NotAGroup(format!("{full}: segment '{seg}'")))?;
        }
        Ok(curr)
    }

    /// Create a group at `path`, creating intermediate groups implicitly.
    pub fn create_group(&mut self, path: &str) -> Result<&mut GroupNode> {
        let segs = segments(path);
        if segs.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }
        let parent = self.ensure_parent(&segs, path)?;
        let name = segs[segs.len() - 1];
        if parent.children.contains_key(name) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let node = parent
            .children
            .entry(name.to_string())
            .or_insert_with(|| Node::Group(GroupNode::default()));
        Ok(node.as_group_mut().expect("freshly inserted group"))
    }

    /// Create a dataset at `path`, creating intermediate groups implicitly.
    pub fn create_dataset(&mut self, path: &str, value: Value) -> Result<&mut DatasetNode> {
        let segs = segments(path);
        if segs.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }
        let parent = self.ensure_parent(&segs, path)?;
        let name = segs[segs.len() - 1];
        if parent.children.contains_key(name) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let node = parent
            .children
            .entry(name.to_string())
            .or_insert_with(|| Node::Dataset(DatasetNode::new(value)));
        Ok(node.as_dataset_mut().expect("freshly inserted dataset"))
    }

    /// Remove the node at `path` (recursively, for groups) and return it.
    pub fn remove(&mut self, path: &str) -> Result<Node> {
        let segs = segments(path);
        if segs.is_empty() {
            return Err(Error::InvalidPath("cannot remove the root".to_string()));
        }
        let mut curr = self;
        for seg in &segs[..segs.len() - 1] {
            curr = curr
                .children
                .get_mut(*seg)
                .and_then(Node::as_group_mut)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
        }
        curr.children
            .remove(segs[segs.len() - 1])
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// Preorder walk in name order. The callback receives paths relative to
    /// this group, without a leading slash.
    pub fn visit<F: FnMut(&str, &Node)>(&self, f: &mut F) {
        fn rec<F: FnMut(&str, &Node)>(g: &GroupNode, prefix: &str, f: &mut F) {
            for (name, node) in &g.children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                f(&path, node);
                if let Node::Group(sub) = node {
                    rec(sub, &path, f);
                }
            }
        }
        rec(self, "", f)
    }

    /// Returns true if the group has neither children nor attributes.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.attrs.is_empty()
    }
}
