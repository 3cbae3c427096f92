//! Overlay view over a base container and its patches.
//!
//! The overlay lifts the tree interface of a single storage file to a whole
//! chain of containers: reads resolve against the merged view, writes go to
//! the newest (writable) container only.
//!
//! ## Markers
//!
//! - A **deletion marker** is a scalar raw value of one DELETE byte stored
//!   as a dataset (or attribute value). A path whose newest version is this
//!   marker is logically absent.
//! - A **substitution marker** is a reserved attribute key on a group. A
//!   group without it is *virtual*: it only carries patch contributions. A
//!   group with it was explicitly (re)created there and overrides all older
//!   content at its path.
//!
//! ## Creation index
//!
//! Every node handle carries a `creation_index`, the position in the file
//! list below which it never looks. A substituted group created in patch n
//! resolves children starting at n, which is how it hides older content
//! without re-checking for substitution on every lookup.

use std::cell::{Ref, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;

use ih5_tree::{GroupNode, Node as TreeNode, Value};

use crate::chain::{ChainState, SharedChain};
use crate::error::{Error, Result};

/// Byte of the deletion marker value (ASCII DELETE).
pub(crate) const DEL_BYTE: u8 = 0x7F;

/// Attribute key marking a substituted (non-virtual) group (ASCII SUBSTITUTE).
pub(crate) const SUBST_KEY: &str = "\u{1a}";

/// The deletion marker value.
pub(crate) fn deletion_value() -> Value {
    Value::Raw(vec![DEL_BYTE])
}

/// Whether a value is the deletion marker.
pub(crate) fn is_deletion_value(val: &Value) -> bool {
    matches!(val, Value::Raw(b) if b.as_slice() == [DEL_BYTE])
}

fn tree_node_is_del(node: &TreeNode) -> bool {
    node.as_dataset().is_some_and(|d| is_deletion_value(&d.value))
}

/// Virtual nodes are groups without the substitution marker; they only carry
/// child nodes and attributes.
fn tree_node_is_virtual(node: &TreeNode) -> bool {
    match node {
        TreeNode::Group(g) => !g.attrs.contains_key(SUBST_KEY),
        TreeNode::Dataset(_) => false,
    }
}

/// Validate a key used in bracket-style access.
///
/// Keys are printable ASCII without whitespace; `@` is reserved as the
/// attribute separator in skeletons. Attribute keys additionally must not
/// contain `/` or collide with the substitution marker.
fn check_key(key: &str, attrs: bool) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey(key.to_string()));
    }
    if key.contains('@') {
        return Err(Error::InvalidKey(key.to_string()));
    }
    if attrs && (key.contains('/') || key == SUBST_KEY) {
        return Err(Error::InvalidKey(key.to_string()));
    }
    if !key.chars().all(|c| ('!'..='~').contains(&c)) {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Path of the parent node; the root is its own parent.
pub(crate) fn parent_path(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }
    match path.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((pre, _)) => pre.to_string(),
        None => "/".to_string(),
    }
}

/// Absolutize `path` relative to `base` (pass absolute paths through).
pub(crate) fn abs_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    let pref = if base == "/" { "" } else { base };
    format!("{pref}/{path}")
}

/// Relativize `path` with respect to `base` (pass relative paths through).
pub(crate) fn rel_path(base: &str, path: &str) -> String {
    if !path.starts_with('/') {
        return path.to_string();
    }
    let start = base.len() + usize::from(base != "/");
    path[start.min(path.len())..].to_string()
}

/// A node of one underlying container: either its root group or an interior
/// tree node. The root is a group that can never carry the substitution
/// marker, so it is always virtual.
#[derive(Clone, Copy)]
enum Entry<'a> {
    Root(&'a GroupNode),
    Node(&'a TreeNode),
}

impl<'a> Entry<'a> {
    fn is_del(self) -> bool {
        match self {
            Entry::Root(_) => false,
            Entry::Node(n) => tree_node_is_del(n),
        }
    }

    fn is_virtual(self) -> bool {
        match self {
            Entry::Root(g) => !g.attrs.contains_key(SUBST_KEY),
            Entry::Node(n) => tree_node_is_virtual(n),
        }
    }

    fn as_group(self) -> Option<&'a GroupNode> {
        match self {
            Entry::Root(g) => Some(g),
            Entry::Node(TreeNode::Group(g)) => Some(g),
            Entry::Node(TreeNode::Dataset(_)) => None,
        }
    }

    fn attrs(self) -> &'a BTreeMap<String, Value> {
        match self {
            Entry::Root(g) => &g.attrs,
            Entry::Node(n) => n.attrs(),
        }
    }
}

/// Node of container `fidx` at `gpath`, if present.
fn entry_in<'a>(state: &'a ChainState, fidx: usize, gpath: &str) -> Option<Entry<'a>> {
    let root = state.containers[fidx].tree.root();
    if gpath == "/" {
        Some(Entry::Root(root))
    } else {
        root.get(gpath).map(Entry::Node)
    }
}

/// Mutable attribute map of the node at `gpath` in the tail container.
fn tail_attrs_mut<'a>(
    root: &'a mut GroupNode,
    gpath: &str,
) -> Option<&'a mut BTreeMap<String, Value>> {
    if gpath == "/" {
        Some(&mut root.attrs)
    } else {
        root.get_mut(gpath).map(TreeNode::attrs_mut)
    }
}

/// Latest container index where the entity at `gpath` was created or
/// overridden; `None` if absent or deleted.
pub(crate) fn latest_container_idx(state: &ChainState, gpath: &str) -> Option<usize> {
    let mut idx = None;
    for i in (0..state.containers.len()).rev() {
        if let Some(entry) = entry_in(state, i, gpath) {
            if entry.is_del() {
                return None;
            }
            if entry.is_virtual() {
                idx = Some(i);
            } else {
                return Some(i);
            }
        }
    }
    idx
}

/// Find the container supplying the current version of one child or
/// attribute of the entity at `gpath`, walking files from newest to oldest
/// (never below `cidx`):
///
/// - a deletion marker makes the name logically absent
/// - a dataset or a substituted group wins as content
/// - a virtual group only lowers the bound for further lookups; if nothing
///   overrides, the oldest virtual occurrence is returned
fn resolve_child(
    state: &ChainState,
    gpath: &str,
    name: &str,
    cidx: usize,
    attrs: bool,
) -> Option<usize> {
    if attrs {
        // attribute values are plain data, the newest occurrence decides
        for i in (cidx..state.containers.len()).rev() {
            if let Some(entry) = entry_in(state, i, gpath) {
                if let Some(val) = entry.attrs().get(name) {
                    return if is_deletion_value(val) { None } else { Some(i) };
                }
            }
        }
        None
    } else {
        let path = abs_path(gpath, name);
        let mut lower_bound = None;
        for i in (cidx..state.containers.len()).rev() {
            if let Some(node) = state.containers[i].tree.root().get(&path) {
                if tree_node_is_del(node) {
                    return None;
                }
                if tree_node_is_virtual(node) {
                    lower_bound = Some(i);
                } else {
                    return Some(i);
                }
            }
        }
        lower_bound
    }
}

/// Merged children of the entity at `gpath`, as child name to the container
/// index supplying its current version (for virtual groups: the lower bound
/// for further lookups). Deleted children and the substitution marker are
/// filtered out; iteration order is alphabetical.
fn merged_children(
    state: &ChainState,
    gpath: &str,
    cidx: usize,
    attrs: bool,
) -> BTreeMap<String, usize> {
    let mut names: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for i in (cidx..state.containers.len()).rev() {
        let Some(entry) = entry_in(state, i, gpath) else {
            continue;
        };
        if attrs {
            names.extend(entry.attrs().keys().cloned());
        } else if let Some(group) = entry.as_group() {
            names.extend(group.children.keys().cloned());
        }
    }

    let mut children = BTreeMap::new();
    for name in names {
        if attrs && name == SUBST_KEY {
            continue;
        }
        if let Some(idx) = resolve_child(state, gpath, &name, cidx, attrs) {
            children.insert(name, idx);
        }
    }
    children
}

fn make_node(state: &ChainState, chain: &SharedChain, path: String, fidx: usize) -> Node {
    let is_group = entry_in(state, fidx, &path).is_some_and(|e| e.as_group().is_some());
    if is_group {
        Node::Group(Group {
            chain: chain.clone(),
            path,
            cidx: fidx,
        })
    } else {
        Node::Dataset(Dataset {
            chain: chain.clone(),
            path,
            cidx: fidx,
        })
    }
}

/// A group in the merged view.
#[derive(Clone)]
pub struct Group {
    pub(crate) chain: SharedChain,
    pub(crate) path: String,
    pub(crate) cidx: usize,
}

/// A dataset in the merged view.
#[derive(Clone)]
pub struct Dataset {
    pub(crate) chain: SharedChain,
    pub(crate) path: String,
    pub(crate) cidx: usize,
}

/// The attributes attached to a group or dataset in the merged view.
#[derive(Clone)]
pub struct AttributeSet {
    pub(crate) chain: SharedChain,
    pub(crate) path: String,
    pub(crate) cidx: usize,
}

/// A group or dataset handle in the merged view.
#[derive(Clone, PartialEq)]
pub enum Node {
    Group(Group),
    Dataset(Dataset),
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.chain, &other.chain) && self.path == other.path && self.cidx == other.cidx
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.chain, &other.chain) && self.path == other.path && self.cidx == other.cidx
    }
}

impl PartialEq for AttributeSet {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.chain, &other.chain) && self.path == other.path && self.cidx == other.cidx
    }
}

impl core::fmt::Debug for Group {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Group({:?}, cidx={})", self.path, self.cidx)
    }
}

impl core::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Dataset({:?}, cidx={})", self.path, self.cidx)
    }
}

impl core::fmt::Debug for AttributeSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "AttributeSet({:?}, cidx={})", self.path, self.cidx)
    }
}

impl core::fmt::Debug for Node {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Node::Group(g) => g.fmt(f),
            Node::Dataset(d) => d.fmt(f),
        }
    }
}

impl Node {
    /// Absolute path of this node.
    pub fn name(&self) -> &str {
        match self {
            Node::Group(g) => g.name(),
            Node::Dataset(d) => d.name(),
        }
    }

    /// Left bound in the file list used when resolving content.
    pub fn creation_index(&self) -> usize {
        match self {
            Node::Group(g) => g.creation_index(),
            Node::Dataset(d) => d.creation_index(),
        }
    }

    pub fn attrs(&self) -> AttributeSet {
        match self {
            Node::Group(g) => g.attrs(),
            Node::Dataset(d) => d.attrs(),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Node::Group(_))
    }

    pub fn is_dataset(&self) -> bool {
        matches!(self, Node::Dataset(_))
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Group(g) => Some(g),
            Node::Dataset(_) => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }
}

/// Root group of an open chain.
pub(crate) fn root_group(chain: SharedChain) -> Result<Group> {
    let cidx = {
        let st = chain.borrow();
        st.expect_open()?;
        // the root exists in every container and never carries the
        // substitution marker, so this is the oldest container index
        latest_container_idx(&st, "/").unwrap_or(0)
    };
    Ok(Group {
        chain,
        path: "/".to_string(),
        cidx,
    })
}

macro_rules! impl_node_common {
    ($t:ty) => {
        impl $t {
            /// Absolute path of this node within the record.
            pub fn name(&self) -> &str {
                &self.path
            }

            /// Left bound in the file list used when resolving content.
            pub fn creation_index(&self) -> usize {
                self.cidx
            }

            fn state(&self) -> Result<Ref<'_, ChainState>> {
                let st = self.chain.borrow();
                st.expect_open()?;
                Ok(st)
            }

            fn state_mut(&self) -> Result<RefMut<'_, ChainState>> {
                let st = self.chain.borrow_mut();
                st.expect_open()?;
                Ok(st)
            }

            fn expect_writable(&self) -> Result<()> {
                if self.state()?.is_read_only() {
                    return Err(Error::ReadOnly);
                }
                Ok(())
            }
        }
    };
}

impl_node_common!(Group);
impl_node_common!(Dataset);
impl_node_common!(AttributeSet);

impl Group {
    /// Parent group; the root is its own parent.
    pub fn parent(&self) -> Result<Group> {
        let pp = parent_path(&self.path);
        match root_group(self.chain.clone())?.get(&pp)? {
            Node::Group(g) => Ok(g),
            Node::Dataset(d) => Err(Error::NotAGroup(d.path)),
        }
    }

    /// Attributes attached to this group.
    pub fn attrs(&self) -> AttributeSet {
        AttributeSet {
            chain: self.chain.clone(),
            path: self.path.clone(),
            cidx: self.cidx,
        }
    }

    fn root_of(&self, st: &ChainState) -> Group {
        Group {
            chain: self.chain.clone(),
            path: "/".to_string(),
            cidx: latest_container_idx(st, "/").unwrap_or(0),
        }
    }

    /// One overlay node per existing path prefix of `path`, starting at this
    /// group (or the root, for absolute paths).
    fn node_seq(&self, st: &ChainState, path: &str) -> Result<Vec<Node>> {
        let mut curr = if path.starts_with('/') {
            Node::Group(self.root_of(st))
        } else {
            Node::Group(self.clone())
        };
        let mut ret = vec![curr.clone()];
        if path == "/" || path == "." {
            return Ok(ret);
        }

        let trimmed = path.trim_matches('/');
        let segs: Vec<&str> = trimmed.split('/').collect();
        for (i, seg) in segs.iter().enumerate() {
            let grp = match &curr {
                Node::Group(g) => g.clone(),
                Node::Dataset(d) => return Err(Error::NotAGroup(d.path.clone())),
            };
            let children = merged_children(st, &grp.path, grp.cidx, false);
            let Some(&nxt) = children.get(*seg) else {
                return Ok(ret); // not found, return the existing prefix
            };
            let child_path = abs_path(&grp.path, seg);
            curr = make_node(st, &self.chain, child_path.clone(), nxt);
            ret.push(curr.clone());
            if i + 1 < segs.len() && curr.is_dataset() {
                return Err(Error::NotAGroup(child_path));
            }
        }
        Ok(ret)
    }

    /// Container index holding the current version of `key`, if any.
    fn find_cidx(&self, st: &ChainState, key: &str) -> Result<Option<usize>> {
        let nodes = self.node_seq(st, key)?;
        let last = nodes.last().expect("sequence is never empty");
        if last.name() == abs_path(&self.path, key) {
            Ok(Some(last.creation_index()))
        } else {
            Ok(None)
        }
    }

    /// Look up a child node, `None` if the path does not exist.
    pub fn get_opt(&self, key: &str) -> Result<Option<Node>> {
        check_key(key, false)?;
        let st = self.state()?;
        match self.find_cidx(&st, key)? {
            Some(cidx) => {
                let path = abs_path(&self.path, key);
                Ok(Some(make_node(&st, &self.chain, path, cidx)))
            }
            None => Ok(None),
        }
    }

    /// Look up a child node.
    pub fn get(&self, key: &str) -> Result<Node> {
        self.get_opt(key)?
            .ok_or_else(|| Error::NotFound(abs_path(&self.path, key)))
    }

    /// Look up a child group, failing if the path holds a dataset.
    pub fn get_group(&self, key: &str) -> Result<Group> {
        match self.get(key)? {
            Node::Group(g) => Ok(g),
            Node::Dataset(d) => Err(Error::NotAGroup(d.path)),
        }
    }

    /// Look up a child dataset, failing if the path holds a group.
    pub fn get_dataset(&self, key: &str) -> Result<Dataset> {
        match self.get(key)? {
            Node::Dataset(d) => Ok(d),
            Node::Group(g) => Err(Error::NotFound(format!("{}: is a group", g.path))),
        }
    }

    /// Whether the path exists in the merged view.
    pub fn contains(&self, key: &str) -> Result<bool> {
        check_key(key, false)?;
        let st = self.state()?;
        Ok(self.find_cidx(&st, key)?.is_some())
    }

    /// Names of the children of this group, in alphabetical order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let st = self.state()?;
        Ok(merged_children(&st, &self.path, self.cidx, false)
            .into_keys()
            .collect())
    }

    /// Number of children of this group.
    pub fn len(&self) -> Result<usize> {
        let st = self.state()?;
        Ok(merged_children(&st, &self.path, self.cidx, false).len())
    }

    /// Whether this group has no children.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Child nodes of this group, in alphabetical order.
    pub fn values(&self) -> Result<Vec<Node>> {
        Ok(self.items()?.into_iter().map(|(_, v)| v).collect())
    }

    /// Pairs of child name and node, in alphabetical order.
    pub fn items(&self) -> Result<Vec<(String, Node)>> {
        let st = self.state()?;
        Ok(merged_children(&st, &self.path, self.cidx, false)
            .into_iter()
            .map(|(k, idx)| {
                let node = make_node(&st, &self.chain, abs_path(&self.path, &k), idx);
                (k, node)
            })
            .collect())
    }

    /// Walk all descendants in preorder, alphabetically, calling `f` with
    /// the path relative to this group. Errors from `f` abort the walk.
    pub fn visititems<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &Node) -> Result<()>,
    {
        let mut stack: Vec<Node> = {
            let mut children = self.values()?;
            children.reverse();
            children
        };
        while let Some(curr) = stack.pop() {
            let rel = rel_path(&self.path, curr.name());
            f(&rel, &curr)?;
            if let Node::Group(g) = &curr {
                let mut children = g.values()?;
                children.reverse();
                stack.extend(children);
            }
        }
        Ok(())
    }

    /// Walk all descendant paths in preorder, alphabetically.
    pub fn visit<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<()>,
    {
        self.visititems(|path, _| f(path))
    }

    /// Create a group, overriding whatever older containers hold at the
    /// path. In a patch the new group carries the substitution marker.
    pub fn create_group(&self, gpath: &str) -> Result<Group> {
        check_key(gpath, false)?;
        self.expect_writable()?;
        let path = abs_path(&self.path, gpath);
        {
            let st = self.state()?;
            let nodes = self.node_seq(&st, gpath)?;
            let last = nodes.last().expect("sequence is never empty");
            if last.name() == path {
                return Err(Error::PathConflict(path));
            }
            if let Node::Dataset(d) = last {
                return Err(Error::NotAGroup(d.path.clone()));
            }
        }

        let mut st = self.state_mut()?;
        let has_patches = st.containers.len() > 1;
        let last_idx = st.last_idx();
        let root = st.tail_mut().tree.root_mut()?;
        // clear a deletion marker left at this path in the current patch
        if root.get(&path).is_some_and(tree_node_is_del) {
            root.remove(&path)?;
        }
        let group = root.create_group(&path)?;
        if has_patches {
            // intent is to create, not to contribute: mark as substituted
            group.attrs.insert(SUBST_KEY.to_string(), Value::Empty);
        }
        drop(st);
        Ok(Group {
            chain: self.chain.clone(),
            path,
            cidx: last_idx,
        })
    }

    /// Create the chain of groups required so that `path` exists in the
    /// writable container: the first missing segment is created as a
    /// substituted group, the remaining ones as plain virtual groups.
    fn create_virtual(&self, key: &str) -> Result<()> {
        let path = abs_path(&self.path, key);
        let (anchor, first_missing, deep) = {
            let st = self.state()?;
            let nodes = self.node_seq(&st, key)?;
            let last = nodes.last().expect("sequence is never empty");
            if last.name() == path && last.creation_index() == st.last_idx() {
                return Ok(()); // already present in the newest container
            }
            if last.name() == path {
                return Ok(()); // resolvable from an older container
            }
            let suffix = rel_path(last.name(), &path);
            let segs: Vec<&str> = suffix.split('/').collect();
            (
                last.name().to_string(),
                segs[0].to_string(),
                segs.len() > 1,
            )
        };

        self.create_group(&abs_path(&anchor, &first_missing))?;
        if deep {
            let mut st = self.state_mut()?;
            st.tail_mut().tree.root_mut()?.create_group(&path)?;
        }
        Ok(())
    }

    /// Create a dataset holding `value`, overriding whatever older
    /// containers hold at the path. Parent groups are created as needed.
    pub fn create_dataset(&self, key: &str, value: impl Into<Value>) -> Result<Dataset> {
        let value = value.into();
        check_key(key, false)?;
        self.expect_writable()?;
        if is_deletion_value(&value) {
            return Err(Error::ForbiddenValue(
                "the deletion marker cannot be stored as a user value".to_string(),
            ));
        }
        let path = abs_path(&self.path, key);
        {
            let st = self.state()?;
            if self.find_cidx(&st, key)?.is_some() {
                return Err(Error::PathConflict(path));
            }
        }

        let in_tail_as_del = {
            let st = self.state()?;
            let root = st.tail().tree.root();
            match root.get(&path) {
                Some(n) => tree_node_is_del(n),
                None => false,
            }
        };
        if in_tail_as_del {
            let mut st = self.state_mut()?;
            st.tail_mut().tree.root_mut()?.remove(&path)?;
        } else {
            let in_tail = {
                let st = self.state()?;
                st.tail().tree.root().contains(&path)
            };
            if !in_tail {
                // build the group scaffolding in the writable container,
                // then replace the leaf group with the dataset
                self.create_virtual(key)?;
                let mut st = self.state_mut()?;
                st.tail_mut().tree.root_mut()?.remove(&path)?;
            }
        }

        let mut st = self.state_mut()?;
        let last_idx = st.last_idx();
        st.tail_mut().tree.root_mut()?.create_dataset(&path, value)?;
        drop(st);
        Ok(Dataset {
            chain: self.chain.clone(),
            path,
            cidx: last_idx,
        })
    }

    /// Dict-style assignment: create a dataset at `key`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.create_dataset(key, value).map(|_| ())
    }

    /// Return the group at `path`, creating it if nothing exists there.
    pub fn require_group(&self, path: &str) -> Result<Group> {
        match self.get_opt(path)? {
            Some(Node::Group(g)) => Ok(g),
            Some(Node::Dataset(d)) => Err(Error::PathConflict(d.path)),
            None => self.create_group(path),
        }
    }

    /// Return the dataset at `path`, creating it with `value` if nothing
    /// exists there.
    pub fn require_dataset(&self, path: &str, value: impl Into<Value>) -> Result<Dataset> {
        match self.get_opt(path)? {
            Some(Node::Dataset(d)) => Ok(d),
            Some(Node::Group(g)) => Err(Error::PathConflict(g.path)),
            None => self.create_dataset(path, value),
        }
    }

    /// Delete the entity at `key` from the merged view.
    ///
    /// Removes any occurrence in the writable container; if older containers
    /// still hold content at the path, a deletion marker is written.
    pub fn delete(&self, key: &str) -> Result<()> {
        check_key(key, false)?;
        self.expect_writable()?;
        let found = {
            let st = self.state()?;
            self.find_cidx(&st, key)?
        };
        let path = abs_path(&self.path, key);
        if found.is_none() {
            return Err(Error::NotFound(path));
        }

        let mut st = self.state_mut()?;
        let has_patches = st.containers.len() > 1;
        let root = st.tail_mut().tree.root_mut()?;
        if root.contains(&path) {
            root.remove(&path)?;
        }
        if has_patches {
            root.create_dataset(&path, deletion_value())?;
        }
        Ok(())
    }

    /// Deep-copy a node (from this or another record) to a fresh path below
    /// this group, including all attributes.
    pub fn create_copy(&self, target_path: &str, source: &Node) -> Result<()> {
        if target_path.is_empty() {
            return Err(Error::InvalidKey(target_path.to_string()));
        }
        if self.contains(target_path)? {
            return Err(Error::PathConflict(abs_path(&self.path, target_path)));
        }
        match source {
            Node::Dataset(src) => {
                let ds = self.create_dataset(target_path, src.value()?)?;
                for (k, v) in src.attrs().items()? {
                    ds.attrs().set(&k, v)?;
                }
            }
            Node::Group(src) => {
                let group = self.create_group(target_path)?;
                for (k, v) in src.attrs().items()? {
                    group.attrs().set(&k, v)?;
                }
                src.visititems(|name, obj| {
                    match obj {
                        Node::Group(_) => {
                            group.create_group(name)?;
                        }
                        Node::Dataset(d) => {
                            group.create_dataset(name, d.value()?)?;
                        }
                    }
                    let copied = group.get(name)?;
                    for (k, v) in obj.attrs().items()? {
                        copied.attrs().set(&k, v)?;
                    }
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    /// Copy the entity at `src` to the fresh path `dst` (read-then-write
    /// over the merged view).
    pub fn copy_entry(&self, src: &str, dst: &str) -> Result<()> {
        let node = self.get(src)?;
        self.create_copy(dst, &node)
    }

    /// Move the entity at `src` to the fresh path `dst`. The source is
    /// deleted afterwards (writing deletion markers where required).
    pub fn move_entry(&self, src: &str, dst: &str) -> Result<()> {
        self.copy_entry(src, dst)?;
        self.delete(src)
    }
}

impl Dataset {
    /// Parent group of this dataset.
    pub fn parent(&self) -> Result<Group> {
        let pp = parent_path(&self.path);
        match root_group(self.chain.clone())?.get(&pp)? {
            Node::Group(g) => Ok(g),
            Node::Dataset(d) => Err(Error::NotAGroup(d.path)),
        }
    }

    /// Attributes attached to this dataset.
    pub fn attrs(&self) -> AttributeSet {
        AttributeSet {
            chain: self.chain.clone(),
            path: self.path.clone(),
            cidx: self.cidx,
        }
    }

    /// The stored value.
    pub fn value(&self) -> Result<Value> {
        let st = self.state()?;
        let container = st
            .containers
            .get(self.cidx)
            .ok_or_else(|| Error::NotFound(self.path.clone()))?;
        container
            .tree
            .root()
            .get(&self.path)
            .and_then(TreeNode::as_dataset)
            .map(|d| d.value.clone())
            .ok_or_else(|| Error::NotFound(self.path.clone()))
    }

    /// Element of an array value.
    pub fn read_at(&self, idx: usize) -> Result<Value> {
        self.value()?
            .element(idx)
            .ok_or_else(|| Error::NotFound(format!("{}[{idx}]", self.path)))
    }

    /// Replace an element of an array value in place.
    ///
    /// Only possible for a dataset living in the writable container; older
    /// values must be pulled in with [`Dataset::copy_into_patch`] first.
    pub fn write_at(&self, idx: usize, val: Value) -> Result<()> {
        self.expect_writable()?;
        {
            let st = self.state()?;
            if self.cidx != st.last_idx() {
                return Err(Error::Lifecycle(format!(
                    "cannot write '{}': node is not from the latest patch",
                    self.path
                )));
            }
        }
        let mut st = self.state_mut()?;
        let root = st.tail_mut().tree.root_mut()?;
        let ds = root
            .get_mut(&self.path)
            .and_then(TreeNode::as_dataset_mut)
            .ok_or_else(|| Error::NotFound(self.path.clone()))?;
        if !ds.value.set_element(idx, val) {
            return Err(Error::ForbiddenValue(format!(
                "element {idx} of '{}' cannot be written: index or type mismatch",
                self.path
            )));
        }
        Ok(())
    }

    /// Replace the whole value in place (same constraints as
    /// [`Dataset::write_at`]).
    pub fn write(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if is_deletion_value(&value) {
            return Err(Error::ForbiddenValue(
                "the deletion marker cannot be stored as a user value".to_string(),
            ));
        }
        self.expect_writable()?;
        {
            let st = self.state()?;
            if self.cidx != st.last_idx() {
                return Err(Error::Lifecycle(format!(
                    "cannot write '{}': node is not from the latest patch",
                    self.path
                )));
            }
        }
        let mut st = self.state_mut()?;
        let root = st.tail_mut().tree.root_mut()?;
        let ds = root
            .get_mut(&self.path)
            .and_then(TreeNode::as_dataset_mut)
            .ok_or_else(|| Error::NotFound(self.path.clone()))?;
        ds.value = value;
        Ok(())
    }

    /// Copy the most recent value at this path into the current patch, so
    /// it can be edited in place.
    pub fn copy_into_patch(&self) -> Result<()> {
        self.expect_writable()?;
        let val = {
            let st = self.state()?;
            if self.cidx == st.last_idx() {
                return Err(Error::Lifecycle(format!(
                    "cannot copy '{}': node is already from the latest patch",
                    self.path
                )));
            }
            drop(st);
            self.value()?
        };
        let mut st = self.state_mut()?;
        st.tail_mut().tree.root_mut()?.create_dataset(&self.path, val)?;
        Ok(())
    }
}

impl AttributeSet {
    /// Attribute names, in alphabetical order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let st = self.state()?;
        Ok(merged_children(&st, &self.path, self.cidx, true)
            .into_keys()
            .collect())
    }

    /// Number of attributes.
    pub fn len(&self) -> Result<usize> {
        let st = self.state()?;
        Ok(merged_children(&st, &self.path, self.cidx, true).len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        check_key(key, true)?;
        let st = self.state()?;
        Ok(merged_children(&st, &self.path, self.cidx, true).contains_key(key))
    }

    /// Look up an attribute value, `None` if absent.
    pub fn get_opt(&self, key: &str) -> Result<Option<Value>> {
        check_key(key, true)?;
        let st = self.state()?;
        let children = merged_children(&st, &self.path, self.cidx, true);
        match children.get(key) {
            Some(&idx) => {
                let val = entry_in(&st, idx, &self.path)
                    .and_then(|e| e.attrs().get(key).cloned())
                    .ok_or_else(|| Error::NotFound(format!("{}@{key}", self.path)))?;
                Ok(Some(val))
            }
            None => Ok(None),
        }
    }

    /// Look up an attribute value.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.get_opt(key)?
            .ok_or_else(|| Error::NotFound(format!("{}@{key}", self.path)))
    }

    /// Pairs of attribute name and value, in alphabetical order.
    pub fn items(&self) -> Result<Vec<(String, Value)>> {
        let st = self.state()?;
        let children = merged_children(&st, &self.path, self.cidx, true);
        let mut ret = Vec::with_capacity(children.len());
        for (k, idx) in children {
            let val = entry_in(&st, idx, &self.path)
                .and_then(|e| e.attrs().get(&k).cloned())
                .ok_or_else(|| Error::NotFound(format!("{}@{k}", self.path)))?;
            ret.push((k, val));
        }
        Ok(ret)
    }

    /// Attribute names together with the container index supplying each
    /// current value, in alphabetical order.
    pub fn indexed_keys(&self) -> Result<Vec<(String, usize)>> {
        let st = self.state()?;
        Ok(merged_children(&st, &self.path, self.cidx, true)
            .into_iter()
            .collect())
    }

    /// Set an attribute in the writable container (overwriting any older
    /// value in the merged view).
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        check_key(key, true)?;
        self.expect_writable()?;
        if is_deletion_value(&value) {
            return Err(Error::ForbiddenValue(
                "the deletion marker cannot be stored as a user value".to_string(),
            ));
        }
        let mut st = self.state_mut()?;
        let root = st.tail_mut().tree.root_mut()?;
        if self.path != "/" && !root.contains(&self.path) {
            // carrier node for the attribute override
            root.create_group(&self.path)?;
        }
        let attrs = tail_attrs_mut(root, &self.path)
            .ok_or_else(|| Error::NotFound(self.path.clone()))?;
        attrs.insert(key.to_string(), value);
        Ok(())
    }

    /// Delete an attribute from the merged view.
    pub fn delete(&self, key: &str) -> Result<()> {
        check_key(key, true)?;
        self.expect_writable()?;
        let found = {
            let st = self.state()?;
            merged_children(&st, &self.path, self.cidx, true)
                .get(key)
                .copied()
        };
        let Some(found) = found else {
            return Err(Error::NotFound(format!("{}@{key}", self.path)));
        };

        let mut st = self.state_mut()?;
        let last_idx = st.last_idx();
        let has_patches = st.containers.len() > 1;
        let root = st.tail_mut().tree.root_mut()?;
        if found == last_idx {
            if let Some(attrs) = tail_attrs_mut(root, &self.path) {
                attrs.remove(key);
            }
        }
        if has_patches {
            if self.path != "/" && !root.contains(&self.path) {
                root.create_group(&self.path)?;
            }
            let attrs = tail_attrs_mut(root, &self.path)
                .ok_or_else(|| Error::NotFound(self.path.clone()))?;
            attrs.insert(key.to_string(), deletion_value());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletion_marker_detection() {
        assert!(is_deletion_value(&deletion_value()));
        assert!(!is_deletion_value(&Value::Raw(vec![0x7E])));
        assert!(!is_deletion_value(&Value::Raw(vec![0x7F, 0x7F])));
        assert!(!is_deletion_value(&Value::Bytes(vec![0x7F])));
        assert!(!is_deletion_value(&Value::Int(0x7F)));
    }

    #[test]
    fn path_helpers() {
        assert_eq!(parent_path("/"), "/");
        assert_eq!(parent_path("/foo"), "/");
        assert_eq!(parent_path("/foo/bar"), "/foo");

        assert_eq!(abs_path("/", "foo"), "/foo");
        assert_eq!(abs_path("/grp", "foo"), "/grp/foo");
        assert_eq!(abs_path("/grp", "/foo"), "/foo");

        assert_eq!(rel_path("/", "/foo/bar"), "foo/bar");
        assert_eq!(rel_path("/foo", "/foo/bar"), "bar");
        assert_eq!(rel_path("/foo", "baz"), "baz");
    }

    #[test]
    fn key_validation() {
        assert!(check_key("foo/bar-1.2", false).is_ok());
        assert!(check_key("", false).is_err());
        assert!(check_key("with@at", false).is_err());
        assert!(check_key("with space", false).is_err());
        assert!(check_key("with\nnewline", false).is_err());
        assert!(check_key("n\u{f6}n-ascii", false).is_err());

        assert!(check_key("attr-key", true).is_ok());
        assert!(check_key("no/slashes", true).is_err());
        assert!(check_key(SUBST_KEY, true).is_err());
    }
}
