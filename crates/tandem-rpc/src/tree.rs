//! Nested function trees and dotted-path resolution.
//!
//! A tree is either a node (a sorted mapping of names to subtrees) or a leaf.
//! The same shape is used for the local tree of callables, the announced shape
//! sent over the wire, and the proxy trees built from it.
//!
//! ```text
//! {math: {add: <leaf>, mul: <leaf>}, ping: <leaf>}
//!
//! "math.add"  -> leaf
//! "math"      -> node {add, mul}
//! ""          -> the whole tree
//! "math.div"  -> nothing
//! "ping.x"    -> nothing (a leaf has no children)
//! ```

use crate::config::ProtocolConfig;
use crate::error::{Result, RpcError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node-or-leaf tree addressed by dotted paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[serde(bound(serialize = "L: Serialize", deserialize = "L: Deserialize<'de>"))]
pub enum Tree<L> {
    Node(BTreeMap<String, Tree<L>>),
    Leaf(L),
}

impl<L> Default for Tree<L> {
    fn default() -> Self {
        Tree::Node(BTreeMap::new())
    }
}

impl<L> Tree<L> {
    /// An empty node.
    pub fn node() -> Self {
        Self::default()
    }

    pub fn leaf(value: L) -> Self {
        Tree::Leaf(value)
    }

    /// Builder-style child insertion. Calling this on a leaf replaces the leaf
    /// with a node holding only the new child.
    pub fn with(mut self, key: impl Into<String>, child: impl Into<Tree<L>>) -> Self {
        match &mut self {
            Tree::Node(children) => {
                children.insert(key.into(), child.into());
                self
            }
            Tree::Leaf(_) => Tree::Node(BTreeMap::from([(key.into(), child.into())])),
        }
    }

    /// Insert a subtree at a dotted path, creating intermediate nodes.
    ///
    /// Fails if an intermediate segment is already a leaf, or if `path` is empty.
    pub fn insert(&mut self, path: &str, subtree: impl Into<Tree<L>>) -> Result<()> {
        if path.is_empty() {
            return Err(RpcError::TreeConflict {
                path: String::new(),
            });
        }

        let mut segments = path.split(ProtocolConfig::PATH_SEPARATOR).peekable();
        let mut current = self;
        while let Some(segment) = segments.next() {
            let children = match current {
                Tree::Node(children) => children,
                Tree::Leaf(_) => {
                    return Err(RpcError::TreeConflict {
                        path: path.to_string(),
                    })
                }
            };
            if segments.peek().is_none() {
                children.insert(segment.to_string(), subtree.into());
                return Ok(());
            }
            current = children.entry(segment.to_string()).or_default();
        }
        Ok(())
    }

    /// Resolve a dotted path. The empty path resolves to the tree itself.
    pub fn get(&self, path: &str) -> Option<&Tree<L>> {
        if path.is_empty() {
            return Some(self);
        }
        path.split(ProtocolConfig::PATH_SEPARATOR)
            .try_fold(self, |tree, segment| match tree {
                Tree::Node(children) => children.get(segment),
                Tree::Leaf(_) => None,
            })
    }

    /// Resolve a dotted path that must end at a leaf.
    pub fn get_leaf(&self, path: &str) -> Option<&L> {
        self.get(path).and_then(Tree::as_leaf)
    }

    pub fn as_leaf(&self) -> Option<&L> {
        match self {
            Tree::Leaf(value) => Some(value),
            Tree::Node(_) => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Tree::Leaf(_))
    }

    /// Rebuild the tree with every leaf transformed.
    ///
    /// `base` is the path of this tree inside a larger one; the callback
    /// receives each leaf's full path (`base` joined with the local path).
    pub fn map_leaves<M, F>(&self, base: &str, f: &mut F) -> Tree<M>
    where
        F: FnMut(&str, &L) -> M,
    {
        match self {
            Tree::Leaf(value) => Tree::Leaf(f(base, value)),
            Tree::Node(children) => Tree::Node(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.map_leaves(&join_path(base, key), f)))
                    .collect(),
            ),
        }
    }

    /// Full paths of every leaf, in sorted order.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.map_leaves("", &mut |path, _| paths.push(path.to_string()));
        paths
    }
}

/// Join a parent path and a local path with the separator, skipping empty parts.
pub fn join_path(parent: &str, local: &str) -> String {
    match (parent.is_empty(), local.is_empty()) {
        (true, _) => local.to_string(),
        (false, true) => parent.to_string(),
        (false, false) => format!("{}{}{}", parent, ProtocolConfig::PATH_SEPARATOR, local),
    }
}
