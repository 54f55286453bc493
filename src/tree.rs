use std::collections::HashMap;
use std::hash::Hash;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::{BatchError, Result};

/// Stable handle of a node; stays valid until the node is removed.
pub type NodeId = NodeIndex;

/// Ordered tree stored in an arena.
///
/// Nodes live in a petgraph `StableDiGraph`; an edge goes from parent to
/// child and carries the child's position among its siblings. A node has
/// at most one incoming edge, so cycles cannot be formed through the API.
#[derive(Debug, Clone)]
pub struct Tree<T> {
    graph: StableDiGraph<T, u32>,
    root: Option<NodeId>,
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Tree<T> {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            root: None,
        }
    }

    pub fn with_root(value: T) -> Self {
        let mut tree = Self::new();
        tree.root = Some(tree.graph.add_node(value));
        tree
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.contains_node(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.graph.node_weight(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.graph.node_weight_mut(id)
    }

    /// Like [`Tree::get`], failing on an unknown handle.
    pub fn node(&self, id: NodeId) -> Result<&T> {
        self.graph
            .node_weight(id)
            .ok_or(BatchError::UnknownNode(id.index()))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut T> {
        self.graph
            .node_weight_mut(id)
            .ok_or(BatchError::UnknownNode(id.index()))
    }

    // ── Structure ───────────────────────────────────────────────────────────

    /// Append a child after the existing ones.
    pub fn add_child(&mut self, parent: NodeId, value: T) -> Result<NodeId> {
        let position = self.children(parent).len();
        self.insert_child(parent, position, value)
    }

    /// Insert a child at `position` (clamped to the number of children).
    pub fn insert_child(&mut self, parent: NodeId, position: usize, value: T) -> Result<NodeId> {
        self.node(parent)?;
        let id = self.graph.add_node(value);
        self.link(parent, id, position);
        Ok(id)
    }

    /// Children in sibling order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut edges: Vec<(u32, NodeId)> = self
            .graph
            .edges_directed(id, Direction::Outgoing)
            .map(|e| (*e.weight(), e.target()))
            .collect();
        edges.sort_by_key(|(order, _)| *order);
        edges.into_iter().map(|(_, child)| child).collect()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.graph.neighbors_directed(id, Direction::Incoming).next()
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            result.push(node);
            current = self.parent(node);
        }
        result
    }

    pub fn depth(&self, id: NodeId) -> usize {
        self.ancestors(id).len()
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.graph
            .neighbors_directed(id, Direction::Outgoing)
            .next()
            .is_none()
    }

    /// Position of `id` among its siblings.
    pub fn sibling_index(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    /// Re-parent `id` under `new_parent` at `position` (appended when `None`).
    pub fn move_node(&mut self, id: NodeId, new_parent: NodeId, position: Option<usize>) -> Result<()> {
        self.node(id)?;
        self.node(new_parent)?;
        if id == new_parent || self.ancestors(new_parent).contains(&id) {
            return Err(BatchError::InvalidData(format!(
                "Cannot move node {} under its own descendant {}",
                id.index(),
                new_parent.index()
            )));
        }
        self.unlink(id);
        if self.root == Some(id) {
            self.root = None;
        }
        let position = position.unwrap_or_else(|| self.children(new_parent).len());
        self.link(new_parent, id, position);
        Ok(())
    }

    /// Detach and drop `id` with its whole subtree; values come back in preorder.
    pub fn remove_subtree(&mut self, id: NodeId) -> Vec<T> {
        if !self.contains(id) {
            return Vec::new();
        }
        let nodes = self.preorder(id);
        self.unlink(id);
        if self.root == Some(id) {
            self.root = None;
        }
        nodes
            .into_iter()
            .filter_map(|n| self.graph.remove_node(n))
            .collect()
    }

    /// Rewrite sibling order to match `ordered` (missing children keep their
    /// relative order after the listed ones).
    pub fn reorder_children(&mut self, parent: NodeId, ordered: &[NodeId]) {
        let mut current = self.children(parent);
        current.retain(|c| !ordered.contains(c));
        let sequence: Vec<NodeId> = ordered
            .iter()
            .copied()
            .filter(|c| self.parent(*c) == Some(parent))
            .chain(current)
            .collect();
        for (position, child) in sequence.into_iter().enumerate() {
            if let Some(edge) = self.graph.find_edge(parent, child) {
                if let Some(w) = self.graph.edge_weight_mut(edge) {
                    *w = position as u32;
                }
            }
        }
    }

    // ── Traversal ───────────────────────────────────────────────────────────

    /// Depth-first preorder from `start` (included).
    pub fn preorder(&self, start: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        if !self.contains(start) {
            return result;
        }
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            result.push(node);
            let children = self.children(node);
            stack.extend(children.into_iter().rev());
        }
        result
    }

    /// Whole tree in preorder; empty when there is no root.
    pub fn iter_preorder(&self) -> Vec<NodeId> {
        self.root.map(|r| self.preorder(r)).unwrap_or_default()
    }

    /// Descendants of `id` in preorder (excluding `id`).
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        self.preorder(id).into_iter().skip(1).collect()
    }

    /// Leaves under `id` (or `id` itself when it is a leaf).
    pub fn leaves(&self, id: NodeId) -> Vec<NodeId> {
        self.preorder(id)
            .into_iter()
            .filter(|n| self.is_leaf(*n))
            .collect()
    }

    pub fn find_first<F>(&self, start: NodeId, predicate: F) -> Option<NodeId>
    where
        F: Fn(&T) -> bool,
    {
        self.preorder(start)
            .into_iter()
            .find(|n| self.get(*n).is_some_and(&predicate))
    }

    pub fn filter<F>(&self, start: NodeId, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&T) -> bool,
    {
        self.preorder(start)
            .into_iter()
            .filter(|n| self.get(*n).is_some_and(&predicate))
            .collect()
    }

    /// Recursive sum over the subtree: a node's own value wins over its
    /// children's sum; a node without value contributes its children's sum.
    pub fn sum<F>(&self, start: NodeId, value: &F) -> f64
    where
        F: Fn(&T) -> Option<f64>,
    {
        match self.get(start).and_then(value) {
            Some(v) => v,
            None => self
                .children(start)
                .into_iter()
                .map(|c| self.sum(c, value))
                .sum(),
        }
    }

    /// Indented rendering with ` |- ` / ` \- ` markers.
    pub fn pretty_print<F>(&self, start: NodeId, format: &F) -> String
    where
        F: Fn(&T) -> String,
    {
        let mut out = String::new();
        if let Some(value) = self.get(start) {
            out.push_str(&format!(" - {}\n", format(value)));
            self.print_children(start, "\t", format, &mut out);
        }
        out
    }

    // ── Private helpers ─────────────────────────────────────────────────────

    fn print_children<F>(&self, id: NodeId, indent: &str, format: &F, out: &mut String)
    where
        F: Fn(&T) -> String,
    {
        let children = self.children(id);
        let last = children.len().saturating_sub(1);
        for (i, child) in children.into_iter().enumerate() {
            let marker = if i == last { " \\- " } else { " |- " };
            if let Some(value) = self.get(child) {
                out.push_str(&format!("{indent}{marker}{}\n", format(value)));
            }
            self.print_children(child, &format!("{indent}\t"), format, out);
        }
    }

    fn link(&mut self, parent: NodeId, child: NodeId, position: usize) {
        let mut siblings = self.children(parent);
        let position = position.min(siblings.len());
        siblings.insert(position, child);
        self.graph.add_edge(parent, child, position as u32);
        for (order, sibling) in siblings.into_iter().enumerate() {
            if let Some(edge) = self.graph.find_edge(parent, sibling) {
                if let Some(w) = self.graph.edge_weight_mut(edge) {
                    *w = order as u32;
                }
            }
        }
    }

    fn unlink(&mut self, id: NodeId) {
        let incoming: Vec<_> = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in incoming {
            self.graph.remove_edge(edge);
        }
    }
}

impl<T: Clone> Tree<T> {
    /// Detached copy of the subtree rooted at `id`.
    pub fn copy_subtree(&self, id: NodeId) -> Result<Tree<T>> {
        let mut copy = Tree::with_root(self.node(id)?.clone());
        let mut mapping = HashMap::new();
        if let Some(root) = copy.root {
            mapping.insert(id, root);
        }
        for node in self.descendants(id) {
            let parent = self
                .parent(node)
                .and_then(|p| mapping.get(&p).copied())
                .ok_or(BatchError::UnknownNode(node.index()))?;
            let new_id = copy.add_child(parent, self.node(node)?.clone())?;
            mapping.insert(node, new_id);
        }
        Ok(copy)
    }

    /// Append a copy of `subtree` under `parent`; returns the new top node.
    pub fn graft(&mut self, parent: NodeId, subtree: &Tree<T>) -> Result<Option<NodeId>> {
        let Some(sub_root) = subtree.root else {
            return Ok(None);
        };
        let mut mapping = HashMap::new();
        let top = self.add_child(parent, subtree.node(sub_root)?.clone())?;
        mapping.insert(sub_root, top);
        for node in subtree.descendants(sub_root) {
            let target_parent = subtree
                .parent(node)
                .and_then(|p| mapping.get(&p).copied())
                .ok_or(BatchError::UnknownNode(node.index()))?;
            let new_id = self.add_child(target_parent, subtree.node(node)?.clone())?;
            mapping.insert(node, new_id);
        }
        Ok(Some(top))
    }

    /// Preorder values paired with the preorder position of their parent.
    pub fn flatten(&self) -> Vec<(Option<usize>, T)> {
        let order = self.iter_preorder();
        let positions: HashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        order
            .iter()
            .filter_map(|n| {
                let parent = self.parent(*n).and_then(|p| positions.get(&p).copied());
                self.get(*n).map(|v| (parent, v.clone()))
            })
            .collect()
    }
}

impl<T> Tree<T> {
    /// Rebuild a tree from parent-referencing records.
    ///
    /// The first record accepted by `is_root` becomes the root. Records are
    /// attached in input order; records whose parent cannot be reached are
    /// dropped. Returns `None` when no root is found.
    pub fn from_flat<K, FId, FParent, FRoot>(
        items: Vec<T>,
        id_of: FId,
        parent_of: FParent,
        is_root: FRoot,
    ) -> Option<Tree<T>>
    where
        K: Eq + Hash + Clone,
        FId: Fn(&T) -> Option<K>,
        FParent: Fn(&T) -> Option<K>,
        FRoot: Fn(&T) -> bool,
    {
        let root_index = items.iter().position(|item| is_root(item))?;
        let mut tree = Tree::new();
        let mut by_key: HashMap<K, NodeId> = HashMap::new();
        let mut pending: Vec<(NodeId, Option<K>)> = Vec::new();

        for (i, item) in items.into_iter().enumerate() {
            let key = id_of(&item);
            let parent_key = parent_of(&item);
            let id = tree.graph.add_node(item);
            if i == root_index {
                tree.root = Some(id);
            } else {
                pending.push((id, parent_key));
            }
            if let Some(key) = key {
                by_key.entry(key).or_insert(id);
            }
        }

        let mut orphans = Vec::new();
        for (id, parent_key) in pending {
            match parent_key.and_then(|k| by_key.get(&k).copied()) {
                Some(parent) if parent != id => {
                    let position = tree.children(parent).len();
                    tree.link(parent, id, position);
                }
                _ => orphans.push(id),
            }
        }

        // Unreachable from the root: orphans, and cycles among non-root records.
        let reachable: std::collections::HashSet<NodeId> = tree.iter_preorder().into_iter().collect();
        let unreachable: Vec<NodeId> = tree
            .graph
            .node_indices()
            .filter(|n| !reachable.contains(n))
            .collect();
        if !unreachable.is_empty() {
            tracing::warn!(
                orphans = orphans.len(),
                dropped = unreachable.len(),
                "dropping records not attached to the root"
            );
        }
        for node in unreachable {
            tree.graph.remove_node(node);
        }
        Some(tree)
    }
}
