//! Node arena
//!
//! Records indexed by stable ID. Parent/child relationships are stored as ID
//! references only, so partial loading and eviction can never leave a dangling
//! structural pointer: a child whose parent is not resident is parked as an
//! orphan and adopted when the parent arrives.

use crate::hierarchy::path::{HierarchyPath, PathPosition};
use crate::types::{NodeId, Record};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A resident node.
#[derive(Debug, Clone)]
pub struct ArenaNode {
    pub record: Arc<Record>,
    /// Parent id as declared by the record; may not be resident
    pub parent: Option<NodeId>,
    /// Resident children in sibling order
    pub children: Vec<NodeId>,
    /// Effective position: external path, or synthesized by the arena
    pub position: PathPosition,
    seq: u64,
}

/// Errors from structural edits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    UnknownNode(NodeId),
    /// The move would make a node its own ancestor
    Cycle { node: NodeId, new_parent: NodeId },
}

impl std::fmt::Display for ArenaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArenaError::UnknownNode(id) => write!(f, "unknown node '{}'", id),
            ArenaError::Cycle { node, new_parent } => {
                write!(f, "moving '{}' under '{}' would create a cycle", node, new_parent)
            }
        }
    }
}

impl std::error::Error for ArenaError {}

/// Arena of nodes keyed by id
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: HashMap<NodeId, ArenaNode>,
    roots: Vec<NodeId>,
    /// parent id -> children that arrived before their parent
    orphans: HashMap<NodeId, Vec<NodeId>>,
    next_seq: u64,
    /// Positions come only from [`NodeArena::synthesize_paths`]
    local_paths: bool,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arena that ignores source paths; positions are synthesized locally.
    pub fn with_local_paths() -> Self {
        Self {
            local_paths: true,
            ..Self::default()
        }
    }

    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Arc<Record>>,
    {
        let mut arena = Self::new();
        for record in records {
            arena.insert(record);
        }
        arena
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ArenaNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn children_of(&self, id: &str) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn path_of(&self, id: &str) -> Option<&HierarchyPath> {
        self.nodes.get(id).and_then(|node| node.position.as_known())
    }

    /// Every resident node with a known position
    pub fn positions(&self) -> impl Iterator<Item = (&NodeId, &HierarchyPath)> + '_ {
        self.nodes
            .iter()
            .filter_map(|(id, node)| node.position.as_known().map(|path| (id, path)))
    }

    /// Insert or replace a record. Re-links if the parent changed.
    pub fn insert(&mut self, record: Arc<Record>) {
        let id = record.id.clone();
        let position = if self.local_paths {
            PathPosition::Unknown
        } else {
            record.position()
        };

        if let Some(existing) = self.nodes.get_mut(&id) {
            let same_parent = existing.parent == record.parent_id;
            existing.record = Arc::clone(&record);
            if position.is_known() {
                existing.position = position;
            }
            if same_parent {
                return;
            }
            self.detach(&id);
            if let Some(node) = self.nodes.get_mut(&id) {
                node.parent = record.parent_id.clone();
            }
            self.attach(&id);
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.nodes.insert(
            id.clone(),
            ArenaNode {
                parent: record.parent_id.clone(),
                record,
                children: Vec::new(),
                position,
                seq,
            },
        );
        self.attach(&id);

        if let Some(waiting) = self.orphans.remove(&id) {
            for child in waiting {
                if self.nodes.contains_key(&child) {
                    self.attach(&child);
                }
            }
        }
    }

    /// Remove a node. Its resident children are parked as orphans.
    pub fn remove(&mut self, id: &str) -> Option<Arc<Record>> {
        if !self.nodes.contains_key(id) {
            return None;
        }
        self.detach(id);
        let node = self.nodes.remove(id)?;
        if !node.children.is_empty() {
            self.orphans
                .entry(id.to_string())
                .or_default()
                .extend(node.children.iter().cloned());
        }
        Some(node.record)
    }

    /// Ancestor ids via parent links, nearest first. Stops at the first
    /// non-resident ancestor or on a cycle.
    pub fn ancestors_of(&self, id: &str) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(id.to_string());
        let mut current = self.nodes.get(id).and_then(|n| n.parent.clone());
        while let Some(parent_id) = current {
            if !visited.insert(parent_id.clone()) {
                break;
            }
            let Some(parent) = self.nodes.get(&parent_id) else {
                break;
            };
            chain.push(parent_id);
            current = parent.parent.clone();
        }
        chain
    }

    /// Depth-first flattened order. Children are visited only for nodes in
    /// `expanded`.
    pub fn flatten(&self, expanded: &HashSet<NodeId>) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();
        let mut stack: Vec<&NodeId> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id.as_str()) {
                continue;
            }
            out.push(id.clone());
            if expanded.contains(id) {
                if let Some(node) = self.nodes.get(id) {
                    stack.extend(node.children.iter().rev());
                }
            }
        }
        out
    }

    /// Fully expanded depth-first order of the subtree rooted at `root`, root included.
    pub fn subtree(&self, root: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.nodes.contains_key(root) {
            return out;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![root.to_string()];
        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().rev().cloned());
            }
            out.push(id);
        }
        out
    }

    /// Assign paths to every resident node reachable from a root, by sibling
    /// order. Returns the number of nodes whose position changed.
    pub fn synthesize_paths(&mut self) -> usize {
        let roots = self.roots.clone();
        let mut changed = 0;
        for (index, root) in roots.iter().enumerate() {
            if let Some(path) = HierarchyPath::root(index as u32 + 1) {
                changed += self.assign_subtree(root, path);
            }
        }
        changed
    }

    /// Move `id` under `new_parent` (or to root level) at 0-based `index` among
    /// the new siblings, then re-path affected nodes locally.
    ///
    /// Returns the ids whose paths changed.
    pub fn move_node(
        &mut self,
        id: &str,
        new_parent: Option<&str>,
        index: usize,
    ) -> Result<Vec<NodeId>, ArenaError> {
        if !self.nodes.contains_key(id) {
            return Err(ArenaError::UnknownNode(id.to_string()));
        }
        if let Some(parent) = new_parent {
            if !self.nodes.contains_key(parent) {
                return Err(ArenaError::UnknownNode(parent.to_string()));
            }
            if parent == id || self.ancestors_of(parent).iter().any(|a| a == id) {
                return Err(ArenaError::Cycle {
                    node: id.to_string(),
                    new_parent: parent.to_string(),
                });
            }
        }

        let old_parent = self.nodes.get(id).and_then(|n| n.parent.clone());
        self.detach(id);

        let new_parent_id = new_parent.map(str::to_string);
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = new_parent_id.clone();
        }
        let siblings = match &new_parent_id {
            Some(parent) => match self.nodes.get_mut(parent) {
                Some(node) => &mut node.children,
                None => return Err(ArenaError::UnknownNode(parent.clone())),
            },
            None => &mut self.roots,
        };
        let index = index.min(siblings.len());
        siblings.insert(index, id.to_string());

        let before: HashMap<NodeId, PathPosition> = self
            .nodes
            .iter()
            .map(|(k, v)| (k.clone(), v.position.clone()))
            .collect();

        self.repath_children_of(old_parent.as_deref());
        if old_parent != new_parent_id {
            self.repath_children_of(new_parent_id.as_deref());
        }

        let mut changed: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(k, v)| before.get(*k) != Some(&v.position))
            .map(|(k, _)| k.clone())
            .collect();
        changed.sort();
        Ok(changed)
    }

    fn repath_children_of(&mut self, parent: Option<&str>) {
        let (base, children) = match parent {
            Some(parent_id) => match self.nodes.get(parent_id) {
                Some(node) => (node.position.as_known().cloned(), node.children.clone()),
                None => return,
            },
            None => (None, self.roots.clone()),
        };
        if parent.is_some() && base.is_none() {
            // Parent position unknown: children cannot be placed either
            for child in &children {
                self.clear_subtree(child);
            }
            return;
        }
        for (index, child) in children.iter().enumerate() {
            let position = index as u32 + 1;
            let path = match &base {
                Some(base) => base.child(position),
                None => HierarchyPath::root(position),
            };
            if let Some(path) = path {
                self.assign_subtree(child, path);
            }
        }
    }

    fn assign_subtree(&mut self, id: &str, path: HierarchyPath) -> usize {
        let mut changed = 0;
        let mut visited = HashSet::new();
        let mut stack = vec![(id.to_string(), path)];
        while let Some((node_id, node_path)) = stack.pop() {
            if !visited.insert(node_id.clone()) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&node_id) else {
                continue;
            };
            if node.position.as_known() != Some(&node_path) {
                node.position = PathPosition::Known(node_path.clone());
                changed += 1;
            }
            for (index, child) in node.children.iter().enumerate() {
                if let Some(child_path) = node_path.child(index as u32 + 1) {
                    stack.push((child.clone(), child_path));
                }
            }
        }
        changed
    }

    fn clear_subtree(&mut self, id: &str) {
        for node_id in self.subtree(id) {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.position = PathPosition::Unknown;
            }
        }
    }

    fn attach(&mut self, id: &str) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        match node.parent.clone() {
            None => {
                let key = self.order_key(id);
                let pos = self
                    .roots
                    .iter()
                    .position(|other| self.compare_keys(&key, &self.order_key(other)) == Ordering::Less)
                    .unwrap_or(self.roots.len());
                self.roots.insert(pos, id.to_string());
            }
            Some(parent_id) => {
                if !self.nodes.contains_key(&parent_id) {
                    let waiting = self.orphans.entry(parent_id).or_default();
                    if !waiting.iter().any(|w| w == id) {
                        waiting.push(id.to_string());
                    }
                    return;
                }
                let key = self.order_key(id);
                let siblings = self.children_of(&parent_id);
                let pos = siblings
                    .iter()
                    .position(|other| self.compare_keys(&key, &self.order_key(other)) == Ordering::Less)
                    .unwrap_or(siblings.len());
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.insert(pos, id.to_string());
                }
            }
        }
    }

    fn detach(&mut self, id: &str) {
        let parent = self.nodes.get(id).and_then(|n| n.parent.clone());
        match parent {
            None => self.roots.retain(|r| r != id),
            Some(parent_id) => {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.retain(|c| c != id);
                }
                if let Some(waiting) = self.orphans.get_mut(&parent_id) {
                    waiting.retain(|c| c != id);
                }
            }
        }
    }

    fn order_key(&self, id: &str) -> (u32, u64, u64) {
        match self.nodes.get(id) {
            Some(node) => (
                node.position
                    .as_known()
                    .map(|p| p.sibling_position())
                    .unwrap_or(u32::MAX),
                node.record.sort_position.unwrap_or(u64::MAX),
                node.seq,
            ),
            None => (u32::MAX, u64::MAX, u64::MAX),
        }
    }

    fn compare_keys(&self, a: &(u32, u64, u64), b: &(u32, u64, u64)) -> Ordering {
        a.cmp(b)
    }
}

/// Build an arena from `records` and return the fully expanded subtree under `root`.
pub fn assemble_subtree(records: &[Arc<Record>], root: &str) -> Vec<NodeId> {
    NodeArena::from_records(records.iter().cloned()).subtree(root)
}

/// Build an arena from `records`, synthesize paths, and return `(id, path)` pairs
/// in flattened order.
pub fn recompute_paths(records: &[Arc<Record>]) -> Vec<(NodeId, HierarchyPath)> {
    let mut arena = NodeArena::from_records(records.iter().cloned());
    arena.synthesize_paths();
    let mut out = Vec::with_capacity(arena.len());
    for root in arena.roots().to_vec() {
        for id in arena.subtree(&root) {
            if let Some(path) = arena.path_of(&id) {
                out.push((id.clone(), path.clone()));
            }
        }
    }
    out
}
