//! BranchGraph - derived branch hierarchy
//!
//! Built from a flat snapshot of the branch store for traversal and layout.
//! Holds no state of its own. Orphans and cycles are neutralized by treating
//! the affected branch as a root and reported through `anomalies`.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::error::BranchError;
use crate::store::BranchStore;
use crate::structs::{BranchContext, BranchId};

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BranchNode {
    pub branch_id: BranchId,
    /// Parent after orphan and cycle handling.
    pub parent_branch_id: Option<BranchId>,
    pub children: Vec<BranchId>,
    pub depth: usize,
}

#[derive(Debug, Default)]
pub struct BranchGraph {
    nodes: HashMap<BranchId, BranchNode>,
    roots: Vec<BranchId>,
    order: Vec<BranchId>,
    anomalies: Vec<BranchError>,
}

impl BranchGraph {
    pub fn from_store(store: &BranchStore) -> Self {
        Self::build(&store.snapshot())
    }

    pub fn build(branches: &[BranchContext]) -> Self {
        let known: HashSet<&BranchId> = branches.iter().map(|b| &b.branch_id).collect();
        let mut anomalies = Vec::new();

        let mut parents: HashMap<BranchId, Option<BranchId>> = HashMap::with_capacity(branches.len());
        for ctx in branches {
            let parent = match &ctx.parent_branch_id {
                Some(parent) if !known.contains(parent) => {
                    tracing::warn!(
                        branch_id = %ctx.branch_id,
                        parent_branch_id = %parent,
                        "BranchGraph: parent missing, treating branch as root"
                    );
                    anomalies.push(BranchError::InvalidGraph {
                        branch_id: ctx.branch_id.clone(),
                        reason: format!("parent {parent} not found"),
                    });
                    None
                }
                other => other.clone(),
            };
            parents.insert(ctx.branch_id.clone(), parent);
        }

        // Walk each parent chain; a chain that returns to its start is a
        // cycle, broken at the start node. Chains already known to reach a
        // root are not walked again.
        let mut settled: HashSet<BranchId> = HashSet::with_capacity(branches.len());
        for ctx in branches {
            let start = &ctx.branch_id;
            let mut visited = HashSet::from([start.clone()]);
            let mut reaches_root = true;
            let mut current = parents.get(start).cloned().flatten();
            while let Some(next) = current {
                if settled.contains(&next) {
                    break;
                }
                if &next == start {
                    tracing::warn!(branch_id = %start, "BranchGraph: cycle detected, treating branch as root");
                    anomalies.push(BranchError::InvalidGraph {
                        branch_id: start.clone(),
                        reason: "parent chain forms a cycle".to_string(),
                    });
                    parents.insert(start.clone(), None);
                    break;
                }
                if !visited.insert(next.clone()) {
                    // Entered a cycle that does not include `start`.
                    reaches_root = false;
                    break;
                }
                current = parents.get(&next).cloned().flatten();
            }
            if reaches_root {
                settled.extend(visited);
            }
        }

        let mut children: HashMap<BranchId, Vec<BranchId>> = HashMap::new();
        let mut roots = Vec::new();
        for ctx in branches {
            match parents.get(&ctx.branch_id).cloned().flatten() {
                Some(parent) => children.entry(parent).or_default().push(ctx.branch_id.clone()),
                None => roots.push(ctx.branch_id.clone()),
            }
        }

        let mut nodes = HashMap::with_capacity(branches.len());
        let mut order = Vec::with_capacity(branches.len());
        let mut queue: VecDeque<(BranchId, usize)> = roots.iter().map(|id| (id.clone(), 0)).collect();
        while let Some((id, depth)) = queue.pop_front() {
            let kids = children.remove(&id).unwrap_or_default();
            for kid in &kids {
                queue.push_back((kid.clone(), depth + 1));
            }
            let parent_branch_id = parents.get(&id).cloned().flatten();
            order.push(id.clone());
            nodes.insert(
                id.clone(),
                BranchNode {
                    branch_id: id,
                    parent_branch_id,
                    children: kids,
                    depth,
                },
            );
        }

        Self {
            nodes,
            roots,
            order,
            anomalies,
        }
    }

    pub fn node(&self, branch_id: &BranchId) -> Option<&BranchNode> {
        self.nodes.get(branch_id)
    }

    pub fn depth(&self, branch_id: &BranchId) -> Option<usize> {
        self.nodes.get(branch_id).map(|node| node.depth)
    }

    pub fn children(&self, branch_id: &BranchId) -> &[BranchId] {
        self.nodes
            .get(branch_id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub fn roots(&self) -> &[BranchId] {
        &self.roots
    }

    /// Nodes in breadth-first order from the roots.
    pub fn iter(&self) -> impl Iterator<Item = &BranchNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The branch followed by its ancestors up to its root.
    pub fn lineage(&self, branch_id: &BranchId) -> Vec<BranchId> {
        let mut lineage = Vec::new();
        let mut current = self.nodes.get(branch_id);
        while let Some(node) = current {
            lineage.push(node.branch_id.clone());
            current = node.parent_branch_id.as_ref().and_then(|p| self.nodes.get(p));
        }
        lineage
    }

    /// Every branch below `branch_id`, breadth-first.
    pub fn descendants(&self, branch_id: &BranchId) -> Vec<BranchId> {
        let mut found = Vec::new();
        let mut queue: VecDeque<&BranchId> = self.children(branch_id).iter().collect();
        while let Some(id) = queue.pop_front() {
            found.push(id.clone());
            queue.extend(self.children(id));
        }
        found
    }

    pub fn anomalies(&self) -> &[BranchError] {
        &self.anomalies
    }
}
