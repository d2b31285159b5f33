//! BranchStore - the branch pool
//!
//! Holds every `BranchContext` plus lookup indexes keyed by
//! `(parent, branch point)` and `(parent, response)`. Map and indexes sit
//! behind one lock so a multi-branch commit lands all at once.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::error::{BranchError, Result};
use crate::structs::{BranchContext, BranchId, MessageId};

type IndexKey = (BranchId, MessageId);

/// Conditions re-checked under the write lock when committing new branches.
#[derive(Debug, Clone)]
pub struct CommitGuard {
    pub parent_branch_id: BranchId,
    pub trigger_message_id: MessageId,
    pub max_branches: usize,
    pub allow_duplicate: bool,
}

#[derive(Debug, Default)]
struct Inner {
    branches: HashMap<BranchId, BranchContext>,
    by_branch_point: HashMap<IndexKey, Vec<BranchId>>,
    by_response: HashMap<IndexKey, Vec<BranchId>>,
}

impl Inner {
    fn index(&mut self, ctx: &BranchContext) {
        let Some(parent) = ctx.parent_branch_id.clone() else {
            return;
        };
        if let Some(point) = ctx.branch_point() {
            self.by_branch_point
                .entry((parent.clone(), point.clone()))
                .or_default()
                .push(ctx.branch_id.clone());
        }
        if let Some(response) = &ctx.metadata.response_message_id {
            self.by_response
                .entry((parent, response.clone()))
                .or_default()
                .push(ctx.branch_id.clone());
        }
    }

    fn unindex(&mut self, ctx: &BranchContext) {
        let Some(parent) = ctx.parent_branch_id.clone() else {
            return;
        };
        if let Some(point) = ctx.branch_point() {
            remove_from_index(&mut self.by_branch_point, (parent.clone(), point.clone()), &ctx.branch_id);
        }
        if let Some(response) = &ctx.metadata.response_message_id {
            remove_from_index(&mut self.by_response, (parent, response.clone()), &ctx.branch_id);
        }
    }

    fn insert(&mut self, ctx: BranchContext) {
        if let Some(previous) = self.branches.remove(&ctx.branch_id) {
            self.unindex(&previous);
        }
        self.index(&ctx);
        self.branches.insert(ctx.branch_id.clone(), ctx);
    }

    fn remove(&mut self, branch_id: &BranchId) -> Option<BranchContext> {
        let ctx = self.branches.remove(branch_id)?;
        self.unindex(&ctx);
        Some(ctx)
    }

    fn lookup(index: &HashMap<IndexKey, Vec<BranchId>>, parent: &BranchId, message: &MessageId) -> Vec<BranchId> {
        index
            .get(&(parent.clone(), message.clone()))
            .cloned()
            .unwrap_or_default()
    }
}

fn remove_from_index(index: &mut HashMap<IndexKey, Vec<BranchId>>, key: IndexKey, branch_id: &BranchId) {
    if let Some(ids) = index.get_mut(&key) {
        ids.retain(|id| id != branch_id);
        if ids.is_empty() {
            index.remove(&key);
        }
    }
}

#[derive(Debug, Default)]
pub struct BranchStore {
    inner: RwLock<Inner>,
}

impl BranchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by branch id.
    pub fn set(&self, ctx: BranchContext) {
        self.inner.write().insert(ctx);
    }

    /// A copy of the branch record. Callers resolve from this snapshot, so a
    /// concurrent append never shows up half-written.
    pub fn get(&self, branch_id: &BranchId) -> Option<BranchContext> {
        self.inner.read().branches.get(branch_id).cloned()
    }

    pub fn has(&self, branch_id: &BranchId) -> bool {
        self.inner.read().branches.contains_key(branch_id)
    }

    pub fn remove(&self, branch_id: &BranchId) -> Option<BranchContext> {
        self.inner.write().remove(branch_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().branches.is_empty()
    }

    /// Branches of `parent` whose branch point is `message_id`, oldest first.
    pub fn branches_from(&self, parent: &BranchId, message_id: &MessageId) -> Vec<BranchId> {
        Inner::lookup(&self.inner.read().by_branch_point, parent, message_id)
    }

    /// Branches of `parent` forked for the AI response `message_id`.
    pub fn branches_for_response(&self, parent: &BranchId, message_id: &MessageId) -> Vec<BranchId> {
        Inner::lookup(&self.inner.read().by_response, parent, message_id)
    }

    pub fn children_of(&self, parent: &BranchId) -> Vec<BranchId> {
        let inner = self.inner.read();
        let mut children: Vec<&BranchContext> = inner
            .branches
            .values()
            .filter(|ctx| ctx.parent_branch_id.as_ref() == Some(parent))
            .collect();
        children.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then_with(|| a.branch_id.cmp(&b.branch_id))
        });
        children.into_iter().map(|ctx| ctx.branch_id.clone()).collect()
    }

    /// Push a message id onto a branch's own list.
    ///
    /// Returns `Ok(false)` when the id is already visible in the branch.
    pub fn append_message_id(&self, branch_id: &BranchId, message_id: MessageId) -> Result<bool> {
        let mut inner = self.inner.write();
        let ctx = inner
            .branches
            .get_mut(branch_id)
            .ok_or_else(|| BranchError::BranchNotFound(branch_id.clone()))?;
        if ctx.references(&message_id) {
            return Ok(false);
        }
        ctx.branch_message_ids.push(message_id);
        Ok(true)
    }

    /// Drop a message id from a branch's own list.
    pub fn remove_message_id(&self, branch_id: &BranchId, message_id: &MessageId) -> bool {
        let mut inner = self.inner.write();
        let Some(ctx) = inner.branches.get_mut(branch_id) else {
            return false;
        };
        let before = ctx.branch_message_ids.len();
        ctx.branch_message_ids.retain(|id| id != message_id);
        before != ctx.branch_message_ids.len()
    }

    /// Point a branch at a new parent, keeping its snapshot.
    pub fn reparent(&self, branch_id: &BranchId, new_parent: Option<BranchId>) -> Result<()> {
        let mut inner = self.inner.write();
        let mut ctx = inner
            .remove(branch_id)
            .ok_or_else(|| BranchError::BranchNotFound(branch_id.clone()))?;
        ctx.parent_branch_id = new_parent;
        inner.insert(ctx);
        Ok(())
    }

    /// Write a batch of new branches or none of them.
    ///
    /// The guard's limit and duplicate rules are evaluated again here, under
    /// the write lock, because the caller checked them before a gap.
    pub fn commit(&self, contexts: Vec<BranchContext>, guard: &CommitGuard) -> Result<()> {
        let mut inner = self.inner.write();

        let mut seen = HashSet::new();
        for ctx in &contexts {
            if inner.branches.contains_key(&ctx.branch_id) || !seen.insert(ctx.branch_id.clone()) {
                return Err(BranchError::BranchExists(ctx.branch_id.clone()));
            }
        }

        let existing = Inner::lookup(
            &inner.by_branch_point,
            &guard.parent_branch_id,
            &guard.trigger_message_id,
        )
        .len();
        let incoming = contexts
            .iter()
            .filter(|ctx| ctx.branch_point() == Some(&guard.trigger_message_id))
            .count();
        if existing + incoming > guard.max_branches {
            return Err(BranchError::LimitReached {
                trigger: guard.trigger_message_id.clone(),
                existing,
                max: guard.max_branches,
            });
        }

        if !guard.allow_duplicate {
            for ctx in &contexts {
                if let Some(response) = &ctx.metadata.response_message_id {
                    if let Some(first) = Inner::lookup(&inner.by_response, &guard.parent_branch_id, response).first() {
                        return Err(BranchError::BranchExists(first.clone()));
                    }
                }
            }
        }

        for ctx in contexts {
            inner.insert(ctx);
        }
        Ok(())
    }

    /// All branches, root first, then by creation time.
    pub fn snapshot(&self) -> Vec<BranchContext> {
        let mut branches: Vec<BranchContext> = self.inner.read().branches.values().cloned().collect();
        branches.sort_by(|a, b| {
            b.is_root()
                .cmp(&a.is_root())
                .then_with(|| a.metadata.created_at.cmp(&b.metadata.created_at))
                .then_with(|| a.branch_id.cmp(&b.branch_id))
        });
        branches
    }
}
