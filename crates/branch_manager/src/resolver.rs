//! ContextResolver - what a branch shows
//!
//! The display context of a branch is its inherited snapshot followed by its
//! own messages, each id looked up in the message pool. Insertion order is
//! authoritative; timestamps are never used to reorder.

use std::collections::HashSet;

use crate::store::{BranchStore, MessageStore};
use crate::structs::{BranchId, Message, MessageId};

pub struct ContextResolver<'a> {
    messages: &'a MessageStore,
    branches: &'a BranchStore,
}

impl<'a> ContextResolver<'a> {
    pub fn new(messages: &'a MessageStore, branches: &'a BranchStore) -> Self {
        Self { messages, branches }
    }

    /// Ordered messages visible in `branch_id`. Unknown branches resolve to
    /// an empty history.
    pub fn display_context(&self, branch_id: &BranchId) -> Vec<Message> {
        // `get` hands back a copy, so appends racing with this call are
        // either fully visible or not at all.
        let Some(ctx) = self.branches.get(branch_id) else {
            tracing::debug!(branch_id = %branch_id, "ContextResolver: branch not found");
            return Vec::new();
        };

        let capacity = ctx.message_count();
        let mut seen = HashSet::with_capacity(capacity);
        let mut resolved = Vec::with_capacity(capacity);

        self.resolve_into(branch_id, &ctx.context_snapshot.inherited_message_ids, &mut seen, &mut resolved);
        self.resolve_into(branch_id, &ctx.branch_message_ids, &mut seen, &mut resolved);

        tracing::debug!(
            branch_id = %branch_id,
            inherited = ctx.context_snapshot.inherited_message_ids.len(),
            own = ctx.branch_message_ids.len(),
            resolved = resolved.len(),
            "ContextResolver: display context resolved"
        );
        resolved
    }

    /// Ids of the messages `display_context` would return.
    pub fn display_ids(&self, branch_id: &BranchId) -> Vec<MessageId> {
        self.display_context(branch_id)
            .into_iter()
            .map(|message| message.id)
            .collect()
    }

    fn resolve_into(
        &self,
        branch_id: &BranchId,
        ids: &[MessageId],
        seen: &mut HashSet<MessageId>,
        out: &mut Vec<Message>,
    ) {
        for id in ids {
            if seen.contains(id) {
                tracing::debug!(
                    branch_id = %branch_id,
                    message_id = %id,
                    "ContextResolver: skipping duplicate id"
                );
                continue;
            }
            match self.messages.get(id) {
                Some(message) => {
                    seen.insert(id.clone());
                    out.push(message);
                }
                None => {
                    tracing::warn!(
                        branch_id = %branch_id,
                        message_id = %id,
                        "ContextResolver: message not in pool yet, skipping"
                    );
                }
            }
        }
    }
}
