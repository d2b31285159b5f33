//! Conversation - the surface the presentation layer talks to
//!
//! Owns one message pool, one branch pool and the creation lock table.
//! Every operation borrows them explicitly; nothing is global.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::{BranchConfig, DeletePolicy};
use crate::creation::{BranchCreationProtocol, BranchOutcome, CreateBranchRequest};
use crate::error::{BranchError, Result};
use crate::graph::BranchGraph;
use crate::resolver::ContextResolver;
use crate::store::{BranchStore, MessageStore, TriggerLocks};
use crate::structs::{BranchContext, BranchId, ConversationState, Message, MessageId};

/// What `cancel_response` did with the partial message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Partial text kept and finalized.
    Finalized,
    /// Nothing had streamed yet; the message was dropped.
    Discarded,
    /// The message was already final.
    AlreadyFinal,
}

#[derive(Debug)]
pub struct Conversation {
    id: String,
    messages: MessageStore,
    branches: BranchStore,
    locks: TriggerLocks,
    config: BranchConfig,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, BranchConfig::default())
    }

    pub fn with_config(id: impl Into<String>, config: BranchConfig) -> Self {
        let branches = BranchStore::new();
        branches.set(BranchContext::root());
        Self {
            id: id.into(),
            messages: MessageStore::new(),
            branches,
            locks: TriggerLocks::new(config.lock_timeout()),
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &BranchConfig {
        &self.config
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn branches(&self) -> &BranchStore {
        &self.branches
    }

    pub fn locks(&self) -> &TriggerLocks {
        &self.locks
    }

    pub fn resolver(&self) -> ContextResolver<'_> {
        ContextResolver::new(&self.messages, &self.branches)
    }

    pub fn display_context(&self, branch_id: &BranchId) -> Vec<Message> {
        self.resolver().display_context(branch_id)
    }

    pub fn branch(&self, branch_id: &BranchId) -> Option<BranchContext> {
        self.branches.get(branch_id)
    }

    pub fn graph(&self) -> BranchGraph {
        BranchGraph::from_store(&self.branches)
    }

    /// Append a message to a branch's own history.
    ///
    /// Returns `Ok(false)` without touching anything when the id is already
    /// visible in the branch. An id already in the pool keeps its stored
    /// record. A missing `parent_id` on a new record is filled with the last
    /// visible message.
    pub fn append_message(&self, branch_id: &BranchId, mut message: Message) -> Result<bool> {
        let ctx = self
            .branches
            .get(branch_id)
            .ok_or_else(|| BranchError::BranchNotFound(branch_id.clone()))?;
        if ctx.references(&message.id) {
            tracing::debug!(
                branch_id = %branch_id,
                message_id = %message.id,
                "Conversation: message already in branch, append skipped"
            );
            return Ok(false);
        }

        let message_id = message.id.clone();
        let is_user = message.is_user();
        if self.messages.has(&message_id) {
            // Other branches share the pooled record; only the id is added here.
            tracing::debug!(
                branch_id = %branch_id,
                message_id = %message_id,
                "Conversation: message already pooled, keeping stored record"
            );
        } else {
            if message.parent_id.is_none() {
                message.parent_id = self.display_context(branch_id).last().map(|m| m.id.clone());
            }
            self.messages.insert_if_absent(message);
        }
        let appended = self.branches.append_message_id(branch_id, message_id.clone())?;

        tracing::info!(
            conversation_id = %self.id,
            branch_id = %branch_id,
            message_id = %message_id,
            is_user = is_user,
            appended = appended,
            "Conversation: message appended"
        );
        Ok(appended)
    }

    pub fn create_branch(&self, request: &CreateBranchRequest) -> BranchOutcome {
        BranchCreationProtocol::new(&self.messages, &self.branches, &self.locks, &self.config).create(request)
    }

    /// Delete a branch with the configured policy.
    pub fn delete_branch(&self, branch_id: &BranchId) -> Result<Vec<BranchId>> {
        self.delete_branch_with(branch_id, self.config.delete_policy)
    }

    /// Delete a branch record. Messages stay in the pool; other branches may
    /// still reference them. Returns every branch id removed.
    pub fn delete_branch_with(&self, branch_id: &BranchId, policy: DeletePolicy) -> Result<Vec<BranchId>> {
        let ctx = self
            .branches
            .get(branch_id)
            .ok_or_else(|| BranchError::BranchNotFound(branch_id.clone()))?;
        if ctx.is_root() {
            return Err(BranchError::RootImmutable);
        }

        let children = self.branches.children_of(branch_id);
        let removed = match policy {
            DeletePolicy::Reject if !children.is_empty() => {
                return Err(BranchError::HasChildren {
                    branch_id: branch_id.clone(),
                    children: children.len(),
                });
            }
            DeletePolicy::Reject => vec![branch_id.clone()],
            DeletePolicy::Reparent => {
                for child in &children {
                    self.branches.reparent(child, ctx.parent_branch_id.clone())?;
                }
                vec![branch_id.clone()]
            }
            DeletePolicy::Cascade => {
                let mut removed = vec![branch_id.clone()];
                removed.extend(self.graph().descendants(branch_id));
                removed
            }
        };

        for id in &removed {
            self.branches.remove(id);
        }

        tracing::info!(
            conversation_id = %self.id,
            branch_id = %branch_id,
            policy = ?policy,
            removed = removed.len(),
            reparented = if policy == DeletePolicy::Reparent { children.len() } else { 0 },
            "Conversation: branch deleted"
        );
        Ok(removed)
    }

    /// Start a streaming AI response in `branch_id`.
    pub fn begin_response(
        &self,
        branch_id: &BranchId,
        model: impl Into<String>,
        group_id: Option<String>,
    ) -> Result<MessageId> {
        let mut message = Message::streaming(MessageId::generate(), model);
        message.group_id = group_id;
        let message_id = message.id.clone();
        self.append_message(branch_id, message)?;
        Ok(message_id)
    }

    /// Append streamed text. Returns the accumulated length.
    pub fn append_chunk(&self, message_id: &MessageId, delta: &str) -> Result<usize> {
        let accumulated = self
            .messages
            .update(message_id, |message| {
                if delta.is_empty() {
                    return Ok(message.text().len());
                }
                message.append_chunk(delta)
            })
            .ok_or_else(|| BranchError::MessageNotFound(message_id.clone()))??;

        tracing::trace!(
            message_id = %message_id,
            delta_len = delta.len(),
            accumulated = accumulated,
            "Conversation: chunk appended"
        );
        Ok(accumulated)
    }

    /// Finalize a streaming response. Returns false if it was already final.
    pub fn finalize_response(&self, message_id: &MessageId) -> Result<bool> {
        let finalized = self
            .messages
            .update(message_id, Message::finalize)
            .ok_or_else(|| BranchError::MessageNotFound(message_id.clone()))?;
        tracing::debug!(message_id = %message_id, finalized = finalized, "Conversation: response finalized");
        Ok(finalized)
    }

    /// Stop a generation: keep what streamed so far, or drop an empty reply.
    pub fn cancel_response(&self, branch_id: &BranchId, message_id: &MessageId) -> Result<CancelOutcome> {
        let message = self
            .messages
            .get(message_id)
            .ok_or_else(|| BranchError::MessageNotFound(message_id.clone()))?;

        let outcome = if !message.is_streaming() {
            CancelOutcome::AlreadyFinal
        } else if message.text().is_empty() {
            self.branches.remove_message_id(branch_id, message_id);
            self.messages.remove(message_id);
            CancelOutcome::Discarded
        } else {
            self.messages.update(message_id, Message::finalize);
            CancelOutcome::Finalized
        };

        tracing::info!(
            branch_id = %branch_id,
            message_id = %message_id,
            outcome = ?outcome,
            "Conversation: response cancelled"
        );
        Ok(outcome)
    }

    /// Drop messages no branch references any more. Returns how many went.
    pub fn collect_garbage(&self) -> usize {
        let referenced: HashSet<MessageId> = self
            .branches
            .snapshot()
            .into_iter()
            .flat_map(|ctx| {
                ctx.context_snapshot
                    .inherited_message_ids
                    .into_iter()
                    .chain(ctx.branch_message_ids)
            })
            .collect();

        let mut removed = 0;
        for id in self.messages.ids() {
            if !referenced.contains(&id) && self.messages.remove(&id).is_some() {
                removed += 1;
            }
        }

        tracing::info!(
            conversation_id = %self.id,
            removed = removed,
            remaining = self.messages.len(),
            "Conversation: garbage collected"
        );
        removed
    }

    /// Serializable copy of both pools for the persistence layer.
    pub fn to_state(&self) -> ConversationState {
        ConversationState {
            conversation_id: self.id.clone(),
            messages: self.messages.snapshot(),
            branches: self.branches.snapshot(),
        }
    }

    pub fn from_state(state: ConversationState, config: BranchConfig) -> Self {
        let conversation = Self {
            id: state.conversation_id,
            messages: MessageStore::new(),
            branches: BranchStore::new(),
            locks: TriggerLocks::new(config.lock_timeout()),
            config,
        };

        for message in state.messages {
            conversation.messages.set(message);
        }
        for ctx in state.branches {
            conversation.branches.set(ctx);
        }
        if !conversation.branches.has(&BranchId::main()) {
            tracing::warn!(
                conversation_id = %conversation.id,
                "Conversation: restored state had no root branch, creating one"
            );
            conversation.branches.set(BranchContext::root());
        }

        tracing::info!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            branches = conversation.branches.len(),
            "Conversation: restored from state"
        );
        conversation
    }
}
