//! BranchCreationProtocol - forking branches from a message
//!
//! A call moves through `Idle -> Locked -> Resolving -> Fanout -> Committed`,
//! or stops at `Aborted`. The trigger lock is a scoped guard, so every early
//! return releases it. New branch records are planned in memory and written
//! in a single `BranchStore::commit`, which either lands all of them or
//! none.

mod attribution;
mod outcome;

pub use attribution::{match_selected, resolve_models};
pub use outcome::{
    BranchOutcome, CreateBranchOptions, CreateBranchRequest, CreationPhase, Rejection,
};

use std::collections::HashSet;

use uuid::Uuid;

use crate::config::BranchConfig;
use crate::error::BranchError;
use crate::resolver::ContextResolver;
use crate::store::{BranchStore, CommitGuard, LockGuard, MessageStore, TriggerLocks};
use crate::structs::{BranchContext, BranchId, ContextSnapshot, Message, MessageId, ModelRef};

/// Tracks the phase of one creation call for logging and the final outcome.
struct CreationRun<'r> {
    request: &'r CreateBranchRequest,
    phase: CreationPhase,
}

impl<'r> CreationRun<'r> {
    fn new(request: &'r CreateBranchRequest) -> Self {
        Self {
            request,
            phase: CreationPhase::Idle,
        }
    }

    fn advance(&mut self, next: CreationPhase) {
        tracing::debug!(
            parent_branch_id = %self.request.parent_branch_id,
            trigger_message_id = %self.request.trigger_message_id,
            from = ?self.phase,
            to = ?next,
            "BranchCreation: phase transition"
        );
        self.phase = next;
    }

    fn reject(mut self, rejection: Rejection, existing: Vec<BranchId>) -> BranchOutcome {
        if self.phase != CreationPhase::Idle {
            self.advance(CreationPhase::Aborted);
        }
        tracing::info!(
            parent_branch_id = %self.request.parent_branch_id,
            trigger_message_id = %self.request.trigger_message_id,
            rejection = ?rejection,
            phase = ?self.phase,
            "BranchCreation: rejected"
        );
        BranchOutcome {
            created_branch_ids: Vec::new(),
            existing_branch_ids: existing,
            rejected: Some(rejection),
            phase: self.phase,
        }
    }

    fn existing(mut self, existing: Vec<BranchId>) -> BranchOutcome {
        if self.phase != CreationPhase::Idle {
            self.advance(CreationPhase::Aborted);
        }
        tracing::info!(
            parent_branch_id = %self.request.parent_branch_id,
            trigger_message_id = %self.request.trigger_message_id,
            existing = existing.len(),
            "BranchCreation: branch already exists"
        );
        BranchOutcome {
            created_branch_ids: Vec::new(),
            existing_branch_ids: existing,
            rejected: None,
            phase: self.phase,
        }
    }

    fn committed(mut self, created: Vec<BranchId>, existing: Vec<BranchId>) -> BranchOutcome {
        self.advance(CreationPhase::Committed);
        tracing::info!(
            parent_branch_id = %self.request.parent_branch_id,
            trigger_message_id = %self.request.trigger_message_id,
            created = created.len(),
            existing = existing.len(),
            "BranchCreation: committed"
        );
        BranchOutcome {
            created_branch_ids: created,
            existing_branch_ids: existing,
            rejected: None,
            phase: self.phase,
        }
    }
}

pub struct BranchCreationProtocol<'a> {
    messages: &'a MessageStore,
    branches: &'a BranchStore,
    locks: &'a TriggerLocks,
    config: &'a BranchConfig,
}

impl<'a> BranchCreationProtocol<'a> {
    pub fn new(
        messages: &'a MessageStore,
        branches: &'a BranchStore,
        locks: &'a TriggerLocks,
        config: &'a BranchConfig,
    ) -> Self {
        Self {
            messages,
            branches,
            locks,
            config,
        }
    }

    pub fn create(&self, request: &CreateBranchRequest) -> BranchOutcome {
        let mut run = CreationRun::new(request);
        let parent = &request.parent_branch_id;
        let trigger = &request.trigger_message_id;
        let options = &request.options;

        // Cheap, lock-free checks first so repeated clicks cost nothing.
        let existing = self.branches.branches_from(parent, trigger);
        if existing.len() >= self.config.max_branches_per_trigger {
            return run.reject(Rejection::LimitReached, existing);
        }
        if !existing.is_empty() && !request.multi_branch && !options.allow_duplicate {
            return run.existing(existing);
        }
        let Some(parent_ctx) = self.branches.get(parent) else {
            tracing::warn!(parent_branch_id = %parent, "BranchCreation: parent branch not found");
            return run.reject(Rejection::NotFound, existing);
        };

        let _trigger_guard = match self.locks.acquire(trigger) {
            Ok(guard) => guard,
            Err(err) => {
                tracing::debug!(error = %err, "BranchCreation: trigger locked");
                return run.reject(Rejection::Locked, existing);
            }
        };
        run.advance(CreationPhase::Locked);

        // Another call may have committed between the first read and the lock.
        let existing = self.branches.branches_from(parent, trigger);
        if !existing.is_empty() && !request.multi_branch && !options.allow_duplicate {
            return run.existing(existing);
        }

        run.advance(CreationPhase::Resolving);
        let mut history = ContextResolver::new(self.messages, self.branches).display_context(parent);
        let trigger_index = match history.iter().position(|m| &m.id == trigger) {
            Some(index) => index,
            None => match self.messages.get(trigger) {
                Some(message) => {
                    tracing::warn!(
                        parent_branch_id = %parent,
                        trigger_message_id = %trigger,
                        "BranchCreation: trigger not in resolved history, using message pool"
                    );
                    history.push(message);
                    history.len() - 1
                }
                None => return run.reject(Rejection::NotFound, existing),
            },
        };

        let trigger_message = &history[trigger_index];
        let responses = response_set(
            &history,
            trigger_index,
            request.multi_branch,
            &options.selected_models,
        );

        run.advance(CreationPhase::Fanout);
        let through_trigger: Vec<MessageId> =
            history[..=trigger_index].iter().map(|m| m.id.clone()).collect();
        let before_trigger = through_trigger[..trigger_index].to_vec();

        let group_id = options.group_id.clone().or_else(|| {
            (request.multi_branch && responses.len() > 1).then(|| Uuid::new_v4().to_string())
        });

        let mut planned: Vec<BranchContext> = Vec::new();
        let mut frozen: Vec<Message> = Vec::new();
        let mut skipped_existing: Vec<BranchId> = Vec::new();
        let mut response_guards: Vec<LockGuard<'_>> = Vec::new();
        let mut claimed: Vec<usize> = Vec::new();
        let fallback = self.fallback_models(&parent_ctx, &history[..trigger_index]);

        if responses.is_empty() {
            // A prompt nobody has answered yet: fork right after it, once.
            if !options.allow_duplicate {
                if let Some(unanswered) = existing
                    .iter()
                    .find(|id| self.branches.get(id).is_some_and(|ctx| ctx.metadata.response_message_id.is_none()))
                {
                    tracing::debug!(
                        branch_id = %unanswered,
                        "BranchCreation: unanswered prompt already has a branch"
                    );
                    return run.existing(existing.clone());
                }
            }
            let models = resolve_models(None, &options.selected_models, &mut claimed, &fallback);
            let ctx = self.plan_child(request, through_trigger.clone(), None, models, group_id.clone(), &mut frozen);
            planned.push(ctx);
        }

        for response in &responses {
            if !options.allow_duplicate {
                if let Some(first) = self.branches.branches_for_response(parent, &response.id).first() {
                    tracing::debug!(
                        response_message_id = %response.id,
                        branch_id = %first,
                        "BranchCreation: response already has a branch, skipping"
                    );
                    skipped_existing.push(first.clone());
                    continue;
                }
            }
            if &response.id != trigger {
                match self.locks.try_acquire(&response.id) {
                    Some(guard) => response_guards.push(guard),
                    None => {
                        tracing::debug!(
                            response_message_id = %response.id,
                            "BranchCreation: response locked by another creation, skipping"
                        );
                        continue;
                    }
                }
            }

            let inherited = if trigger_message.is_ai() {
                before_trigger.clone()
            } else {
                through_trigger.clone()
            };
            let models = resolve_models(
                response.model(),
                &options.selected_models,
                &mut claimed,
                &fallback,
            );
            let ctx = self.plan_child(request, inherited, Some(response), models, group_id.clone(), &mut frozen);
            planned.push(ctx);
        }

        let mut known = existing.clone();
        for id in skipped_existing {
            if !known.contains(&id) {
                known.push(id);
            }
        }

        if planned.is_empty() {
            if known.is_empty() {
                return run.reject(Rejection::Locked, known);
            }
            return run.existing(known);
        }

        if existing.len() + planned.len() > self.config.max_branches_per_trigger {
            return run.reject(Rejection::LimitReached, known);
        }

        let guard = CommitGuard {
            parent_branch_id: parent.clone(),
            trigger_message_id: trigger.clone(),
            max_branches: self.config.max_branches_per_trigger,
            allow_duplicate: options.allow_duplicate,
        };
        let created: Vec<BranchId> = planned.iter().map(|ctx| ctx.branch_id.clone()).collect();

        // Frozen copies go in first so the new branches never point at ids
        // missing from the pool; they are taken back out if the commit fails.
        for message in &frozen {
            self.messages.set(message.clone());
        }
        let committed = self.branches.commit(planned, &guard);
        if committed.is_err() {
            for message in &frozen {
                self.messages.remove(&message.id);
            }
        }

        match committed {
            Ok(()) => {}
            Err(BranchError::LimitReached { .. }) => return run.reject(Rejection::LimitReached, known),
            Err(BranchError::BranchExists(id)) => {
                // Lost a race with another creation between planning and commit.
                if !known.contains(&id) {
                    known.push(id);
                }
                return run.existing(known);
            }
            Err(err) => {
                tracing::warn!(error = %err, "BranchCreation: commit failed");
                return run.reject(Rejection::NotFound, known);
            }
        }

        for message in history {
            self.messages.insert_if_absent(message);
        }

        run.committed(created, known)
    }

    /// Models of the nearest ancestor that has any, else the model of the
    /// latest AI message before the trigger.
    fn fallback_models(&self, parent_ctx: &BranchContext, before_trigger: &[Message]) -> Vec<ModelRef> {
        let mut visited = HashSet::new();
        let mut current = Some(parent_ctx.clone());
        while let Some(ctx) = current {
            if !ctx.metadata.models.is_empty() {
                return ctx.metadata.models;
            }
            if !visited.insert(ctx.branch_id.clone()) {
                break;
            }
            current = ctx.parent_branch_id.as_ref().and_then(|p| self.branches.get(p));
        }

        before_trigger
            .iter()
            .rev()
            .find_map(|m| m.model())
            .map(|model| vec![ModelRef::new(model, model)])
            .unwrap_or_default()
    }

    fn plan_child(
        &self,
        request: &CreateBranchRequest,
        inherited: Vec<MessageId>,
        response: Option<&Message>,
        models: Vec<ModelRef>,
        group_id: Option<String>,
        frozen: &mut Vec<Message>,
    ) -> BranchContext {
        let snapshot = ContextSnapshot::at(request.trigger_message_id.clone(), inherited);
        let mut ctx = BranchContext::child(BranchId::generate(), request.parent_branch_id.clone(), snapshot);

        if let Some(response) = response {
            ctx.metadata.response_message_id = Some(response.id.clone());
            // A placeholder has streamed nothing yet; the branch starts empty.
            if !response.is_placeholder() {
                let own_id = if response.is_streaming() {
                    // Keep the text streamed so far; the rest stays with the parent.
                    let copy = freeze(response);
                    let id = copy.id.clone();
                    frozen.push(copy);
                    id
                } else {
                    response.id.clone()
                };
                ctx.branch_message_ids.push(own_id);
            }
        }
        if models.is_empty() {
            tracing::warn!(
                branch_id = %ctx.branch_id,
                "BranchCreation: no model could be attributed to branch"
            );
        }
        ctx.metadata.models = models;
        ctx.metadata.group_id = group_id;
        ctx
    }
}

/// A finalized copy of a message that is still streaming.
fn freeze(message: &Message) -> Message {
    let mut copy = message.clone();
    copy.id = MessageId::generate();
    copy.finalize();
    copy
}

/// The AI messages to branch from, given the trigger's position in history.
fn response_set<'h>(
    history: &'h [Message],
    trigger_index: usize,
    multi_branch: bool,
    selected: &[ModelRef],
) -> Vec<&'h Message> {
    let trigger = &history[trigger_index];
    if trigger.is_ai() {
        return vec![trigger];
    }

    let answers = history[trigger_index + 1..]
        .iter()
        .take_while(|m| m.is_ai());

    if !multi_branch {
        return answers.take(1).collect();
    }

    // Order by the selected model each response belongs to, not by arrival.
    let mut answers: Vec<(usize, &Message)> = answers
        .map(|m| {
            let rank = m
                .model()
                .and_then(|model| match_selected(model, selected))
                .unwrap_or(usize::MAX);
            (rank, m)
        })
        .collect();
    answers.sort_by_key(|(rank, _)| *rank);
    answers.into_iter().map(|(_, m)| m).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<Message> {
        vec![
            Message::user("u1", "question"),
            Message::ai("a1", "gpt", "one"),
            Message::ai("a2", "claude", "two"),
            Message::user("u2", "follow-up"),
            Message::ai("a3", "gpt", "three"),
        ]
    }

    fn ids(messages: &[&Message]) -> Vec<String> {
        messages.iter().map(|m| m.id.to_string()).collect()
    }

    #[test]
    fn ai_trigger_is_its_own_response() {
        let history = history();
        assert_eq!(ids(&response_set(&history, 2, true, &[])), vec!["a2"]);
    }

    #[test]
    fn single_mode_takes_first_answer() {
        let history = history();
        assert_eq!(ids(&response_set(&history, 0, false, &[])), vec!["a1"]);
        assert!(response_set(&history[..1], 0, false, &[]).is_empty());
    }

    #[test]
    fn multi_mode_stops_at_next_user_message_and_orders_by_selection() {
        let history = history();
        let selected = vec![ModelRef::new("claude", "Claude"), ModelRef::new("gpt", "GPT")];
        assert_eq!(ids(&response_set(&history, 0, true, &selected)), vec!["a2", "a1"]);
        assert_eq!(ids(&response_set(&history, 3, true, &selected)), vec!["a3"]);
    }
}
