use serde::{Deserialize, Serialize};

use crate::structs::{BranchId, MessageId, ModelRef};

/// Where a branch-creation call stopped.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreationPhase {
    Idle,
    Locked,
    Resolving,
    Fanout,
    Committed,
    Aborted,
}

/// Why a call created nothing.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    LimitReached,
    Locked,
    NotFound,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CreateBranchOptions {
    /// Create another branch even when one already exists for the trigger.
    #[serde(default)]
    pub allow_duplicate: bool,

    /// Tag shared by every branch this call creates.
    #[serde(default)]
    pub group_id: Option<String>,

    /// Models currently selected in the UI, in display order.
    #[serde(default)]
    pub selected_models: Vec<ModelRef>,
}

impl CreateBranchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_duplicate(mut self) -> Self {
        self.allow_duplicate = true;
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_models<I>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = ModelRef>,
    {
        self.selected_models = models.into_iter().collect();
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CreateBranchRequest {
    pub parent_branch_id: BranchId,
    pub trigger_message_id: MessageId,
    pub multi_branch: bool,
    #[serde(default)]
    pub options: CreateBranchOptions,
}

impl CreateBranchRequest {
    pub fn single(parent: impl Into<BranchId>, trigger: impl Into<MessageId>) -> Self {
        Self {
            parent_branch_id: parent.into(),
            trigger_message_id: trigger.into(),
            multi_branch: false,
            options: CreateBranchOptions::default(),
        }
    }

    pub fn multi(parent: impl Into<BranchId>, trigger: impl Into<MessageId>) -> Self {
        Self {
            multi_branch: true,
            ..Self::single(parent, trigger)
        }
    }

    pub fn with_options(mut self, options: CreateBranchOptions) -> Self {
        self.options = options;
        self
    }
}

/// Result of a `create_branch` call. Never an error: a rejection is data.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BranchOutcome {
    pub created_branch_ids: Vec<BranchId>,
    pub existing_branch_ids: Vec<BranchId>,
    pub rejected: Option<Rejection>,
    pub phase: CreationPhase,
}

impl BranchOutcome {
    /// Nothing new, but there are branches the caller can navigate to.
    pub fn is_duplicate(&self) -> bool {
        self.created_branch_ids.is_empty()
            && !self.existing_branch_ids.is_empty()
            && self.rejected.is_none()
    }

    /// The branch a UI should focus after the call.
    pub fn focus(&self) -> Option<&BranchId> {
        self.created_branch_ids
            .first()
            .or_else(|| self.existing_branch_ids.first())
    }
}
