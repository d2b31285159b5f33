//! Branch manager error types

use thiserror::Error;

use crate::structs::{BranchId, MessageId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BranchError {
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Branch not found: {0}")]
    BranchNotFound(BranchId),

    #[error("Branch limit reached: {existing} branches already exist from message {trigger} (max {max})")]
    LimitReached {
        trigger: MessageId,
        existing: usize,
        max: usize,
    },

    #[error("Branch creation already in progress for message {0}")]
    LockContention(MessageId),

    #[error("Invalid branch graph at {branch_id}: {reason}")]
    InvalidGraph { branch_id: BranchId, reason: String },

    #[error("Branch id already registered: {0}")]
    BranchExists(BranchId),

    #[error("The root branch cannot be deleted")]
    RootImmutable,

    #[error("Branch {branch_id} has {children} child branch(es)")]
    HasChildren { branch_id: BranchId, children: usize },

    #[error("Message {0} is already finalized")]
    AlreadyFinalized(MessageId),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BranchError {
    /// Errors the caller treats as "not yet visible" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::MessageNotFound(_) | Self::BranchNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, BranchError>;
