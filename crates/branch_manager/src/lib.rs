//! `branch_manager` keeps a branching conversation graph: a shared message
//! pool, branch records that reference an immutable prefix of their parent's
//! history, and the protocol that forks new branches from a message, one per
//! answering model when asked to.
//!
//! - `store` - MessageStore, BranchStore and the creation lock table
//! - `resolver` - display context of a branch
//! - `creation` - branch creation with duplicate prevention and fan-out
//! - `graph` - derived parent/children hierarchy and depth
//! - `conversation` - the facade the presentation layer calls

pub mod config;
pub mod conversation;
pub mod creation;
pub mod error;
pub mod graph;
pub mod resolver;
pub mod store;
pub mod structs;

// Re-export the public API
pub use config::{BranchConfig, DeletePolicy};
pub use conversation::{CancelOutcome, Conversation};
pub use creation::{
    BranchCreationProtocol, BranchOutcome, CreateBranchOptions, CreateBranchRequest, CreationPhase,
    Rejection,
};
pub use error::{BranchError, Result};
pub use graph::{BranchGraph, BranchNode};
pub use resolver::ContextResolver;
pub use store::{BranchStore, MessageStore, TriggerLocks};
pub use structs::{
    Author, BranchContext, BranchId, BranchMetadata, ContextSnapshot, ConversationState, Message,
    MessageBody, MessageId, ModelRef, MAIN_BRANCH,
};
