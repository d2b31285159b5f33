//! Shared pools for messages and branches, plus the creation lock table.

mod branch_store;
mod locks;
mod message_store;

pub use branch_store::{BranchStore, CommitGuard};
pub use locks::{LockGuard, TriggerLocks};
pub use message_store::MessageStore;
