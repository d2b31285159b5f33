pub mod branch;
pub mod message;
pub mod state;

pub use branch::{BranchContext, BranchId, BranchMetadata, ContextSnapshot, ModelRef, MAIN_BRANCH};
pub use message::{Author, Message, MessageBody, MessageId};
pub use state::ConversationState;
