use serde::{Deserialize, Serialize};

use super::branch::BranchContext;
use super::message::Message;

/// Serializable form of a whole conversation, handed to the persistence layer.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ConversationState {
    pub conversation_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub branches: Vec<BranchContext>,
}
