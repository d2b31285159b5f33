use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BranchError, Result};

/// Identifier of a message in the message pool.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Who wrote a message. Decided once at construction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Author {
    User,
    Ai { model: String },
}

/// Message content: partial while a model is generating, final afterwards.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageBody {
    Streaming { partial: String },
    Final { text: String },
}

/// A message in the pool. Immutable once finalized.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub author: Author,
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,

    /// The message this one directly replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,

    /// Links sibling AI responses generated for the same user prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl Message {
    pub fn user(id: impl Into<MessageId>, text: impl Into<String>) -> Self {
        Self::with_body(id.into(), Author::User, MessageBody::Final { text: text.into() })
    }

    pub fn ai(id: impl Into<MessageId>, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_body(
            id.into(),
            Author::Ai { model: model.into() },
            MessageBody::Final { text: text.into() },
        )
    }

    /// A streaming placeholder for a model that has started responding.
    pub fn streaming(id: impl Into<MessageId>, model: impl Into<String>) -> Self {
        Self::with_body(
            id.into(),
            Author::Ai { model: model.into() },
            MessageBody::Streaming {
                partial: String::new(),
            },
        )
    }

    fn with_body(id: MessageId, author: Author, body: MessageBody) -> Self {
        Self {
            id,
            author,
            body,
            timestamp: Utc::now(),
            parent_id: None,
            group_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<MessageId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_user(&self) -> bool {
        matches!(self.author, Author::User)
    }

    pub fn is_ai(&self) -> bool {
        matches!(self.author, Author::Ai { .. })
    }

    /// Model attribution, present iff the message is AI-authored.
    pub fn model(&self) -> Option<&str> {
        match &self.author {
            Author::Ai { model } => Some(model),
            Author::User => None,
        }
    }

    /// Final text when finalized, otherwise whatever has streamed so far.
    pub fn text(&self) -> &str {
        match &self.body {
            MessageBody::Final { text } => text,
            MessageBody::Streaming { partial } => partial,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, MessageBody::Streaming { .. })
    }

    /// An AI response slot that has not produced any text yet.
    pub fn is_placeholder(&self) -> bool {
        self.is_ai()
            && matches!(&self.body, MessageBody::Streaming { partial } if partial.is_empty())
    }

    /// Append a streamed chunk. Returns the accumulated length.
    pub fn append_chunk(&mut self, delta: &str) -> Result<usize> {
        match &mut self.body {
            MessageBody::Streaming { partial } => {
                partial.push_str(delta);
                Ok(partial.len())
            }
            MessageBody::Final { .. } => Err(BranchError::AlreadyFinalized(self.id.clone())),
        }
    }

    /// Move streamed text into the final body. Returns false if already final.
    pub fn finalize(&mut self) -> bool {
        match &mut self.body {
            MessageBody::Streaming { partial } => {
                let text = std::mem::take(partial);
                self.body = MessageBody::Final { text };
                true
            }
            MessageBody::Final { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_decides_ai_attribution() {
        let user = Message::user("u1", "hello");
        assert!(user.is_user());
        assert_eq!(user.model(), None);

        let ai = Message::ai("a1", "gpt-4o", "hi");
        assert!(ai.is_ai());
        assert_eq!(ai.model(), Some("gpt-4o"));
    }

    #[test]
    fn streaming_finalizes_once() {
        let mut msg = Message::streaming("a1", "claude");
        assert!(msg.is_placeholder());

        assert_eq!(msg.append_chunk("Hel").unwrap(), 3);
        assert_eq!(msg.append_chunk("lo").unwrap(), 5);
        assert!(!msg.is_placeholder());
        assert_eq!(msg.text(), "Hello");

        assert!(msg.finalize());
        assert!(!msg.finalize());
        assert_eq!(msg.body, MessageBody::Final { text: "Hello".to_string() });
        assert_eq!(
            msg.append_chunk("!"),
            Err(BranchError::AlreadyFinalized(MessageId::new("a1")))
        );
    }

    #[test]
    fn serializes_author_as_tagged_union() {
        let msg = Message::ai("a1", "gpt", "hi").with_group("g1");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["author"]["kind"], "ai");
        assert_eq!(value["author"]["model"], "gpt");
        assert_eq!(value["body"]["state"], "final");
        assert_eq!(value["group_id"], "g1");
        assert!(value.get("parent_id").is_none());

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }
}
