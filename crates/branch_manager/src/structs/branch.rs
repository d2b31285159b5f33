use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::MessageId;

/// Name of the implicit root branch.
pub const MAIN_BRANCH: &str = "main";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct BranchId(String);

impl BranchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn main() -> Self {
        Self(MAIN_BRANCH.to_string())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn is_main(&self) -> bool {
        self.0 == MAIN_BRANCH
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BranchId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for BranchId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A model selected for a branch.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ModelRef {
    pub id: String,
    pub name: String,
}

impl ModelRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Inherited history captured when the branch was created.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ContextSnapshot {
    /// The message the branch was created from. `None` for the root.
    pub branch_point_message_id: Option<MessageId>,

    /// In-order prefix of the parent's display context.
    pub inherited_message_ids: Vec<MessageId>,

    pub snapshot_timestamp: DateTime<Utc>,
}

impl ContextSnapshot {
    pub fn empty() -> Self {
        Self {
            branch_point_message_id: None,
            inherited_message_ids: Vec::new(),
            snapshot_timestamp: Utc::now(),
        }
    }

    pub fn at(branch_point: MessageId, inherited_message_ids: Vec<MessageId>) -> Self {
        Self {
            branch_point_message_id: Some(branch_point),
            inherited_message_ids,
            snapshot_timestamp: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BranchMetadata {
    /// Models answering in this branch.
    #[serde(default)]
    pub models: Vec<ModelRef>,

    /// Shared by sibling branches created in one fan-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    /// The AI response this branch was forked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message_id: Option<MessageId>,

    pub created_at: DateTime<Utc>,
}

impl Default for BranchMetadata {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            group_id: None,
            response_message_id: None,
            created_at: Utc::now(),
        }
    }
}

/// One branch of the conversation graph.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BranchContext {
    pub branch_id: BranchId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_branch_id: Option<BranchId>,

    pub context_snapshot: ContextSnapshot,

    /// Messages authored directly in this branch, in append order.
    #[serde(default)]
    pub branch_message_ids: Vec<MessageId>,

    #[serde(default)]
    pub metadata: BranchMetadata,
}

impl BranchContext {
    /// The degenerate root branch: no parent, empty snapshot.
    pub fn root() -> Self {
        Self {
            branch_id: BranchId::main(),
            parent_branch_id: None,
            context_snapshot: ContextSnapshot::empty(),
            branch_message_ids: Vec::new(),
            metadata: BranchMetadata::default(),
        }
    }

    pub fn child(branch_id: BranchId, parent_branch_id: BranchId, snapshot: ContextSnapshot) -> Self {
        Self {
            branch_id,
            parent_branch_id: Some(parent_branch_id),
            context_snapshot: snapshot,
            branch_message_ids: Vec::new(),
            metadata: BranchMetadata::default(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_branch_id.is_none()
    }

    pub fn branch_point(&self) -> Option<&MessageId> {
        self.context_snapshot.branch_point_message_id.as_ref()
    }

    /// Whether the id is visible in this branch, inherited or own.
    pub fn references(&self, message_id: &MessageId) -> bool {
        self.context_snapshot.inherited_message_ids.contains(message_id)
            || self.branch_message_ids.contains(message_id)
    }

    pub fn message_count(&self) -> usize {
        self.context_snapshot.inherited_message_ids.len() + self.branch_message_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_branch_has_no_snapshot() {
        let root = BranchContext::root();
        assert!(root.is_root());
        assert!(root.branch_id.is_main());
        assert!(root.branch_point().is_none());
        assert_eq!(root.message_count(), 0);
    }

    #[test]
    fn child_references_inherited_and_own() {
        let snapshot = ContextSnapshot::at(MessageId::new("u1"), vec![MessageId::new("u1")]);
        let mut child = BranchContext::child(BranchId::new("b1"), BranchId::main(), snapshot);
        child.branch_message_ids.push(MessageId::new("a1"));

        assert!(!child.is_root());
        assert!(child.references(&MessageId::new("u1")));
        assert!(child.references(&MessageId::new("a1")));
        assert!(!child.references(&MessageId::new("a2")));
        assert_eq!(child.message_count(), 2);
    }
}
