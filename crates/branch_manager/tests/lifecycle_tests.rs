//! Deletion, garbage collection, persistence round trips and concurrent creation

use std::sync::Arc;
use std::thread;

use branch_manager::{
    BranchConfig, BranchError, BranchId, Conversation, ConversationState, CreateBranchRequest,
    DeletePolicy, Message, MessageId,
};

fn seeded() -> Conversation {
    let conversation = Conversation::new("life");
    for message in [
        Message::user("u1", "hello"),
        Message::ai("a1", "gpt", "one"),
        Message::ai("a2", "claude", "two"),
    ] {
        conversation.append_message(&BranchId::main(), message).unwrap();
    }
    conversation
}

/// main -> b1 -> b2
fn chain(conversation: &Conversation) -> (BranchId, BranchId) {
    let b1 = conversation
        .create_branch(&CreateBranchRequest::single("main", "a1"))
        .created_branch_ids[0]
        .clone();
    conversation.append_message(&b1, Message::user("b1-u", "go on")).unwrap();
    conversation.append_message(&b1, Message::ai("b1-a", "gpt", "ok")).unwrap();
    let b2 = conversation
        .create_branch(&CreateBranchRequest::single(b1.clone(), "b1-a"))
        .created_branch_ids[0]
        .clone();
    (b1, b2)
}

#[test]
fn test_delete_with_children_is_rejected_by_default() {
    let conversation = seeded();
    let (b1, _b2) = chain(&conversation);

    let err = conversation.delete_branch(&b1).unwrap_err();
    assert_eq!(
        err,
        BranchError::HasChildren {
            branch_id: b1.clone(),
            children: 1
        }
    );
    assert!(conversation.branch(&b1).is_some());
}

#[test]
fn test_delete_leaf_keeps_its_messages() {
    let conversation = seeded();
    let (_b1, b2) = chain(&conversation);
    let before = conversation.messages().len();

    let removed = conversation.delete_branch(&b2).unwrap();
    assert_eq!(removed, vec![b2.clone()]);
    assert!(conversation.branch(&b2).is_none());
    assert_eq!(conversation.messages().len(), before);
}

#[test]
fn test_reparent_moves_children_up() {
    let conversation = seeded();
    let (b1, b2) = chain(&conversation);
    let view_before = conversation.resolver().display_ids(&b2);

    let removed = conversation.delete_branch_with(&b1, DeletePolicy::Reparent).unwrap();
    assert_eq!(removed, vec![b1]);

    let moved = conversation.branch(&b2).unwrap();
    assert_eq!(moved.parent_branch_id, Some(BranchId::main()));
    assert_eq!(conversation.graph().depth(&b2), Some(1));
    assert_eq!(conversation.resolver().display_ids(&b2), view_before);
}

#[test]
fn test_cascade_removes_subtree() {
    let conversation = seeded();
    let (b1, b2) = chain(&conversation);

    let removed = conversation.delete_branch_with(&b1, DeletePolicy::Cascade).unwrap();
    assert_eq!(removed, vec![b1.clone(), b2.clone()]);
    assert_eq!(conversation.branches().len(), 1);
    assert!(conversation.graph().anomalies().is_empty());
}

#[test]
fn test_root_and_unknown_branches_cannot_be_deleted() {
    let conversation = seeded();
    assert_eq!(
        conversation.delete_branch_with(&BranchId::main(), DeletePolicy::Cascade),
        Err(BranchError::RootImmutable)
    );
    assert!(conversation
        .delete_branch(&BranchId::new("ghost"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_garbage_collection_after_delete() {
    let conversation = seeded();
    let (_b1, b2) = chain(&conversation);
    conversation.append_message(&b2, Message::user("b2-only", "mine")).unwrap();

    assert_eq!(conversation.collect_garbage(), 0);

    conversation.delete_branch(&b2).unwrap();
    assert_eq!(conversation.collect_garbage(), 1);
    assert!(!conversation.messages().has(&MessageId::new("b2-only")));
    assert!(conversation.messages().has(&MessageId::new("b1-a")));
}

#[test]
fn test_state_round_trip_through_json() {
    let conversation = seeded();
    let (b1, b2) = chain(&conversation);

    let json = serde_json::to_string(&conversation.to_state()).unwrap();
    let state: ConversationState = serde_json::from_str(&json).unwrap();
    let restored = Conversation::from_state(state, BranchConfig::default());

    assert_eq!(restored.id(), "life");
    assert_eq!(restored.branches().len(), 3);
    for branch in [BranchId::main(), b1.clone(), b2.clone()] {
        assert_eq!(
            restored.resolver().display_ids(&branch),
            conversation.resolver().display_ids(&branch)
        );
    }

    // Indexes are rebuilt: the same click is still recognized as a duplicate.
    let again = restored.create_branch(&CreateBranchRequest::single("main", "a1"));
    assert!(again.is_duplicate());
    assert_eq!(again.existing_branch_ids, vec![b1]);
}

#[test]
fn test_restore_without_root_recreates_it() {
    let state = ConversationState {
        conversation_id: "bare".to_string(),
        messages: vec![Message::user("u1", "orphaned")],
        branches: Vec::new(),
    };
    let restored = Conversation::from_state(state, BranchConfig::default());
    assert!(restored.branch(&BranchId::main()).is_some());
    assert_eq!(restored.messages().len(), 1);
}

#[test]
fn test_concurrent_single_creation_yields_one_branch() {
    let conversation = Arc::new(seeded());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let conversation = Arc::clone(&conversation);
            thread::spawn(move || {
                conversation
                    .create_branch(&CreateBranchRequest::single("main", "a1"))
                    .created_branch_ids
                    .len()
            })
        })
        .collect();

    let created: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(created, 1);
    assert_eq!(
        conversation
            .branches()
            .branches_from(&BranchId::main(), &MessageId::new("a1"))
            .len(),
        1
    );
}

#[test]
fn test_concurrent_fan_out_never_duplicates_a_response() {
    let conversation = Arc::new(seeded());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let conversation = Arc::clone(&conversation);
            thread::spawn(move || {
                conversation.create_branch(&CreateBranchRequest::multi("main", "u1"));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let branches = conversation
        .branches()
        .branches_from(&BranchId::main(), &MessageId::new("u1"));
    assert!(branches.len() <= 2);
    for response in ["a1", "a2"] {
        assert!(
            conversation
                .branches()
                .branches_for_response(&BranchId::main(), &MessageId::new(response))
                .len()
                <= 1
        );
    }
}
