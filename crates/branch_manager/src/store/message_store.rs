//! MessageStore - the message pool
//!
//! Single source of truth for message content. Ordering lives in the
//! branch id lists, never here.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::structs::{Message, MessageId};

#[derive(Debug, Default)]
pub struct MessageStore {
    messages: DashMap<MessageId, Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by id. Returns true if the stored record changed.
    pub fn set(&self, message: Message) -> bool {
        match self.messages.entry(message.id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get() == &message {
                    return false;
                }
                tracing::trace!(message_id = %message.id, "MessageStore: overwriting message");
                entry.insert(message);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(message);
                true
            }
        }
    }

    /// Insert only if the id is not present yet.
    pub fn insert_if_absent(&self, message: Message) -> bool {
        match self.messages.entry(message.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(message);
                true
            }
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.messages.get(id).map(|entry| entry.value().clone())
    }

    pub fn has(&self, id: &MessageId) -> bool {
        self.messages.contains_key(id)
    }

    /// Mutate a stored message in place.
    pub fn update<F, R>(&self, id: &MessageId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Message) -> R,
    {
        self.messages.get_mut(id).map(|mut entry| f(entry.value_mut()))
    }

    pub fn remove(&self, id: &MessageId) -> Option<Message> {
        self.messages.remove(id).map(|(_, message)| message)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|entry| entry.key().clone()).collect()
    }

    /// All messages, ordered by timestamp then id for stable output.
    pub fn snapshot(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        messages
    }
}
