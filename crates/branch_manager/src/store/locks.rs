//! Per-message creation locks
//!
//! A lock is held through a guard and released when the guard drops. Entries
//! older than the configured timeout are treated as free, so a lock whose
//! guard was leaked cannot block a message forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{BranchError, Result};
use crate::structs::MessageId;

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    token: u64,
    acquired_at: Instant,
}

#[derive(Debug)]
pub struct TriggerLocks {
    held: DashMap<MessageId, LockEntry>,
    next_token: AtomicU64,
    timeout: Duration,
}

impl TriggerLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: DashMap::new(),
            next_token: AtomicU64::new(1),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Take the lock for `message_id`, or `None` if someone holds it.
    pub fn try_acquire(&self, message_id: &MessageId) -> Option<LockGuard<'_>> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let entry = LockEntry {
            token,
            acquired_at: Instant::now(),
        };

        match self.held.entry(message_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().acquired_at.elapsed() < self.timeout {
                    return None;
                }
                tracing::warn!(
                    message_id = %message_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "TriggerLocks: taking over expired lock"
                );
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        Some(LockGuard {
            locks: self,
            message_id: message_id.clone(),
            token,
        })
    }

    /// Like `try_acquire`, with contention reported as an error.
    pub fn acquire(&self, message_id: &MessageId) -> Result<LockGuard<'_>> {
        self.try_acquire(message_id)
            .ok_or_else(|| BranchError::LockContention(message_id.clone()))
    }

    pub fn is_locked(&self, message_id: &MessageId) -> bool {
        self.held
            .get(message_id)
            .is_some_and(|entry| entry.acquired_at.elapsed() < self.timeout)
    }

    fn release(&self, message_id: &MessageId, token: u64) {
        // A guard that outlived its timeout must not free a newer holder.
        self.held
            .remove_if(message_id, |_, entry| entry.token == token);
    }
}

/// Scoped ownership of one creation lock.
#[derive(Debug)]
pub struct LockGuard<'a> {
    locks: &'a TriggerLocks,
    message_id: MessageId,
    token: u64,
}

impl LockGuard<'_> {
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.message_id, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let locks = TriggerLocks::new(Duration::from_secs(2));
        let id = MessageId::new("u1");

        let guard = locks.try_acquire(&id).unwrap();
        assert!(locks.is_locked(&id));
        assert!(locks.try_acquire(&id).is_none());

        drop(guard);
        assert!(!locks.is_locked(&id));
        assert!(locks.try_acquire(&id).is_some());
    }

    #[test]
    fn acquire_reports_contention() {
        let locks = TriggerLocks::new(Duration::from_secs(2));
        let id = MessageId::new("u1");
        let _held = locks.acquire(&id).unwrap();
        assert_eq!(
            locks.acquire(&id).unwrap_err(),
            BranchError::LockContention(id.clone())
        );
    }

    #[test]
    fn locks_are_per_message() {
        let locks = TriggerLocks::new(Duration::from_secs(2));
        let _a = locks.try_acquire(&MessageId::new("a1")).unwrap();
        assert!(locks.try_acquire(&MessageId::new("a2")).is_some());
    }

    #[test]
    fn expired_lock_can_be_taken_over() {
        let locks = TriggerLocks::new(Duration::ZERO);
        let id = MessageId::new("u1");

        let stale = locks.try_acquire(&id).unwrap();
        assert!(!locks.is_locked(&id));
        let fresh = locks.try_acquire(&id).unwrap();

        // The stale guard must leave the newer entry in place.
        drop(stale);
        assert!(locks.held.contains_key(&id));
        drop(fresh);
        assert!(!locks.held.contains_key(&id));
    }
}
