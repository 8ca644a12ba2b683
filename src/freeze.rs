//! Explicit cooldowns ("freezes"), independent of window resets.

use crate::key::WindowKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-key freeze deadlines.
///
/// A freeze is active while `now < freeze_until` and is never lifted early;
/// a new freeze for the same key overwrites the old deadline, even if the
/// new one is shorter. Clones share the same state.
#[derive(Debug, Default, Clone)]
pub struct FreezeStore {
    freezes: Arc<Mutex<HashMap<WindowKey, u64>>>,
}

impl FreezeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowKey, u64>> {
        self.freezes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Freeze `key` until `now + duration_millis`. Returns the deadline.
    pub fn freeze(&self, key: &WindowKey, duration_millis: u64, now: u64) -> u64 {
        let until = now.saturating_add(duration_millis);
        self.lock().insert(key.clone(), until);
        until
    }

    /// Deadline of the active freeze, or `None` once it has passed.
    pub fn freeze_end_time(&self, key: &WindowKey, now: u64) -> Option<u64> {
        self.lock().get(key).copied().filter(|until| now < *until)
    }

    pub fn is_frozen(&self, key: &WindowKey, now: u64) -> bool {
        self.freeze_end_time(key, now).is_some()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune(&self, now: u64) -> usize {
        let mut freezes = self.lock();
        let before = freezes.len();
        freezes.retain(|_, until| now < *until);
        before - freezes.len()
    }

    /// Number of stored entries, expired ones included until pruned.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    #[test]
    fn freeze_is_active_until_deadline() {
        let store = FreezeStore::new();
        let key = WindowKey::default_for(Role::Teacher);

        assert_eq!(store.freeze(&key, 60_000, 0), 60_000);
        assert_eq!(store.freeze_end_time(&key, 59_999), Some(60_000));
        assert_eq!(store.freeze_end_time(&key, 60_000), None);
        assert!(!store.is_frozen(&key, 60_001));
    }

    #[test]
    fn newer_freeze_overwrites_even_when_shorter() {
        let store = FreezeStore::new();
        let key = WindowKey::default_for(Role::Teacher);

        store.freeze(&key, 60_000, 0);
        store.freeze(&key, 5_000, 1_000);
        assert_eq!(store.freeze_end_time(&key, 1_000), Some(6_000));
        assert!(!store.is_frozen(&key, 6_000));
    }

    #[test]
    fn prune_only_removes_expired() {
        let store = FreezeStore::new();
        let a = WindowKey::new(Role::Student, Some("/a"));
        let b = WindowKey::new(Role::Student, Some("/b"));
        store.freeze(&a, 1_000, 0);
        store.freeze(&b, 10_000, 0);

        assert_eq!(store.prune(5_000), 1);
        assert_eq!(store.len(), 1);
        assert!(store.is_frozen(&b, 5_000));
    }
}
