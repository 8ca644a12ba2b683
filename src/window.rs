//! Fixed-window request counters.
//!
//! Windows roll forward lazily: nothing runs in the background, and a key's
//! window is advanced the moment any reader observes `now >= window_end`.
//! Rolled windows stay aligned to the original boundary grid, so a key created
//! at t=0 with a 60s window always resets at multiples of 60s.

use crate::key::WindowKey;
use crate::quota::QuotaEntry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    pub window_start: u64,
    pub window_end: u64,
}

impl WindowState {
    fn open(now: u64, window_millis: u64) -> Self {
        Self { count: 0, window_start: now, window_end: now.saturating_add(window_millis) }
    }

    /// Advance to the window containing `now`, if the current one has ended.
    fn roll(&mut self, now: u64, window_millis: u64) {
        if now < self.window_end {
            return;
        }
        let window_millis = window_millis.max(1);
        let skipped = (now - self.window_end) / window_millis;
        self.window_start = self.window_end.saturating_add(skipped.saturating_mul(window_millis));
        self.window_end = self.window_start.saturating_add(window_millis);
        self.count = 0;
    }
}

/// Point-in-time view of a key's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    /// Start of the current window (millis).
    pub window_start: u64,
    /// When the counter next resets (millis).
    pub reset_at: u64,
}

impl WindowSnapshot {
    fn new(state: &WindowState, limit: u32) -> Self {
        Self {
            count: state.count,
            limit,
            remaining: limit.saturating_sub(state.count),
            window_start: state.window_start,
            reset_at: state.window_end,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.limit
    }

    /// Milliseconds from `now` until `reset_at`.
    pub fn reset_in_millis(&self, now: u64) -> u64 {
        self.reset_at.saturating_sub(now)
    }
}

/// In-memory store of per-key windows.
///
/// The store does not enforce limits: counting past `limit` is tolerated so a
/// caller that bypasses the gate cannot break it. Enforcement belongs to
/// [`Governor`](crate::Governor). Clones share the same state.
#[derive(Debug, Default, Clone)]
pub struct WindowStore {
    windows: Arc<Mutex<HashMap<WindowKey, WindowState>>>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowKey, WindowState>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current window for `key`, opening or rolling it first as needed.
    pub fn status_of(&self, key: &WindowKey, quota: &QuotaEntry, now: u64) -> WindowSnapshot {
        let mut windows = self.lock();
        let state = Self::current(&mut windows, key, quota, now);
        WindowSnapshot::new(state, quota.limit())
    }

    /// Count one issued request against the current window.
    ///
    /// Call exactly once per request actually sent, never speculatively.
    pub fn record_request(&self, key: &WindowKey, quota: &QuotaEntry, now: u64) -> WindowSnapshot {
        let mut windows = self.lock();
        let state = Self::current(&mut windows, key, quota, now);
        state.count = state.count.saturating_add(1);
        WindowSnapshot::new(state, quota.limit())
    }

    /// Record only if the window has headroom; the check and the increment
    /// happen under one lock.
    pub(crate) fn record_if_open(
        &self,
        key: &WindowKey,
        quota: &QuotaEntry,
        now: u64,
    ) -> Result<WindowSnapshot, WindowSnapshot> {
        let mut windows = self.lock();
        let state = Self::current(&mut windows, key, quota, now);
        if state.count >= quota.limit() {
            return Err(WindowSnapshot::new(state, quota.limit()));
        }
        state.count += 1;
        Ok(WindowSnapshot::new(state, quota.limit()))
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn current<'a>(
        windows: &'a mut HashMap<WindowKey, WindowState>,
        key: &WindowKey,
        quota: &QuotaEntry,
        now: u64,
    ) -> &'a mut WindowState {
        let window_millis = quota.window_millis();
        let state = windows
            .entry(key.clone())
            .or_insert_with(|| WindowState::open(now, window_millis));
        state.roll(now, window_millis);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;
    use std::time::Duration;

    fn student() -> (WindowKey, QuotaEntry) {
        (
            WindowKey::default_for(Role::Student),
            QuotaEntry::new(Role::Student, 3, Duration::from_secs(60)).unwrap(),
        )
    }

    #[test]
    fn first_read_opens_an_empty_window() {
        let store = WindowStore::new();
        let (key, quota) = student();

        let snap = store.status_of(&key, &quota, 1_000);
        assert_eq!(snap.count, 0);
        assert_eq!(snap.remaining, 3);
        assert_eq!(snap.window_start, 1_000);
        assert_eq!(snap.reset_at, 61_000);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn records_count_toward_limit() {
        let store = WindowStore::new();
        let (key, quota) = student();

        for _ in 0..3 {
            store.record_request(&key, &quota, 0);
        }
        let snap = store.status_of(&key, &quota, 10);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.remaining, 0);
        assert!(snap.is_exhausted());
        assert_eq!(snap.reset_in_millis(10), 59_990);
    }

    #[test]
    fn store_tolerates_counting_past_limit() {
        let store = WindowStore::new();
        let (key, quota) = student();

        for _ in 0..5 {
            store.record_request(&key, &quota, 0);
        }
        let snap = store.status_of(&key, &quota, 0);
        assert_eq!(snap.count, 5);
        assert_eq!(snap.remaining, 0);
    }

    #[test]
    fn window_resets_exactly_at_boundary() {
        let store = WindowStore::new();
        let (key, quota) = student();
        store.record_request(&key, &quota, 0);

        assert_eq!(store.status_of(&key, &quota, 59_999).count, 1);
        let rolled = store.status_of(&key, &quota, 60_000);
        assert_eq!(rolled.count, 0);
        assert_eq!(rolled.window_start, 60_000);
        assert_eq!(rolled.reset_at, 120_000);
    }

    #[test]
    fn rollover_stays_aligned_after_idle_periods() {
        let store = WindowStore::new();
        let (key, quota) = student();
        store.record_request(&key, &quota, 0);

        // Several windows pass with no reads.
        let snap = store.status_of(&key, &quota, 250_500);
        assert_eq!(snap.count, 0);
        assert_eq!(snap.window_start, 240_000);
        assert_eq!(snap.reset_at, 300_000);
    }

    #[test]
    fn record_if_open_refuses_at_limit() {
        let store = WindowStore::new();
        let (key, quota) = student();

        for expected in 1..=3 {
            assert_eq!(store.record_if_open(&key, &quota, 0).unwrap().count, expected);
        }
        let denied = store.record_if_open(&key, &quota, 0).unwrap_err();
        assert_eq!(denied.count, 3);
        assert!(store.record_if_open(&key, &quota, 60_000).is_ok());
    }

    #[test]
    fn keys_are_independent() {
        let store = WindowStore::new();
        let (_, quota) = student();
        let lessons = WindowKey::new(Role::Student, Some("/lessons"));
        let grades = WindowKey::new(Role::Student, Some("/grades"));

        store.record_request(&lessons, &quota, 0);
        assert_eq!(store.status_of(&lessons, &quota, 0).count, 1);
        assert_eq!(store.status_of(&grades, &quota, 0).count, 0);
    }
}
