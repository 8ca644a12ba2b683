//! Events published by the governor on every state mutation.
//!
//! Subscribers (typically [`Observer`](crate::Observer)s) use them to refresh
//! immediately instead of waiting for their next poll tick. Time-driven
//! transitions (window reset, freeze expiry) produce no event.

use crate::key::WindowKey;
use std::fmt;
use std::time::Duration;

/// Capacity of the governor's broadcast channel. Slow subscribers see
/// `Lagged` and should simply refresh.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernorEvent {
    /// A request was counted against `key`'s window.
    RequestRecorded {
        key: WindowKey,
        /// Count after the increment.
        count: u32,
        limit: u32,
        reset_at: u64,
    },
    /// `key` was frozen until `until` (millis).
    Frozen { key: WindowKey, until: u64, duration: Duration },
}

impl GovernorEvent {
    pub fn key(&self) -> &WindowKey {
        match self {
            GovernorEvent::RequestRecorded { key, .. } | GovernorEvent::Frozen { key, .. } => key,
        }
    }
}

impl fmt::Display for GovernorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GovernorEvent::RequestRecorded { key, count, limit, .. } => {
                write!(f, "request recorded for {} ({}/{})", key, count, limit)
            }
            GovernorEvent::Frozen { key, duration, .. } => {
                write!(f, "{} frozen for {:?}", key, duration)
            }
        }
    }
}
