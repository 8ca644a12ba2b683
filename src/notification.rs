//! User-facing notifications raised by observers.
//!
//! Notifications are ephemeral: each expires after a display duration that
//! depends on its kind, and a notification identical (same kind and message)
//! to the immediately preceding one is dropped if it arrives within the dedup
//! window.

use crate::clock::Clock;
use crate::config::NotificationConfig;
use crate::Governor;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Error,
    Warning,
    Info,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Error => "error",
            NotificationKind::Warning => "warning",
            NotificationKind::Info => "info",
        }
    }

    /// How long a notification of this kind stays live.
    pub fn display_duration(&self, config: &NotificationConfig) -> Duration {
        match self {
            NotificationKind::Error => config.error_ttl,
            NotificationKind::Warning => config.warning_ttl,
            NotificationKind::Info => config.info_ttl,
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    /// Millis on the center's clock.
    pub raised_at: u64,
    pub expires_at: u64,
}

impl Notification {
    pub fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct CenterState {
    live: Vec<Notification>,
    last: Option<(NotificationKind, String, u64)>,
}

/// Deduplicating notification feed.
///
/// Clones share the same feed, so several observers can publish into one
/// stream the UI renders.
#[derive(Debug, Clone)]
pub struct NotificationCenter {
    state: Arc<Mutex<CenterState>>,
    config: NotificationConfig,
    clock: Arc<dyn Clock>,
    sender: broadcast::Sender<Notification>,
}

impl NotificationCenter {
    pub fn new<C: Clock + 'static>(config: NotificationConfig, clock: C) -> Self {
        Self::with_shared_clock(config, Arc::new(clock))
    }

    /// A center using the governor's clock and notification settings.
    pub fn for_governor(governor: &Governor) -> Self {
        Self::with_shared_clock(*governor.config().notifications(), governor.clock())
    }

    fn with_shared_clock(config: NotificationConfig, clock: Arc<dyn Clock>) -> Self {
        let (sender, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self { state: Arc::new(Mutex::new(CenterState::default())), config, clock, sender }
    }

    fn lock(&self) -> MutexGuard<'_, CenterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive every notification that is actually raised (not suppressed).
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Raise a notification unless it duplicates the previous one within the
    /// dedup window. Returns the notification if it was raised.
    pub fn raise(&self, kind: NotificationKind, message: impl Into<String>) -> Option<Notification> {
        let message = message.into();
        let now = self.clock.now_millis();
        let dedup_window = millis(self.config.dedup_window);

        let notification = {
            let mut state = self.lock();
            if let Some((last_kind, last_message, last_at)) = &state.last {
                if *last_kind == kind
                    && *last_message == message
                    && now.saturating_sub(*last_at) < dedup_window
                {
                    tracing::debug!(kind = %kind, message = %message, "notification suppressed as duplicate");
                    return None;
                }
            }

            let ttl = millis(kind.display_duration(&self.config));
            let notification = Notification {
                id: Uuid::new_v4(),
                kind,
                message: message.clone(),
                raised_at: now,
                expires_at: now.saturating_add(ttl),
            };
            state.live.retain(|n| n.is_live(now));
            state.live.push(notification.clone());
            state.last = Some((kind, message, now));
            notification
        };

        match kind {
            NotificationKind::Error | NotificationKind::Warning => {
                tracing::warn!(id = %notification.id, kind = %kind, message = %notification.message, "notification raised");
            }
            NotificationKind::Info => {
                tracing::info!(id = %notification.id, kind = %kind, message = %notification.message, "notification raised");
            }
        }
        let _ = self.sender.send(notification.clone());
        Some(notification)
    }

    pub fn error(&self, message: impl Into<String>) -> Option<Notification> {
        self.raise(NotificationKind::Error, message)
    }

    pub fn warning(&self, message: impl Into<String>) -> Option<Notification> {
        self.raise(NotificationKind::Warning, message)
    }

    pub fn info(&self, message: impl Into<String>) -> Option<Notification> {
        self.raise(NotificationKind::Info, message)
    }

    /// Notifications that have not expired yet, oldest first.
    pub fn live(&self) -> Vec<Notification> {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        state.live.retain(|n| n.is_live(now));
        state.live.clone()
    }

    /// Remove a notification before it expires. Returns whether it was live.
    pub fn dismiss(&self, id: Uuid) -> bool {
        let mut state = self.lock();
        let before = state.live.len();
        state.live.retain(|n| n.id != id);
        before != state.live.len()
    }

    /// Drop all live notifications. Dedup history is kept.
    pub fn clear(&self) {
        self.lock().live.clear();
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
