//! The request governor: quota lookup, window counting and freezes behind one
//! handle.
//!
//! Every operation is addressed by `(role, endpoint)`; `None` for the endpoint
//! selects the role's shared default bucket. The governor is purely a state
//! query/mutation surface: it never logs and never fails. Closed gates are
//! reported as [`Denial`]s, and user feedback is left to
//! [`Observer`](crate::Observer)s and the embedding application.
//!
//! # Example
//!
//! ```
//! use rolegate::{Governor, GovernorConfig, Role};
//! use rolegate::clock::ManualClock;
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! let governor = Governor::new(GovernorConfig::default()).with_clock(clock.clone());
//!
//! assert!(governor.can_make_request(Role::Student, None));
//! governor.record_request(Role::Student, None);
//! assert_eq!(governor.status(Role::Student, None).current, 1);
//!
//! governor.report_frozen(Role::Student, None, Duration::from_secs(30));
//! assert!(!governor.can_make_request(Role::Student, None));
//! clock.advance(Duration::from_secs(30));
//! assert!(governor.can_make_request(Role::Student, None));
//! ```

use crate::clock::{Clock, MonotonicClock};
use crate::config::GovernorConfig;
use crate::error::{Denial, GovernorError};
use crate::events::{GovernorEvent, EVENT_CHANNEL_CAPACITY};
use crate::freeze::FreezeStore;
use crate::key::WindowKey;
use crate::quota::QuotaEntry;
use crate::role::Role;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::window::{WindowSnapshot, WindowStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Quota usage for one key. Freeze state is reported separately through
/// [`Governor::freeze_end_time`] so callers can tell "quota exhausted" from
/// "explicitly frozen".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorStatus {
    pub role: Role,
    pub limit: u32,
    pub current: u32,
    pub remaining: u32,
    /// When the current window resets (millis on the governor's clock).
    pub reset_time: u64,
}

/// Client-side request governor.
///
/// Clones share the same windows, freezes and event channel, so one instance
/// created at the application root can be handed to every observer and
/// request path. Separate instances are fully isolated.
#[derive(Debug, Clone)]
pub struct Governor {
    config: Arc<GovernorConfig>,
    windows: WindowStore,
    freezes: FreezeStore,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    events: broadcast::Sender<GovernorEvent>,
}

impl Default for Governor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

impl Governor {
    /// Create a governor on the monotonic clock, sleeping on tokio timers.
    pub fn new(config: GovernorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config: Arc::new(config),
            windows: WindowStore::new(),
            freezes: FreezeStore::new(),
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
            events,
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override how the slot waiter sleeps between polls.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Current time on the governor's clock, in millis.
    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn quota_for(&self, role: Role) -> QuotaEntry {
        self.config.quotas().limit_for(role)
    }

    /// Receive an event after every `record_request`/`report_frozen`.
    pub fn subscribe(&self) -> broadcast::Receiver<GovernorEvent> {
        self.events.subscribe()
    }

    /// Quota usage for `(role, endpoint)`, rolling the window if it has ended.
    pub fn status(&self, role: Role, endpoint: Option<&str>) -> GovernorStatus {
        let snapshot = self.window(&WindowKey::new(role, endpoint), self.now());
        GovernorStatus {
            role,
            limit: snapshot.limit,
            current: snapshot.count,
            remaining: snapshot.remaining,
            reset_time: snapshot.reset_at,
        }
    }

    /// Full window view, including the window start.
    pub fn window_snapshot(&self, role: Role, endpoint: Option<&str>) -> WindowSnapshot {
        self.window(&WindowKey::new(role, endpoint), self.now())
    }

    /// The gate, with the reason when closed. A freeze is reported in
    /// preference to an exhausted window.
    ///
    /// Calling it repeatedly never changes what it reports.
    pub fn check(&self, role: Role, endpoint: Option<&str>) -> Result<(), Denial> {
        self.check_at(&WindowKey::new(role, endpoint), self.now())
    }

    /// True iff the key is not frozen and its window has headroom.
    pub fn can_make_request(&self, role: Role, endpoint: Option<&str>) -> bool {
        self.check(role, endpoint).is_ok()
    }

    /// Count one issued request.
    ///
    /// Call strictly after a successful gate check and before the request's
    /// response is known. The count is taken even if the gate is closed;
    /// prefer [`Governor::try_acquire`] to check and count in one step.
    pub fn record_request(&self, role: Role, endpoint: Option<&str>) -> WindowSnapshot {
        let key = WindowKey::new(role, endpoint);
        let quota = self.quota_for(role);
        let snapshot = self.windows.record_request(&key, &quota, self.now());
        self.publish_recorded(key, &snapshot);
        snapshot
    }

    /// Gate and count in one step: records the request only if the gate is open.
    pub fn try_acquire(&self, role: Role, endpoint: Option<&str>) -> Result<WindowSnapshot, Denial> {
        let key = WindowKey::new(role, endpoint);
        let now = self.now();
        if let Some(until) = self.freezes.freeze_end_time(&key, now) {
            return Err(Denial::Frozen { remaining: Duration::from_millis(until - now) });
        }
        let quota = self.quota_for(role);
        match self.windows.record_if_open(&key, &quota, now) {
            Ok(snapshot) => {
                self.publish_recorded(key, &snapshot);
                Ok(snapshot)
            }
            Err(snapshot) => Err(Self::exhausted(&snapshot, now)),
        }
    }

    /// Wait up to `max_wait` for a slot.
    ///
    /// Polls the gate every `wait_poll_interval`, yielding to the scheduler
    /// between polls. Resolves `true` as soon as the gate opens and `false`
    /// once `max_wait` has elapsed; a condition that only clears exactly at
    /// the deadline counts as a timeout. When the sleeper wakes past the
    /// deadline, the gate is judged as it stood one millisecond before it.
    /// Nothing is recorded.
    pub async fn wait_for_available_slot(
        &self,
        role: Role,
        endpoint: Option<&str>,
        max_wait: Duration,
    ) -> bool {
        let key = WindowKey::new(role, endpoint);
        let poll = millis(self.config.wait_poll_interval()).max(1);
        let start = self.now();
        let deadline = start.saturating_add(millis(max_wait));
        let mut now = start;

        loop {
            let window = self.window(&key, now);
            if self.gate(&key, &window, now).is_ok() {
                return true;
            }
            if now >= deadline {
                return false;
            }
            // Last check lands one millisecond before the deadline.
            let left = deadline - now;
            let step = if left > 1 { poll.min(left - 1) } else { left };
            self.sleeper.sleep(Duration::from_millis(step)).await;

            now = self.now();
            if now >= deadline {
                // Overslept: the slot counts if it was open just before the deadline.
                return self.open_at(&key, &window, deadline - 1, now);
            }
        }
    }

    /// Wait up to `max_wait` for a slot, then count the request.
    ///
    /// With a zero `max_wait` this is [`Governor::try_acquire`].
    pub async fn acquire(
        &self,
        role: Role,
        endpoint: Option<&str>,
        max_wait: Duration,
    ) -> Result<WindowSnapshot, GovernorError> {
        if max_wait.is_zero() {
            return self.try_acquire(role, endpoint).map_err(GovernorError::Denied);
        }
        let start = self.now();
        if !self.wait_for_available_slot(role, endpoint, max_wait).await {
            let waited = Duration::from_millis(self.now().saturating_sub(start));
            return Err(GovernorError::WaitTimedOut { waited });
        }
        self.try_acquire(role, endpoint).map_err(GovernorError::Denied)
    }

    /// Freeze `(role, endpoint)` for `duration`, replacing any existing freeze.
    /// Returns the freeze deadline.
    pub fn report_frozen(&self, role: Role, endpoint: Option<&str>, duration: Duration) -> u64 {
        let key = WindowKey::new(role, endpoint);
        let until = self.freezes.freeze(&key, millis(duration), self.now());
        let _ = self.events.send(GovernorEvent::Frozen { key, until, duration });
        until
    }

    /// Freeze after a server-side rate-limit rejection. `retry_after` is the
    /// server's hint, if any; the configured
    /// [`FreezePolicy`](crate::config::FreezePolicy) turns it into a duration.
    /// Returns the duration applied.
    pub fn report_rate_limited(
        &self,
        role: Role,
        endpoint: Option<&str>,
        retry_after: Option<Duration>,
    ) -> Duration {
        let duration = self.config.freeze_policy().duration_for(retry_after);
        self.report_frozen(role, endpoint, duration);
        duration
    }

    /// Deadline of the active freeze, if any (millis on the governor's clock).
    pub fn freeze_end_time(&self, role: Role, endpoint: Option<&str>) -> Option<u64> {
        self.freezes.freeze_end_time(&WindowKey::new(role, endpoint), self.now())
    }

    pub fn is_frozen(&self, role: Role, endpoint: Option<&str>) -> bool {
        self.freeze_end_time(role, endpoint).is_some()
    }

    /// Drop expired freezes. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.freezes.prune(self.now())
    }

    fn window(&self, key: &WindowKey, now: u64) -> WindowSnapshot {
        self.windows.status_of(key, &self.quota_for(key.role), now)
    }

    fn check_at(&self, key: &WindowKey, now: u64) -> Result<(), Denial> {
        self.gate(key, &self.window(key, now), now)
    }

    fn gate(&self, key: &WindowKey, window: &WindowSnapshot, now: u64) -> Result<(), Denial> {
        if let Some(until) = self.freezes.freeze_end_time(key, now) {
            return Err(Denial::Frozen { remaining: Duration::from_millis(until - now) });
        }
        if window.is_exhausted() {
            return Err(Self::exhausted(window, now));
        }
        Ok(())
    }

    /// Whether the gate was open at `at`, a moment already in the past.
    ///
    /// `earlier` is a window snapshot taken before `at`; it stands in for the
    /// window that was current at `at` when the store has rolled past it.
    fn open_at(&self, key: &WindowKey, earlier: &WindowSnapshot, at: u64, now: u64) -> bool {
        if self.freezes.is_frozen(key, at) {
            return false;
        }
        let current = self.window(key, now);
        let exhausted = if current.window_start <= at {
            current.is_exhausted()
        } else if earlier.reset_at > at {
            earlier.is_exhausted()
        } else {
            // A window nobody touched: empty.
            false
        };
        !exhausted
    }

    fn exhausted(snapshot: &WindowSnapshot, now: u64) -> Denial {
        Denial::QuotaExceeded {
            limit: snapshot.limit,
            reset_in: Duration::from_millis(snapshot.reset_in_millis(now)),
        }
    }

    fn publish_recorded(&self, key: WindowKey, snapshot: &WindowSnapshot) {
        let _ = self.events.send(GovernorEvent::RequestRecorded {
            key,
            count: snapshot.count,
            limit: snapshot.limit,
            reset_at: snapshot.reset_at,
        });
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
