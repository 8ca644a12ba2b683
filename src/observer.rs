//! Observers bridge the pull-only [`Governor`] to push-style consumers.
//!
//! An observer watches one `(role, endpoint)` key. Each refresh derives an
//! [`ObservedStatus`], publishes it on a `watch` channel and raises
//! notifications for transitions:
//!
//! | transition | notification |
//! |---|---|
//! | becomes at-limit | error |
//! | becomes near-limit (but not at-limit) | warning |
//! | becomes frozen | error |
//! | open again after at-limit or frozen | info |
//!
//! [`Observer::run`] refreshes on every governor event for the key and on a
//! fixed interval, which covers window resets and freeze expiry (neither
//! produces an event).

use crate::error::Denial;
use crate::events::GovernorEvent;
use crate::governor::{Governor, GovernorStatus};
use crate::key::WindowKey;
use crate::notification::NotificationCenter;
use crate::role::Role;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Derived view of one key, ready for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservedStatus {
    pub status: GovernorStatus,
    /// `current / limit`, in `[0.0, ..)`; may exceed 1.0 if callers bypassed the gate.
    pub usage: f64,
    pub is_near_limit: bool,
    pub is_at_limit: bool,
    pub is_frozen: bool,
    pub time_until_reset: Duration,
    pub time_until_unfreeze: Option<Duration>,
    /// Millis on the governor's clock.
    pub observed_at: u64,
}

impl ObservedStatus {
    /// The gate as the observer last saw it.
    pub fn can_make_request(&self) -> bool {
        !self.is_frozen && !self.is_at_limit
    }

    /// Reason the gate is closed, freeze first.
    pub fn denial(&self) -> Option<Denial> {
        if let Some(remaining) = self.time_until_unfreeze {
            return Some(Denial::Frozen { remaining });
        }
        if self.is_at_limit {
            return Some(Denial::QuotaExceeded {
                limit: self.status.limit,
                reset_in: self.time_until_reset,
            });
        }
        None
    }
}

/// Watches one key of a [`Governor`].
#[derive(Debug)]
pub struct Observer {
    governor: Governor,
    key: WindowKey,
    endpoint: Option<String>,
    interval: Duration,
    notifications: NotificationCenter,
    previous: Option<ObservedStatus>,
    tx: watch::Sender<ObservedStatus>,
    events: Option<broadcast::Receiver<GovernorEvent>>,
}

impl Observer {
    /// Observe `(role, endpoint)`, with a private notification center.
    pub fn new(governor: Governor, role: Role, endpoint: Option<&str>) -> Self {
        let notifications = NotificationCenter::for_governor(&governor);
        let key = WindowKey::new(role, endpoint);
        let endpoint = endpoint.map(str::to_string);
        let interval = governor.config().observer_poll_interval();
        let initial = derive(&governor, role, endpoint.as_deref());
        let (tx, _) = watch::channel(initial);
        let events = Some(governor.subscribe());
        Self { governor, key, endpoint, interval, notifications, previous: None, tx, events }
    }

    /// Publish into a shared notification center instead.
    pub fn with_notifications(mut self, notifications: NotificationCenter) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn key(&self) -> &WindowKey {
        &self.key
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    /// Receiver that sees every refresh.
    pub fn watch(&self) -> watch::Receiver<ObservedStatus> {
        self.tx.subscribe()
    }

    /// Derive the current status without publishing or notifying.
    pub fn observe(&self) -> ObservedStatus {
        derive(&self.governor, self.key.role, self.endpoint.as_deref())
    }

    /// Refresh once: derive, notify on transitions, publish.
    pub fn poll(&mut self) -> ObservedStatus {
        let current = self.observe();
        self.notify_transitions(&current);
        self.previous = Some(current);
        self.tx.send_replace(current);
        current
    }

    fn notify_transitions(&self, current: &ObservedStatus) {
        let was = self.previous.as_ref();
        let was_at_limit = was.is_some_and(|p| p.is_at_limit);
        let was_near_limit = was.is_some_and(|p| p.is_near_limit);
        let was_frozen = was.is_some_and(|p| p.is_frozen);
        let key = &self.key;

        if current.is_frozen && !was_frozen {
            tracing::debug!(key = %key, until = ?current.time_until_unfreeze, "observer saw freeze");
            self.notifications.error(format!("Requests for {key} are paused by the server"));
        }
        if current.is_at_limit && !was_at_limit {
            tracing::debug!(key = %key, limit = current.status.limit, "observer saw limit reached");
            self.notifications.error(format!("Request limit reached for {key}"));
        } else if current.is_near_limit && !current.is_at_limit && !was_near_limit {
            self.notifications.warning(format!("Approaching request limit for {key}"));
        }
        if (was_at_limit || was_frozen) && current.can_make_request() {
            tracing::debug!(key = %key, "observer saw gate reopen");
            self.notifications.info(format!("Requests for {key} are available again"));
        }
    }

    /// Refresh on governor events for this key and every poll interval until
    /// `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut events = self.events.take().unwrap_or_else(|| self.governor.subscribe());
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::debug!(key = %self.key, interval = ?self.interval, "observer started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.poll();
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if is_for(&event, &self.key) {
                            self.poll();
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(key = %self.key, skipped, "observer lagged behind governor events");
                        self.poll();
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!(key = %self.key, "observer stopped");
    }

    /// Run on the current tokio runtime.
    pub fn spawn(self) -> ObserverHandle {
        let status = self.watch();
        let notifications = self.notifications.clone();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(self.run(async move {
            let _ = stopped.await;
        }));
        ObserverHandle { status, notifications, stop: Some(stop), task }
    }
}

fn is_for(event: &GovernorEvent, key: &WindowKey) -> bool {
    event.key() == key
}

fn derive(governor: &Governor, role: Role, endpoint: Option<&str>) -> ObservedStatus {
    let now = governor.now();
    let status = governor.status(role, endpoint);
    let freeze_until = governor.freeze_end_time(role, endpoint);
    let threshold = governor.config().near_limit_threshold();
    let usage = f64::from(status.current) / f64::from(status.limit.max(1));

    ObservedStatus {
        status,
        usage,
        is_near_limit: usage >= threshold,
        is_at_limit: status.current >= status.limit,
        is_frozen: freeze_until.is_some(),
        time_until_reset: Duration::from_millis(status.reset_time.saturating_sub(now)),
        time_until_unfreeze: freeze_until.map(|until| Duration::from_millis(until.saturating_sub(now))),
        observed_at: now,
    }
}

/// Handle to a spawned [`Observer`].
#[derive(Debug)]
pub struct ObserverHandle {
    status: watch::Receiver<ObservedStatus>,
    notifications: NotificationCenter,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ObserverHandle {
    pub fn status(&self) -> watch::Receiver<ObservedStatus> {
        self.status.clone()
    }

    /// Latest published status.
    pub fn latest(&self) -> ObservedStatus {
        *self.status.borrow()
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    /// Stop the observer and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::GovernorConfig;
    use crate::notification::NotificationKind;
    use crate::quota::QuotaTable;

    fn setup(limit: u32) -> (Governor, ManualClock) {
        let clock = ManualClock::new();
        let quotas = QuotaTable::builder()
            .quota(Role::Student, limit, Duration::from_secs(60))
            .build()
            .unwrap();
        let config = GovernorConfig::builder().quotas(quotas).build().unwrap();
        (Governor::new(config).with_clock(clock.clone()), clock)
    }

    fn kinds(observer: &Observer) -> Vec<NotificationKind> {
        observer.notifications().live().iter().map(|n| n.kind).collect()
    }

    #[test]
    fn derives_flags_from_governor_state() {
        let (governor, clock) = setup(10);
        for _ in 0..8 {
            governor.record_request(Role::Student, None);
        }
        clock.set(20_000);
        let observer = Observer::new(governor.clone(), Role::Student, None);
        let seen = observer.observe();

        assert!((seen.usage - 0.8).abs() < f64::EPSILON);
        assert!(seen.is_near_limit);
        assert!(!seen.is_at_limit);
        assert!(!seen.is_frozen);
        assert_eq!(seen.time_until_reset, Duration::from_secs(40));
        assert_eq!(seen.time_until_unfreeze, None);
        assert!(seen.can_make_request());
        assert_eq!(seen.denial(), None);
    }

    #[test]
    fn near_limit_then_at_limit_notifications() {
        let (governor, _clock) = setup(5);
        let mut observer = Observer::new(governor.clone(), Role::Student, None);

        for _ in 0..4 {
            governor.record_request(Role::Student, None);
        }
        observer.poll();
        observer.poll();
        assert_eq!(kinds(&observer), vec![NotificationKind::Warning]);

        governor.record_request(Role::Student, None);
        observer.poll();
        assert_eq!(kinds(&observer), vec![NotificationKind::Warning, NotificationKind::Error]);
    }

    #[test]
    fn jumping_straight_to_limit_raises_only_the_error() {
        let (governor, _clock) = setup(2);
        let mut observer = Observer::new(governor.clone(), Role::Student, None);
        governor.record_request(Role::Student, None);
        governor.record_request(Role::Student, None);

        let seen = observer.poll();
        assert!(seen.is_at_limit && seen.is_near_limit);
        assert_eq!(kinds(&observer), vec![NotificationKind::Error]);
    }

    #[test]
    fn freeze_and_recovery_notifications() {
        let (governor, clock) = setup(10);
        let mut observer = Observer::new(governor.clone(), Role::Student, None);
        observer.poll();

        governor.report_frozen(Role::Student, None, Duration::from_secs(10));
        let seen = observer.poll();
        assert!(seen.is_frozen);
        assert_eq!(seen.denial(), Some(Denial::Frozen { remaining: Duration::from_secs(10) }));

        clock.advance(Duration::from_secs(10));
        let seen = observer.poll();
        assert!(seen.can_make_request());

        let live = observer.notifications().live();
        let messages: Vec<_> = live.iter().map(|n| (n.kind, n.message.as_str())).collect();
        assert_eq!(
            messages,
            vec![
                (NotificationKind::Error, "Requests for student:default are paused by the server"),
                (NotificationKind::Info, "Requests for student:default are available again"),
            ]
        );
    }

    #[test]
    fn window_reset_clears_at_limit() {
        let (governor, clock) = setup(1);
        let mut observer = Observer::new(governor.clone(), Role::Student, None);
        governor.record_request(Role::Student, None);
        assert!(observer.poll().is_at_limit);

        clock.set(60_000);
        let seen = observer.poll();
        assert!(!seen.is_at_limit);
        assert_eq!(seen.status.current, 0);
    }

    #[test]
    fn observers_share_a_center_and_dedup() {
        let (governor, _clock) = setup(1);
        let center = NotificationCenter::for_governor(&governor);
        let mut a = Observer::new(governor.clone(), Role::Student, None).with_notifications(center.clone());
        let mut b = Observer::new(governor.clone(), Role::Student, None).with_notifications(center.clone());

        governor.record_request(Role::Student, None);
        a.poll();
        b.poll();
        assert_eq!(center.live().len(), 1);
    }

    #[test]
    fn poll_publishes_to_watchers() {
        let (governor, _clock) = setup(10);
        let mut observer = Observer::new(governor.clone(), Role::Student, Some("/lessons"));
        let rx = observer.watch();

        governor.record_request(Role::Student, Some("/lessons"));
        observer.poll();
        assert_eq!(rx.borrow().status.current, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_refreshes_on_governor_events() {
        let (governor, _clock) = setup(10);
        let observer = Observer::new(governor.clone(), Role::Student, None);
        let handle = observer.spawn();
        let mut rx = handle.status();
        tokio::task::yield_now().await;

        governor.record_request(Role::Student, None);
        tokio::time::timeout(Duration::from_millis(100), async {
            while rx.borrow_and_update().status.current != 1 {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("observer should refresh on the event before the next tick");

        assert_eq!(handle.latest().status.current, 1);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_picks_up_time_driven_transitions_on_tick() {
        let (governor, clock) = setup(10);
        governor.report_frozen(Role::Student, None, Duration::from_secs(5));
        let handle = Observer::new(governor.clone(), Role::Student, None).spawn();
        tokio::task::yield_now().await;
        assert!(handle.latest().is_frozen);

        // Freeze expiry emits no event; only the interval notices it.
        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!handle.latest().is_frozen);
        assert!(handle
            .notifications()
            .live()
            .iter()
            .any(|n| n.kind == NotificationKind::Info));
        handle.stop().await;
    }
}
