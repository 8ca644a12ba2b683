use rolegate::{
    Governor, GovernorConfig, ManualClock, NotificationCenter, NotificationKind, Observer,
    QuotaTable, Role,
};
use std::time::Duration;

fn governor(limit: u32) -> (Governor, ManualClock) {
    let clock = ManualClock::new();
    let quotas = QuotaTable::builder()
        .quota(Role::Student, limit, Duration::from_secs(60))
        .build()
        .unwrap();
    let config = GovernorConfig::builder()
        .quotas(quotas)
        .near_limit_threshold(0.5)
        .build()
        .unwrap();
    (Governor::new(config).with_clock(clock.clone()), clock)
}

#[test]
fn identical_notifications_within_dedup_window_collapse() {
    let (_governor, clock) = governor(10);
    let center = NotificationCenter::new(Default::default(), clock.clone());

    center.warning("Approaching request limit");
    clock.advance(Duration::from_secs(1));
    center.warning("Approaching request limit");
    assert_eq!(center.live().len(), 1);

    clock.advance(Duration::from_secs(3));
    center.warning("Approaching request limit");
    assert_eq!(center.live().len(), 2);
}

#[test]
fn custom_threshold_drives_near_limit() {
    let (governor, _clock) = governor(10);
    let mut observer = Observer::new(governor.clone(), Role::Student, None);

    for _ in 0..4 {
        governor.record_request(Role::Student, None);
    }
    assert!(!observer.poll().is_near_limit);
    governor.record_request(Role::Student, None);
    assert!(observer.poll().is_near_limit);
}

#[test]
fn observers_only_read() {
    let (governor, _clock) = governor(3);
    governor.record_request(Role::Student, None);
    let before = governor.status(Role::Student, None);

    let mut observers: Vec<_> =
        (0..5).map(|_| Observer::new(governor.clone(), Role::Student, None)).collect();
    for observer in &mut observers {
        observer.poll();
        observer.poll();
    }

    assert_eq!(governor.status(Role::Student, None), before);
    assert!(!governor.is_frozen(Role::Student, None));
}

#[test]
fn poll_loop_does_not_spam_while_at_limit() {
    let (governor, clock) = governor(1);
    let center = NotificationCenter::for_governor(&governor);
    let mut observer =
        Observer::new(governor.clone(), Role::Student, None).with_notifications(center.clone());
    let mut feed = center.subscribe();

    governor.record_request(Role::Student, None);
    for _ in 0..10 {
        observer.poll();
        clock.advance(Duration::from_millis(1_500));
    }

    let mut raised = Vec::new();
    while let Ok(n) = feed.try_recv() {
        raised.push(n.kind);
    }
    assert_eq!(raised, vec![NotificationKind::Error]);
}

#[tokio::test(start_paused = true)]
async fn spawned_observers_follow_one_governor() {
    let (governor, _clock) = governor(4);
    let lessons = Observer::new(governor.clone(), Role::Student, Some("/lessons")).spawn();
    let grades = Observer::new(governor.clone(), Role::Student, Some("/grades")).spawn();
    tokio::task::yield_now().await;

    for _ in 0..4 {
        governor.record_request(Role::Student, Some("/lessons"));
    }
    governor.report_frozen(Role::Student, Some("/grades"), Duration::from_secs(30));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let l = lessons.latest();
    assert!(l.is_at_limit);
    assert!(!l.is_frozen);
    let g = grades.latest();
    assert!(g.is_frozen);
    assert_eq!(g.status.current, 0);

    lessons.stop().await;
    grades.stop().await;
}
