//! A student session hammering a lesson endpoint.
//!
//! The fake backend answers 429 with a retry hint once it has seen six calls.
//! The governor's own quota (five per window here) usually stops the client
//! first; the freeze path shows up when the quota is raised.
//!
//! Run with `cargo run --example classroom`; set `RUST_LOG=debug` for more.

use rolegate::middleware::RateLimited;
use rolegate::{Governor, GovernorConfig, GovernorLayer, Observer, QuotaTable, Role};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::{service_fn, ServiceBuilder, ServiceExt};

#[derive(Debug, Clone, Copy)]
struct Response {
    status: u16,
    retry_after: Option<Duration>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let limit: u32 = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(5);
    let quotas = QuotaTable::builder()
        .quota(Role::Student, limit, Duration::from_secs(10))
        .quota(Role::Anonymous, 1, Duration::from_secs(10))
        .build()
        .expect("valid quotas");
    let config = GovernorConfig::builder()
        .quotas(quotas)
        .observer_poll_interval(Duration::from_millis(500))
        .build()
        .expect("valid config");
    let governor = Governor::new(config);

    let observer = Observer::new(governor.clone(), Role::Student, Some("/lessons")).spawn();
    let mut feed = observer.notifications().subscribe();
    tokio::spawn(async move {
        while let Ok(n) = feed.recv().await {
            println!("[{}] {}", n.kind, n.message);
        }
    });

    let served = Arc::new(AtomicU32::new(0));
    let backend = service_fn(move |_path: &'static str| {
        let served = served.clone();
        async move {
            let n = served.fetch_add(1, Ordering::SeqCst) + 1;
            let response = if n > 6 {
                Response { status: 429, retry_after: Some(Duration::from_secs(3)) }
            } else {
                Response { status: 200, retry_after: None }
            };
            Ok::<_, Infallible>(response)
        }
    });

    let layer = GovernorLayer::new(governor.clone(), Role::Student)
        .max_wait(Duration::from_millis(300))
        .endpoint_with(|path: &&'static str| Some(path.to_string()))
        .classify_with(|r: &Response| {
            (r.status == 429).then_some(RateLimited { retry_after: r.retry_after })
        });
    let client = ServiceBuilder::new().layer(layer).service(backend);

    for i in 1..=10 {
        match client.clone().oneshot("/lessons").await {
            Ok(r) => println!("request {i}: HTTP {}", r.status),
            Err(e) => println!("request {i}: {e}"),
        }
        let seen = observer.latest();
        println!(
            "  usage {:.0}%  frozen={}  reset in {:?}",
            seen.usage * 100.0,
            seen.is_frozen,
            seen.time_until_reset
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    observer.stop().await;
}
