#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # rolegate
//!
//! Client-side request governor: throttles outgoing calls per caller role,
//! honours explicit cooldowns reported by the backend, and lets UI code watch
//! the state without touching it.
//!
//! ## Pieces
//!
//! - **Quota table** ([`QuotaTable`]): role -> requests per fixed window.
//! - **Window store** ([`window::WindowStore`]): per `(role, endpoint)` counters
//!   that reset lazily when read after the window ends.
//! - **Freeze store** ([`freeze::FreezeStore`]): explicit freeze deadlines,
//!   independent of window resets.
//! - **Governor** ([`Governor`]): status, synchronous gate, async waiter,
//!   freeze reporting. One cloneable handle owned by the application root.
//! - **Observers** ([`Observer`]): derived display state and deduplicated
//!   [`Notification`]s, pushed on governor events and on a timer.
//! - **Middleware** ([`GovernorLayer`]): tower integration of the
//!   gate -> record -> call -> freeze-on-429 flow.
//!
//! ## Quick Start
//!
//! ```rust
//! use rolegate::{Governor, GovernorConfig, Role};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let governor = Governor::new(GovernorConfig::default());
//!
//!     if governor.wait_for_available_slot(Role::Student, Some("/lessons"), Duration::from_secs(5)).await {
//!         governor.record_request(Role::Student, Some("/lessons"));
//!         // ... issue the request; on HTTP 429:
//!         governor.report_rate_limited(Role::Student, Some("/lessons"), Some(Duration::from_secs(30)));
//!     }
//!
//!     assert!(!governor.can_make_request(Role::Student, Some("/lessons")));
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod freeze;
pub mod governor;
pub mod key;
pub mod middleware;
pub mod notification;
pub mod observer;
pub mod quota;
pub mod role;
pub mod sleeper;
pub mod window;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, FreezePolicy, GovernorConfig, GovernorConfigBuilder, NotificationConfig};
pub use error::{Denial, GovernorError};
pub use events::GovernorEvent;
pub use governor::{Governor, GovernorStatus};
pub use key::{Endpoint, WindowKey};
pub use middleware::{GovernorLayer, GovernorService, RateLimited};
pub use notification::{Notification, NotificationCenter, NotificationKind};
pub use observer::{ObservedStatus, Observer, ObserverHandle};
pub use quota::{QuotaEntry, QuotaError, QuotaTable};
pub use role::Role;
pub use sleeper::{ClockSleeper, InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use window::WindowSnapshot;
