//! Construction-time configuration.
//!
//! Everything tunable about a [`Governor`](crate::Governor) lives here and is
//! validated once in [`GovernorConfigBuilder::build`]. Nothing is mutable
//! after construction.

use crate::quota::{QuotaError, QuotaTable};
use std::time::Duration;

/// Default near-limit warning threshold (fraction of the limit used).
pub const DEFAULT_NEAR_LIMIT_THRESHOLD: f64 = 0.8;
/// Default gap between waiter polls.
pub const DEFAULT_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Default observer refresh interval.
pub const DEFAULT_OBSERVER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors produced when validating governor configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("near_limit_threshold must be in (0.0, 1.0] (got {0})")]
    InvalidThreshold(f64),
    #[error("{name} must be > 0")]
    ZeroInterval { name: &'static str },
    #[error("freeze durations must satisfy min <= default <= max (got {min:?} <= {default:?} <= {max:?})")]
    FreezeBounds { min: Duration, default: Duration, max: Duration },
    #[cfg(feature = "config-json")]
    #[error("invalid governor settings: {0}")]
    Json(String),
}

/// Maps a server's rate-limit signal to a freeze duration.
///
/// Servers may or may not say how long to back off. Without a hint the
/// default applies; a hint is clamped into `[min, max]` so a missing or
/// absurd `Retry-After` cannot lock a client out forever or not at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreezePolicy {
    default: Duration,
    min: Duration,
    max: Duration,
}

impl FreezePolicy {
    pub fn new(default: Duration, min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min.is_zero() || min > default || default > max {
            return Err(ConfigError::FreezeBounds { min, default, max });
        }
        Ok(Self { default, min, max })
    }

    /// Freeze duration for a rate-limit rejection carrying `retry_after`.
    pub fn duration_for(&self, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.clamp(self.min, self.max),
            None => self.default,
        }
    }

    pub fn default_duration(&self) -> Duration {
        self.default
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for FreezePolicy {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(60),
            min: Duration::from_secs(1),
            max: Duration::from_secs(15 * 60),
        }
    }
}

/// Notification dedup and display timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationConfig {
    /// Identical notifications closer together than this are dropped.
    pub dedup_window: Duration,
    pub error_ttl: Duration,
    pub warning_ttl: Duration,
    pub info_ttl: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(3),
            error_ttl: Duration::from_secs(8),
            warning_ttl: Duration::from_secs(5),
            info_ttl: Duration::from_secs(3),
        }
    }
}

/// Validated governor configuration.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    quotas: QuotaTable,
    near_limit_threshold: f64,
    wait_poll_interval: Duration,
    observer_poll_interval: Duration,
    freeze: FreezePolicy,
    notifications: NotificationConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            quotas: QuotaTable::default(),
            near_limit_threshold: DEFAULT_NEAR_LIMIT_THRESHOLD,
            wait_poll_interval: DEFAULT_WAIT_POLL_INTERVAL,
            observer_poll_interval: DEFAULT_OBSERVER_POLL_INTERVAL,
            freeze: FreezePolicy::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl GovernorConfig {
    pub fn builder() -> GovernorConfigBuilder {
        GovernorConfigBuilder::default()
    }

    pub fn quotas(&self) -> &QuotaTable {
        &self.quotas
    }

    pub fn near_limit_threshold(&self) -> f64 {
        self.near_limit_threshold
    }

    pub fn wait_poll_interval(&self) -> Duration {
        self.wait_poll_interval
    }

    pub fn observer_poll_interval(&self) -> Duration {
        self.observer_poll_interval
    }

    pub fn freeze_policy(&self) -> &FreezePolicy {
        &self.freeze
    }

    pub fn notifications(&self) -> &NotificationConfig {
        &self.notifications
    }

    /// Parse and validate a JSON [`GovernorSettings`] document.
    #[cfg(feature = "config-json")]
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: GovernorSettings =
            serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        Self::try_from(settings)
    }
}

/// Builder for [`GovernorConfig`].
#[derive(Debug, Clone, Default)]
pub struct GovernorConfigBuilder {
    config: GovernorConfig,
}

impl GovernorConfigBuilder {
    pub fn quotas(mut self, quotas: QuotaTable) -> Self {
        self.config.quotas = quotas;
        self
    }

    /// Fraction of the limit at which a key counts as "near limit".
    pub fn near_limit_threshold(mut self, threshold: f64) -> Self {
        self.config.near_limit_threshold = threshold;
        self
    }

    pub fn wait_poll_interval(mut self, interval: Duration) -> Self {
        self.config.wait_poll_interval = interval;
        self
    }

    pub fn observer_poll_interval(mut self, interval: Duration) -> Self {
        self.config.observer_poll_interval = interval;
        self
    }

    pub fn freeze_policy(mut self, policy: FreezePolicy) -> Self {
        self.config.freeze = policy;
        self
    }

    pub fn notifications(mut self, notifications: NotificationConfig) -> Self {
        self.config.notifications = notifications;
        self
    }

    pub fn build(self) -> Result<GovernorConfig, ConfigError> {
        let cfg = self.config;
        let threshold = cfg.near_limit_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        if cfg.wait_poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval { name: "wait_poll_interval" });
        }
        if cfg.observer_poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval { name: "observer_poll_interval" });
        }
        if cfg.notifications.dedup_window.is_zero() {
            return Err(ConfigError::ZeroInterval { name: "dedup_window" });
        }
        Ok(cfg)
    }
}

#[cfg(feature = "serde")]
pub use settings::{GovernorSettings, QuotaSettings};

#[cfg(feature = "serde")]
mod settings {
    use super::*;
    use crate::role::Role;
    use serde::Deserialize;

    /// Serialized form of [`GovernorConfig`]; all durations are milliseconds.
    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct GovernorSettings {
        pub quotas: Vec<QuotaSettings>,
        #[serde(default = "default_threshold")]
        pub near_limit_threshold: f64,
        #[serde(default = "default_wait_poll_ms")]
        pub wait_poll_ms: u64,
        #[serde(default = "default_observer_poll_ms")]
        pub observer_poll_ms: u64,
        #[serde(default)]
        pub freeze_default_ms: Option<u64>,
        #[serde(default)]
        pub freeze_min_ms: Option<u64>,
        #[serde(default)]
        pub freeze_max_ms: Option<u64>,
    }

    /// One quota table row.
    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct QuotaSettings {
        pub role: Role,
        pub limit: u32,
        pub window_ms: u64,
    }

    fn default_threshold() -> f64 {
        DEFAULT_NEAR_LIMIT_THRESHOLD
    }

    fn default_wait_poll_ms() -> u64 {
        DEFAULT_WAIT_POLL_INTERVAL.as_millis() as u64
    }

    fn default_observer_poll_ms() -> u64 {
        DEFAULT_OBSERVER_POLL_INTERVAL.as_millis() as u64
    }

    impl TryFrom<GovernorSettings> for GovernorConfig {
        type Error = ConfigError;

        fn try_from(settings: GovernorSettings) -> Result<Self, Self::Error> {
            let quotas = settings
                .quotas
                .iter()
                .fold(QuotaTable::builder(), |builder, q| {
                    builder.quota(q.role, q.limit, Duration::from_millis(q.window_ms))
                })
                .build()?;

            let defaults = FreezePolicy::default();
            let ms = |v: Option<u64>, fallback: Duration| v.map(Duration::from_millis).unwrap_or(fallback);
            let freeze = FreezePolicy::new(
                ms(settings.freeze_default_ms, defaults.default_duration()),
                ms(settings.freeze_min_ms, defaults.min()),
                ms(settings.freeze_max_ms, defaults.max()),
            )?;

            GovernorConfig::builder()
                .quotas(quotas)
                .near_limit_threshold(settings.near_limit_threshold)
                .wait_poll_interval(Duration::from_millis(settings.wait_poll_ms))
                .observer_poll_interval(Duration::from_millis(settings.observer_poll_ms))
                .freeze_policy(freeze)
                .build()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    #[test]
    fn defaults_are_valid() {
        let cfg = GovernorConfig::builder().build().unwrap();
        assert_eq!(cfg.near_limit_threshold(), 0.8);
        assert_eq!(cfg.wait_poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.quotas().limit_for(Role::Student).limit(), 30);
    }

    #[test]
    fn threshold_bounds() {
        for bad in [0.0, -0.5, 1.01, f64::NAN] {
            let err = GovernorConfig::builder().near_limit_threshold(bad).build().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidThreshold(_)));
        }
        assert!(GovernorConfig::builder().near_limit_threshold(1.0).build().is_ok());
    }

    #[test]
    fn zero_intervals_rejected() {
        let err = GovernorConfig::builder().wait_poll_interval(Duration::ZERO).build().unwrap_err();
        assert_eq!(err, ConfigError::ZeroInterval { name: "wait_poll_interval" });
        assert_eq!(err.to_string(), "wait_poll_interval must be > 0");
    }

    #[test]
    fn freeze_policy_clamps_hints() {
        let policy = FreezePolicy::new(
            Duration::from_secs(30),
            Duration::from_secs(2),
            Duration::from_secs(120),
        )
        .unwrap();

        assert_eq!(policy.duration_for(None), Duration::from_secs(30));
        assert_eq!(policy.duration_for(Some(Duration::from_secs(45))), Duration::from_secs(45));
        assert_eq!(policy.duration_for(Some(Duration::ZERO)), Duration::from_secs(2));
        assert_eq!(policy.duration_for(Some(Duration::from_secs(3600))), Duration::from_secs(120));
    }

    #[test]
    fn freeze_policy_validates_ordering() {
        let err = FreezePolicy::new(Duration::from_secs(1), Duration::from_secs(5), Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, ConfigError::FreezeBounds { .. }));
        assert!(FreezePolicy::new(Duration::from_secs(5), Duration::ZERO, Duration::from_secs(10)).is_err());
    }

    #[cfg(feature = "config-json")]
    #[test]
    fn loads_json_settings() {
        let cfg = GovernorConfig::from_json_str(
            r#"{
                "quotas": [
                    {"role": "student", "limit": 30, "window_ms": 60000},
                    {"role": "teacher", "limit": 40, "window_ms": 60000}
                ],
                "near_limit_threshold": 0.9,
                "freeze_default_ms": 30000
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.near_limit_threshold(), 0.9);
        assert_eq!(cfg.quotas().limit_for(Role::Admin).role(), Role::Student);
        assert_eq!(cfg.freeze_policy().duration_for(None), Duration::from_secs(30));
    }

    #[cfg(feature = "config-json")]
    #[test]
    fn json_settings_are_validated() {
        let err = GovernorConfig::from_json_str(
            r#"{"quotas": [{"role": "student", "limit": 0, "window_ms": 60000}]}"#,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::Quota(QuotaError::ZeroLimit { role: Role::Student }));

        assert!(matches!(
            GovernorConfig::from_json_str(r#"{"quotas": [], "bogus": 1}"#),
            Err(ConfigError::Json(_))
        ));
    }
}
