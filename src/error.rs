//! Denial reasons and the error type surfaced by the middleware.
//!
//! The governor itself never fails: a closed gate is an ordinary outcome,
//! reported as a [`Denial`]. [`GovernorError`] only exists to carry those
//! outcomes through APIs that already return `Result`, such as
//! [`GovernorService`](crate::middleware::GovernorService).
use std::convert::Infallible;
use std::fmt;
use std::time::Duration;

/// Why the gate is closed for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// An explicit freeze is in effect. Takes precedence over `QuotaExceeded`.
    Frozen { remaining: Duration },
    /// The current window's count reached the limit.
    QuotaExceeded { limit: u32, reset_in: Duration },
}

impl Denial {
    /// How long until this particular condition clears on its own.
    pub fn retry_in(&self) -> Duration {
        match self {
            Denial::Frozen { remaining } => *remaining,
            Denial::QuotaExceeded { reset_in, .. } => *reset_in,
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, Denial::Frozen { .. })
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Denial::QuotaExceeded { .. })
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::Frozen { remaining } => {
                write!(f, "requests frozen for another {:?}", remaining)
            }
            Denial::QuotaExceeded { limit, reset_in } => {
                write!(f, "quota of {} requests exhausted (resets in {:?})", limit, reset_in)
            }
        }
    }
}

impl std::error::Error for Denial {}

/// Error for governed operations.
#[derive(Debug, Clone)]
pub enum GovernorError<E = Infallible> {
    /// The gate was closed and the caller chose not to wait.
    Denied(Denial),
    /// No slot opened within the allowed wait.
    WaitTimedOut { waited: Duration },
    /// The governed operation itself failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for GovernorError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied(denial) => write!(f, "request denied: {}", denial),
            Self::WaitTimedOut { waited } => {
                write!(f, "no request slot became available within {:?}", waited)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for GovernorError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Denied(denial) => Some(denial),
            Self::WaitTimedOut { .. } => None,
        }
    }
}

impl<E> From<Denial> for GovernorError<E> {
    fn from(denial: Denial) -> Self {
        Self::Denied(denial)
    }
}

impl<E> GovernorError<E> {
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }

    /// Check if the request was refused because of a freeze
    pub fn is_frozen(&self) -> bool {
        matches!(self, Self::Denied(Denial::Frozen { .. }))
    }

    /// Check if the request was refused because the window is exhausted
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::Denied(Denial::QuotaExceeded { .. }))
    }

    pub fn is_wait_timed_out(&self) -> bool {
        matches!(self, Self::WaitTimedOut { .. })
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Self::Denied(denial) => Some(denial),
            _ => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl GovernorError<Infallible> {
    /// Re-type a governor-only error for a service error type.
    pub fn widen<F>(self) -> GovernorError<F> {
        match self {
            Self::Denied(denial) => GovernorError::Denied(denial),
            Self::WaitTimedOut { waited } => GovernorError::WaitTimedOut { waited },
            Self::Inner(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn denial_display() {
        let frozen = Denial::Frozen { remaining: Duration::from_secs(10) };
        assert_eq!(frozen.to_string(), "requests frozen for another 10s");

        let quota = Denial::QuotaExceeded { limit: 30, reset_in: Duration::from_millis(1500) };
        let msg = quota.to_string();
        assert!(msg.contains("30"));
        assert!(msg.contains("1.5s"));
    }

    #[test]
    fn retry_in_reports_the_matching_duration() {
        assert_eq!(Denial::Frozen { remaining: Duration::from_secs(4) }.retry_in(), Duration::from_secs(4));
        assert_eq!(
            Denial::QuotaExceeded { limit: 1, reset_in: Duration::from_secs(9) }.retry_in(),
            Duration::from_secs(9)
        );
    }

    #[test]
    fn predicates_cover_all_variants() {
        let frozen: GovernorError = Denial::Frozen { remaining: Duration::from_secs(1) }.into();
        assert!(frozen.is_denied());
        assert!(frozen.is_frozen());
        assert!(!frozen.is_quota_exceeded());

        let quota: GovernorError =
            Denial::QuotaExceeded { limit: 1, reset_in: Duration::from_secs(1) }.into();
        assert!(quota.is_quota_exceeded());
        assert!(quota.denial().is_some());

        let timed_out: GovernorError = GovernorError::WaitTimedOut { waited: Duration::from_secs(5) };
        assert!(timed_out.is_wait_timed_out());
        assert!(timed_out.denial().is_none());
        assert!(timed_out.to_string().contains("5s"));
    }

    #[test]
    fn inner_errors_are_sources() {
        let err = GovernorError::Inner(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(err.to_string(), "boom");
        assert!(err.source().is_some());
        assert_eq!(err.into_inner().unwrap().to_string(), "boom");
    }

    #[test]
    fn widen_preserves_governor_variants() {
        let err: GovernorError = GovernorError::WaitTimedOut { waited: Duration::from_secs(2) };
        let widened: GovernorError<io::Error> = err.widen();
        assert!(widened.is_wait_timed_out());
    }
}
