//! Quota table: role -> (limit, window duration).

use crate::role::Role;
use std::collections::HashMap;
use std::time::Duration;

/// Shortest window a quota may use.
pub const MIN_WINDOW: Duration = Duration::from_secs(1);

/// A request quota for one role: at most `limit` requests per fixed `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaEntry {
    role: Role,
    limit: u32,
    window: Duration,
}

/// Errors produced when validating quota entries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("quota limit for {role} must be >= 1")]
    ZeroLimit { role: Role },
    #[error("quota window for {role} must be at least 1s (got {window:?})")]
    WindowTooShort { role: Role, window: Duration },
    #[error("quota for {role} defined more than once")]
    DuplicateRole { role: Role },
    #[error("quota table must contain at least one entry")]
    Empty,
}

impl QuotaEntry {
    /// Create a validated entry.
    pub fn new(role: Role, limit: u32, window: Duration) -> Result<Self, QuotaError> {
        if limit == 0 {
            return Err(QuotaError::ZeroLimit { role });
        }
        if window < MIN_WINDOW {
            return Err(QuotaError::WindowTooShort { role, window });
        }
        Ok(Self { role, limit, window })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }

    /// True if `self` grants fewer requests per unit of time than `other`.
    /// Equal rates are broken by the smaller absolute limit.
    fn stricter_than(&self, other: &QuotaEntry) -> bool {
        let lhs = u128::from(self.limit) * other.window.as_millis();
        let rhs = u128::from(other.limit) * self.window.as_millis();
        lhs < rhs || (lhs == rhs && self.limit < other.limit)
    }
}

/// Static mapping from [`Role`] to [`QuotaEntry`].
///
/// Lookups never fail: a role without an entry gets the most restrictive entry
/// in the table, so an unrecognized caller is never granted more than the
/// strictest configured caller.
#[derive(Debug, Clone)]
pub struct QuotaTable {
    entries: HashMap<Role, QuotaEntry>,
    fallback: QuotaEntry,
}

impl QuotaTable {
    pub fn builder() -> QuotaTableBuilder {
        QuotaTableBuilder::default()
    }

    /// Quota for `role`, or the most restrictive entry if the table has none.
    pub fn limit_for(&self, role: Role) -> QuotaEntry {
        self.entries.get(&role).copied().unwrap_or(self.fallback)
    }

    /// Quota for a role given by name; unparseable names get the most
    /// restrictive entry.
    pub fn limit_for_name(&self, name: &str) -> QuotaEntry {
        name.parse::<Role>().map(|role| self.limit_for(role)).unwrap_or(self.fallback)
    }

    /// The entry used for unknown roles.
    pub fn most_restrictive(&self) -> QuotaEntry {
        self.fallback
    }

    /// Configured entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &QuotaEntry> {
        self.entries.values()
    }
}

impl Default for QuotaTable {
    /// Defaults used by the classroom deployment: every window is one minute.
    fn default() -> Self {
        const MINUTE: Duration = Duration::from_secs(60);
        let mut entries = HashMap::new();
        for (role, limit) in [
            (Role::Anonymous, 10),
            (Role::Student, 30),
            (Role::Teacher, 60),
            (Role::Supervisor, 100),
            (Role::SeniorSupervisor, 150),
            (Role::Admin, 300),
        ] {
            entries.insert(role, QuotaEntry { role, limit, window: MINUTE });
        }
        let fallback = QuotaEntry { role: Role::Anonymous, limit: 10, window: MINUTE };
        Self { entries, fallback }
    }
}

/// Builder for [`QuotaTable`]; validation happens in [`QuotaTableBuilder::build`].
#[derive(Debug, Default, Clone)]
pub struct QuotaTableBuilder {
    pending: Vec<(Role, u32, Duration)>,
}

impl QuotaTableBuilder {
    pub fn quota(mut self, role: Role, limit: u32, window: Duration) -> Self {
        self.pending.push((role, limit, window));
        self
    }

    pub fn build(self) -> Result<QuotaTable, QuotaError> {
        let mut entries = HashMap::with_capacity(self.pending.len());
        let mut fallback: Option<QuotaEntry> = None;

        for (role, limit, window) in self.pending {
            let entry = QuotaEntry::new(role, limit, window)?;
            if entries.insert(role, entry).is_some() {
                return Err(QuotaError::DuplicateRole { role });
            }
            fallback = match fallback {
                Some(current) if !entry.stricter_than(&current) => Some(current),
                _ => Some(entry),
            };
        }

        let fallback = fallback.ok_or(QuotaError::Empty)?;
        Ok(QuotaTable { entries, fallback })
    }
}
