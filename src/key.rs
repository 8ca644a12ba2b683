//! Bucket addressing.

use crate::role::Role;
use std::fmt;

/// Which counter bucket a request belongs to within a role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    /// Shared bucket for requests that name no endpoint.
    Default,
    Named(String),
}

impl Endpoint {
    /// `None` and blank names map to [`Endpoint::Default`].
    pub fn from_option(endpoint: Option<&str>) -> Self {
        match endpoint.map(str::trim) {
            Some(name) if !name.is_empty() => Endpoint::Named(name.to_string()),
            _ => Endpoint::Default,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Endpoint::Default => "default",
            Endpoint::Named(name) => name,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite (role, endpoint) key; each key has an independent window and freeze.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub role: Role,
    pub endpoint: Endpoint,
}

impl WindowKey {
    pub fn new(role: Role, endpoint: Option<&str>) -> Self {
        Self { role, endpoint: Endpoint::from_option(endpoint) }
    }

    /// The role's shared default bucket.
    pub fn default_for(role: Role) -> Self {
        Self { role, endpoint: Endpoint::Default }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.endpoint)
    }
}
