//! Caller roles.

use std::fmt;
use std::str::FromStr;

/// Caller classification used to select a quota.
///
/// Supplied by the embedding application once per session; the governor never
/// derives or changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Role {
    Anonymous,
    Student,
    Teacher,
    /// First supervisor tier.
    Supervisor,
    /// Second supervisor tier, above [`Role::Supervisor`].
    SeniorSupervisor,
    Admin,
}

impl Role {
    /// Every role, least privileged first.
    pub const ALL: [Role; 6] = [
        Role::Anonymous,
        Role::Student,
        Role::Teacher,
        Role::Supervisor,
        Role::SeniorSupervisor,
        Role::Admin,
    ];

    /// Stable lowercase name, also accepted by [`Role::from_str`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Anonymous => "anonymous",
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Supervisor => "supervisor",
            Role::SeniorSupervisor => "senior_supervisor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role name that matches no [`Role`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
    }

    #[test]
    fn parsing_is_lenient_about_case_and_dashes() {
        assert_eq!(" Senior-Supervisor ".parse::<Role>(), Ok(Role::SeniorSupervisor));
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = "superuser".parse::<Role>().unwrap_err();
        assert_eq!(err.to_string(), "unknown role `superuser`");
    }
}
