//! Principals and the event-type permissions derived from them.
//!
//! Authentication happens outside this workspace; whoever terminates it hands
//! us a [`Principal`]. The only authorization decision made here is whether a
//! consumer may see restricted event types (see
//! [`EventType::is_restricted`](crate::event::EventType::is_restricted)).

use crate::event::EventType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Role of an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End customer; sees public ticket activity only.
    Customer,
    /// Support agent.
    Agent,
    /// Administrator.
    Admin,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
            Self::Admin => "admin",
        }
    }
}

/// Error returned when a role name is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Self::Customer),
            "agent" => Ok(Self::Agent),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identity (user id, service account...).
    pub id: String,
    /// Role granted by the authentication layer.
    pub role: Role,
}

impl Principal {
    /// Create a principal.
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Permissions this principal carries.
    #[must_use]
    pub const fn permissions(&self) -> Permissions {
        Permissions::for_role(self.role)
    }
}

/// Flags gating which event types a consumer may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Permissions {
    /// May receive restricted (agent-only) event types.
    pub internal: bool,
}

impl Permissions {
    /// Public events only.
    #[must_use]
    pub const fn public() -> Self {
        Self { internal: false }
    }

    /// Every event type.
    #[must_use]
    pub const fn internal() -> Self {
        Self { internal: true }
    }

    /// Permissions granted to a role.
    #[must_use]
    pub const fn for_role(role: Role) -> Self {
        match role {
            Role::Customer => Self::public(),
            Role::Agent | Role::Admin => Self::internal(),
        }
    }

    /// Whether events of `event_type` may be delivered.
    #[must_use]
    pub const fn allows(&self, event_type: &EventType) -> bool {
        self.internal || !event_type.is_restricted()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn customers_cannot_see_restricted_types() {
        let perms = Principal::new("c-1", Role::Customer).permissions();
        assert!(perms.allows(&EventType::CommentAdded));
        assert!(!perms.allows(&EventType::InternalNoteAdded));
        assert!(!perms.allows(&EventType::WatcherAdd));
    }

    #[test]
    fn agents_see_everything() {
        let perms = Principal::new("a-1", Role::Agent).permissions();
        assert!(perms.allows(&EventType::InternalNoteAdded));
        assert!(perms.allows(&EventType::Other("whatever".to_string())));
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Agent".parse::<Role>().unwrap(), Role::Agent);
        assert_eq!(" admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!("root".parse::<Role>().is_err());
    }
}
