//! Role classification and the single authorization check layered on top of
//! a successful authentication.

use serde::{Deserialize, Serialize};

use super::error::AuthError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Consumer,
    VerifiedConsumer,
    Farmer,
    VerifiedFarmer,
    Admin,
    SuperAdmin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Consumer => "CONSUMER",
            Self::VerifiedConsumer => "VERIFIED_CONSUMER",
            Self::Farmer => "FARMER",
            Self::VerifiedFarmer => "VERIFIED_FARMER",
            Self::Admin => "ADMIN",
            Self::SuperAdmin => "SUPER_ADMIN",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CONSUMER" => Some(Self::Consumer),
            "VERIFIED_CONSUMER" => Some(Self::VerifiedConsumer),
            "FARMER" => Some(Self::Farmer),
            "VERIFIED_FARMER" => Some(Self::VerifiedFarmer),
            "ADMIN" => Some(Self::Admin),
            "SUPER_ADMIN" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

/// The coarse role class a login request targets: the original API splits
/// administrator logins from everyone else with a single flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleClass {
    Member,
    Admin,
}

impl RoleClass {
    #[must_use]
    pub fn from_admin_flag(is_admin: bool) -> Self {
        if is_admin {
            Self::Admin
        } else {
            Self::Member
        }
    }

    #[must_use]
    pub fn matches(self, role: Role) -> bool {
        match self {
            Self::Admin => role.is_admin(),
            Self::Member => !role.is_admin(),
        }
    }
}

/// Authorization: deny unless the resolved role is in the allowed set.
///
/// Evaluated once per request against the principal the authenticator
/// resolved; individual operations only declare their allowed set.
pub fn requires(role: Role, allowed: &[Role]) -> Result<(), AuthError> {
    if allowed.contains(&role) {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}
