//! Read-model of the identity subsystem plus the credential accessors the
//! reset flow needs.

use uuid::Uuid;

use super::error::StoreError;
use super::role::{Role, RoleClass};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountStatus {
    Pending,
    Activated,
    Suspended,
    Deleted,
}

impl AccountStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Activated => "ACTIVATED",
            Self::Suspended => "SUSPENDED",
            Self::Deleted => "DELETED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "ACTIVATED" => Some(Self::Activated),
            "SUSPENDED" => Some(Self::Suspended),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A user identity as the identity subsystem exposes it to us: reference
/// data, fetched by id or phone, never mutated here (credentials aside).
#[derive(Clone, Debug)]
pub struct Principal {
    pub id: Uuid,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub role: Role,
    pub status: AccountStatus,
}

#[async_trait::async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Resolve an identifier (opaque id or phone) within a role class.
    ///
    /// Returns `None` on absence *or* ambiguity; the caller treats both as
    /// not found.
    async fn find_by_identifier(
        &self,
        identifier: &str,
        class: RoleClass,
    ) -> Result<Option<Principal>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, StoreError>;

    async fn password_hash(&self, id: Uuid) -> Result<Option<String>, StoreError>;

    /// Atomically replace the password digest. A PENDING account becomes
    /// ACTIVATED in the same write (first password change activates).
    async fn replace_password_hash(&self, id: Uuid, digest: &str) -> Result<(), StoreError>;

    async fn pin_hash(&self, id: Uuid) -> Result<Option<String>, StoreError>;

    async fn replace_pin_hash(&self, id: Uuid, digest: &str) -> Result<(), StoreError>;
}
