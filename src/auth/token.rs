//! Session token model and the store contract behind the session manager.
//!
//! Raw token material is generated here and only returned to the caller;
//! stores persist SHA-256 hashes, never the raw values.

use anyhow::Context;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::error::StoreError;

/// Entropy per token: 32 bytes, well above the 128-bit floor.
pub const TOKEN_BYTES: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    Active,
    Inactive,
    Suspended,
}

impl TokenStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Suspended => "SUSPENDED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            "SUSPENDED" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// One authenticated device/session. Rows are retired by status change,
/// never deleted, so the audit trail stays intact.
#[derive(Clone, Debug)]
pub struct SessionToken {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub device_info: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TokenStatus,
}

impl SessionToken {
    /// Usable iff ACTIVE and not yet expired.
    #[must_use]
    pub fn usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TokenStatus::Active && now < self.expires_at
    }
}

/// The raw pair handed back to the client exactly once, at mint time.
#[derive(Clone, Debug)]
pub struct SessionPair {
    pub token: String,
    pub refresh_token: String,
}

#[derive(Clone, Debug)]
pub struct IssuedSession {
    pub record: SessionToken,
    pub pair: SessionPair,
}

/// Create a new opaque token. The raw value is only sent to the client; the
/// store keeps a hash.
pub(crate) fn generate_token() -> Result<String, StoreError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a token so raw values never touch the store.
#[must_use]
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Persistent record of issued session tokens.
///
/// Writes are single-row or single-predicate bulk updates; `issue` is the
/// one compound operation and implementations execute it atomically.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    /// Capacity-bounded insert: evict the oldest ACTIVE rows down to
    /// `cap - 1`, then persist a freshly minted ACTIVE token, as one atomic
    /// step. Either both writes land or neither does.
    async fn issue(
        &self,
        principal_id: Uuid,
        ttl: Duration,
        device_info: &str,
        cap: usize,
    ) -> Result<IssuedSession, StoreError>;

    /// ACTIVE tokens for a principal, oldest first.
    async fn find_active(&self, principal_id: Uuid) -> Result<Vec<SessionToken>, StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionToken>, StoreError>;

    /// Exact-tuple lookup binding a refresh to its originating device; all
    /// four values must match the same row.
    async fn find_by_tuple(
        &self,
        token: &str,
        principal_id: Uuid,
        refresh_token: &str,
        device_info: &str,
    ) -> Result<Option<SessionToken>, StoreError>;

    async fn set_status(&self, token_id: Uuid, status: TokenStatus) -> Result<(), StoreError>;

    /// Bulk transition, used for "sign out everywhere". Returns the number
    /// of rows moved.
    async fn set_status_all(
        &self,
        principal_id: Uuid,
        from: TokenStatus,
        to: TokenStatus,
    ) -> Result<u64, StoreError>;
}
