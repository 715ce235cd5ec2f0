//! Single-use, time-boxed one-time passcodes for secondary verification.
//!
//! Effective status is a pure computation over `(otp, now)`; the lazy
//! ACTIVE→EXPIRED correction is persisted only from the `verify` write path
//! so reads stay side-effect-free.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use super::clock::Clock;
use super::error::{AuthError, StoreError};

/// Codes are fixed-length numeric, zero-padded.
pub const CODE_DIGITS: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OtpPurpose {
    ForgetPassword,
    ResetPin,
}

impl OtpPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ForgetPassword => "FORGET_PASSWORD",
            Self::ResetPin => "RESET_PIN",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FORGET_PASSWORD" => Some(Self::ForgetPassword),
            "RESET_PIN" => Some(Self::ResetPin),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtpStatus {
    Active,
    Used,
    Expired,
}

impl OtpStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Used => "USED",
            Self::Expired => "EXPIRED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(Self::Active),
            "USED" => Some(Self::Used),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Otp {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub purpose: OtpPurpose,
    pub code_hash: Vec<u8>,
    pub status: OtpStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Status as of `now`, regardless of what has been persisted: a nominally
/// ACTIVE code past its expiry reads as EXPIRED.
#[must_use]
pub fn effective_status(otp: &Otp, now: DateTime<Utc>) -> OtpStatus {
    if otp.status == OtpStatus::Active && now > otp.expires_at {
        OtpStatus::Expired
    } else {
        otp.status
    }
}

/// Fixed-length numeric code from the OS entropy source.
pub(crate) fn generate_code() -> String {
    let value: u32 = OsRng.gen_range(0..1_000_000);
    format!("{value:06}")
}

#[must_use]
pub(crate) fn hash_code(code: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.finalize().to_vec()
}

#[async_trait::async_trait]
pub trait OtpStore: Send + Sync {
    /// Persist a new ACTIVE code, expiring any prior ACTIVE codes of the
    /// same (principal, purpose) in the same write, so at most one code can
    /// ever verify.
    async fn create(
        &self,
        principal_id: Uuid,
        purpose: OtpPurpose,
        code_hash: &[u8],
        ttl: Duration,
    ) -> Result<Otp, StoreError>;

    /// Most recently issued code for (principal, purpose), any status.
    async fn latest(
        &self,
        principal_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<Option<Otp>, StoreError>;

    async fn set_status(&self, otp_id: Uuid, status: OtpStatus) -> Result<(), StoreError>;
}

#[derive(Clone, Debug)]
pub struct IssuedOtp {
    pub record: Otp,
    /// Raw code for out-of-band delivery; never persisted, never logged.
    pub code: String,
}

pub struct OtpManager {
    store: Arc<dyn OtpStore>,
    clock: Arc<dyn Clock>,
}

impl OtpManager {
    #[must_use]
    pub fn new(store: Arc<dyn OtpStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Generate and persist a fresh code. Prior outstanding codes of the
    /// same purpose stop verifying as of this call.
    pub async fn issue(
        &self,
        principal_id: Uuid,
        purpose: OtpPurpose,
        ttl: Duration,
    ) -> Result<IssuedOtp, AuthError> {
        let code = generate_code();
        let record = self
            .store
            .create(principal_id, purpose, &hash_code(&code), ttl)
            .await?;
        debug!(%principal_id, purpose = purpose.as_str(), "issued verification code");
        Ok(IssuedOtp { record, code })
    }

    /// Effective status of a code as of now. Pure read; nothing is persisted.
    #[must_use]
    pub fn effective_status(&self, otp: &Otp) -> OtpStatus {
        effective_status(otp, self.clock.now())
    }

    /// Check `submitted` against the live code for (principal, purpose).
    ///
    /// A match consumes the code irreversibly. A mismatch leaves state
    /// untouched. The lazy EXPIRED transition is persisted here, on the
    /// write path, before the comparison.
    pub async fn verify(
        &self,
        principal_id: Uuid,
        purpose: OtpPurpose,
        submitted: &str,
    ) -> Result<(), AuthError> {
        let Some(otp) = self.store.latest(principal_id, purpose).await? else {
            return Err(AuthError::OtpNotFound);
        };

        match effective_status(&otp, self.clock.now()) {
            OtpStatus::Expired => {
                if otp.status == OtpStatus::Active {
                    self.store.set_status(otp.id, OtpStatus::Expired).await?;
                }
                Err(AuthError::OtpExpired)
            }
            OtpStatus::Used => Err(AuthError::OtpAlreadyUsed),
            OtpStatus::Active => {
                if hash_code(submitted) == otp.code_hash {
                    self.store.set_status(otp.id, OtpStatus::Used).await?;
                    Ok(())
                } else {
                    Err(AuthError::OtpMismatch)
                }
            }
        }
    }
}
