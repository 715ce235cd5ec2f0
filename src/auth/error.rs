//! Typed failure taxonomy for credential, token and passcode checks.
//!
//! Denials are expected, user-facing outcomes and are never escalated to a
//! fatal error. Storage faults are kept in a separate variant so callers can
//! tell "you are not allowed in" apart from "the store is unreachable".

use thiserror::Error;

/// A storage-backend fault (store unreachable, constraint failure, ...).
///
/// Never produced by a mere credential or code mismatch. Callers may retry
/// the whole operation; the managers themselves never retry a failed write.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct StoreError(#[from] anyhow::Error);

#[derive(Debug, Error)]
pub enum AuthError {
    /// Bad identifier or password. Deliberately does not distinguish
    /// "no such principal" from "wrong password".
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Account exists but the first password change is still outstanding.
    #[error("change your password to activate your account")]
    AccountPending,
    /// Account is suspended or deleted.
    #[error("account is inactive or suspended")]
    AccountNotActive,
    /// Token/refresh/device tuple not found, or the token is not ACTIVE.
    #[error("invalid login token")]
    InvalidToken,
    /// Token found but past its expiry. Collapsed into [`AuthError::InvalidToken`]
    /// everywhere the caller cannot act on the distinction.
    #[error("login token expired")]
    TokenExpired,
    #[error("no verification code outstanding")]
    OtpNotFound,
    #[error("verification code expired")]
    OtpExpired,
    #[error("verification code mismatch")]
    OtpMismatch,
    #[error("verification code already used")]
    OtpAlreadyUsed,
    /// Authenticated, but the principal's role is not in the allowed set.
    #[error("operation not permitted for this role")]
    Forbidden,
    #[error("storage failure")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Stable machine-readable code, transport-agnostic.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountPending => "ACCOUNT_PENDING",
            Self::AccountNotActive => "ACCOUNT_INACTIVE_OR_SUSPENDED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::OtpNotFound => "OTP_NOT_FOUND",
            Self::OtpExpired => "OTP_EXPIRED",
            Self::OtpMismatch => "OTP_MISMATCH",
            Self::OtpAlreadyUsed => "OTP_ALREADY_USED",
            Self::Forbidden => "FORBIDDEN",
            Self::Store(_) => "INTERNAL_ERROR",
        }
    }

    /// True for expected, user-facing denials; false for backend faults.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}
