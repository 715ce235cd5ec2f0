//! Credential and session lifecycle: issuance and capacity-bounded eviction
//! of session tokens, expiry-based rotation, multi-device revocation, and
//! single-use time-boxed passcodes for secondary verification.
//!
//! The stores are the single source of truth; there is no in-process session
//! cache. Managers own every mutation of token and passcode rows; the
//! request guard only reads.

use std::sync::Arc;

use sqlx::PgPool;

pub mod activity;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod delivery;
pub mod error;
pub mod guard;
pub mod otp;
pub mod principal;
pub mod rate_limit;
pub mod role;
pub mod session;
pub mod store;
pub mod token;

use self::activity::ActivitySink;
use self::clock::{Clock, SystemClock};
use self::config::AuthConfig;
use self::credentials::{Argon2Verifier, CredentialVerifier};
use self::delivery::OtpDelivery;
use self::guard::Authenticator;
use self::otp::OtpManager;
use self::principal::PrincipalDirectory;
use self::rate_limit::{NoopRateLimiter, RateLimiter};
use self::session::SessionManager;
use self::store::postgres::PgAuthStore;
use self::token::TokenStore;

/// Everything a request handler needs, wired once at startup.
pub struct AuthRuntime {
    pub sessions: SessionManager,
    pub otp: OtpManager,
    pub authenticator: Authenticator,
    pub directory: Arc<dyn PrincipalDirectory>,
    pub delivery: Arc<dyn OtpDelivery>,
    pub limiter: Arc<dyn RateLimiter>,
    pub config: AuthConfig,
}

impl AuthRuntime {
    /// Wire the managers over explicit collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: Arc<dyn PrincipalDirectory>,
        tokens: Arc<dyn TokenStore>,
        otp_store: Arc<dyn otp::OtpStore>,
        verifier: Arc<dyn CredentialVerifier>,
        activity: Arc<dyn ActivitySink>,
        delivery: Arc<dyn OtpDelivery>,
        limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        let sessions = SessionManager::new(
            Arc::clone(&directory),
            Arc::clone(&tokens),
            verifier,
            activity,
            Arc::clone(&clock),
            config.clone(),
        );
        let otp = OtpManager::new(otp_store, Arc::clone(&clock));
        let authenticator = Authenticator::new(tokens, Arc::clone(&directory), clock);
        Self {
            sessions,
            otp,
            authenticator,
            directory,
            delivery,
            limiter,
            config,
        }
    }

    /// Production wiring: one PostgreSQL store behind every trait, Argon2id
    /// verification, system clock, no-op rate limiter.
    #[must_use]
    pub fn with_postgres(pool: PgPool, config: AuthConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(PgAuthStore::new(pool, Arc::clone(&clock)));
        Self::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(Argon2Verifier),
            store.clone(),
            store,
            Arc::new(NoopRateLimiter),
            clock,
            config,
        )
    }
}
