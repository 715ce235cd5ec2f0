//! The session lifecycle state machine: issuance with capacity eviction,
//! remember-me rotation, revocation, and credential replacement.

use std::sync::Arc;

use anyhow::anyhow;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use uuid::Uuid;

use super::activity::{record_detached, ActivityKind, ActivitySink};
use super::clock::Clock;
use super::config::AuthConfig;
use super::credentials::CredentialVerifier;
use super::error::{AuthError, StoreError};
use super::principal::{AccountStatus, Principal, PrincipalDirectory};
use super::role::RoleClass;
use super::token::{SessionPair, TokenStatus, TokenStore};

/// Result of a successful password login.
#[derive(Clone, Debug)]
pub struct LoginGrant {
    pub principal_id: Uuid,
    pub pair: SessionPair,
}

/// Result of a successful remember-me re-entry.
#[derive(Clone, Debug)]
pub struct ResumeGrant {
    pub principal_id: Uuid,
    pub pair: SessionPair,
    /// True when the presented pair was expired and a fresh one was minted.
    pub rotated: bool,
}

pub struct SessionManager {
    directory: Arc<dyn PrincipalDirectory>,
    tokens: Arc<dyn TokenStore>,
    verifier: Arc<dyn CredentialVerifier>,
    activity: Arc<dyn ActivitySink>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        directory: Arc<dyn PrincipalDirectory>,
        tokens: Arc<dyn TokenStore>,
        verifier: Arc<dyn CredentialVerifier>,
        activity: Arc<dyn ActivitySink>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            directory,
            tokens,
            verifier,
            activity,
            clock,
            config,
        }
    }

    /// First login: identifier + password.
    ///
    /// Absent principal and wrong password produce the same denial so the
    /// response cannot be used for account enumeration. Account-state
    /// denials are distinct; they do not aid credential guessing.
    pub async fn login(
        &self,
        identifier: &str,
        password: &SecretString,
        class: RoleClass,
        device_info: &str,
    ) -> Result<LoginGrant, AuthError> {
        let principal = self
            .directory
            .find_by_identifier(identifier, class)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let digest = self
            .directory
            .password_hash(principal.id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !self.verify_blocking(password, digest).await? {
            return Err(AuthError::InvalidCredentials);
        }

        account_gate(&principal)?;

        let issued = self.issue_for(&principal, device_info).await?;
        record_detached(
            Arc::clone(&self.activity),
            principal.id,
            ActivityKind::Login,
            String::new(),
        );

        Ok(LoginGrant {
            principal_id: principal.id,
            pair: issued,
        })
    }

    /// Remember-me re-entry with a previously issued pair.
    ///
    /// The (token, principal, refresh, device) tuple must match one row,
    /// which ties the refresh token to its originating device. A still-valid
    /// pair is returned unchanged; an expired one is rotated through the
    /// same eviction/issuance steps as a login.
    pub async fn resume(
        &self,
        token: &str,
        refresh_token: &str,
        principal_id: Uuid,
        device_info: &str,
    ) -> Result<ResumeGrant, AuthError> {
        let record = self
            .tokens
            .find_by_tuple(token, principal_id, refresh_token, device_info)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if record.status != TokenStatus::Active {
            return Err(AuthError::InvalidToken);
        }

        let principal = self
            .directory
            .find_by_id(record.principal_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        account_gate(&principal)?;

        let now = self.clock.now();
        let grant = if now > record.expires_at {
            debug!(%principal_id, "session expired, rotating pair");
            let pair = self.issue_for(&principal, device_info).await?;
            ResumeGrant {
                principal_id: principal.id,
                pair,
                rotated: true,
            }
        } else {
            ResumeGrant {
                principal_id: principal.id,
                pair: SessionPair {
                    token: token.to_string(),
                    refresh_token: refresh_token.to_string(),
                },
                rotated: false,
            }
        };

        record_detached(
            Arc::clone(&self.activity),
            principal.id,
            ActivityKind::Login,
            String::new(),
        );

        Ok(grant)
    }

    /// Retire the presented token. Idempotent at the store level.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let record = self
            .tokens
            .find_by_token(token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        self.tokens
            .set_status(record.id, TokenStatus::Inactive)
            .await?;
        record_detached(
            Arc::clone(&self.activity),
            record.principal_id,
            ActivityKind::Logout,
            String::new(),
        );
        Ok(())
    }

    /// Sign out everywhere: retire every ACTIVE token of the principal.
    /// Returns how many sessions were retired.
    pub async fn logout_all(&self, principal_id: Uuid) -> Result<u64, AuthError> {
        let retired = self
            .tokens
            .set_status_all(principal_id, TokenStatus::Active, TokenStatus::Inactive)
            .await?;
        record_detached(
            Arc::clone(&self.activity),
            principal_id,
            ActivityKind::LogoutAll,
            format!("retired={retired}"),
        );
        Ok(retired)
    }

    /// Replace the password digest atomically. A PENDING account becomes
    /// ACTIVATED, and every existing session is revoked so only holders of
    /// the new password stay signed in.
    pub async fn reset_password(
        &self,
        principal_id: Uuid,
        new_password: &SecretString,
    ) -> Result<(), AuthError> {
        let digest = self.hash_blocking(new_password).await?;
        self.directory
            .replace_password_hash(principal_id, &digest)
            .await?;
        self.tokens
            .set_status_all(principal_id, TokenStatus::Active, TokenStatus::Inactive)
            .await?;
        record_detached(
            Arc::clone(&self.activity),
            principal_id,
            ActivityKind::PasswordReset,
            String::new(),
        );
        Ok(())
    }

    /// Check a wallet PIN. Missing PIN and mismatch are indistinguishable.
    pub async fn verify_pin(
        &self,
        principal_id: Uuid,
        pin: &SecretString,
    ) -> Result<(), AuthError> {
        let digest = self
            .directory
            .pin_hash(principal_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if self.verify_blocking(pin, digest).await? {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    /// Replace the wallet PIN digest atomically.
    pub async fn reset_pin(
        &self,
        principal_id: Uuid,
        new_pin: &SecretString,
    ) -> Result<(), AuthError> {
        let digest = self.hash_blocking(new_pin).await?;
        self.directory
            .replace_pin_hash(principal_id, &digest)
            .await?;
        record_detached(
            Arc::clone(&self.activity),
            principal_id,
            ActivityKind::PinReset,
            String::new(),
        );
        Ok(())
    }

    async fn issue_for(
        &self,
        principal: &Principal,
        device_info: &str,
    ) -> Result<SessionPair, AuthError> {
        let ttl = self.config.session_ttl(principal.role);
        let issued = self
            .tokens
            .issue(principal.id, ttl, device_info, self.config.device_cap())
            .await?;
        Ok(issued.pair)
    }

    /// Run the deliberately slow verify off the async pool.
    async fn verify_blocking(
        &self,
        plaintext: &SecretString,
        digest: String,
    ) -> Result<bool, AuthError> {
        let verifier = Arc::clone(&self.verifier);
        let plaintext = plaintext.expose_secret().to_owned();
        let matched = tokio::task::spawn_blocking(move || verifier.verify(&plaintext, &digest))
            .await
            .map_err(|err| StoreError::from(anyhow!("verify task failed: {err}")))?;
        Ok(matched)
    }

    async fn hash_blocking(&self, plaintext: &SecretString) -> Result<String, AuthError> {
        let verifier = Arc::clone(&self.verifier);
        let plaintext = plaintext.expose_secret().to_owned();
        let digest = tokio::task::spawn_blocking(move || verifier.hash(&plaintext))
            .await
            .map_err(|err| StoreError::from(anyhow!("hash task failed: {err}")))?
            .map_err(|err| StoreError::from(anyhow!("hashing failed: {err}")))?;
        Ok(digest)
    }
}

/// Shared account-state gate for login and resume.
fn account_gate(principal: &Principal) -> Result<(), AuthError> {
    match principal.status {
        AccountStatus::Pending => Err(AuthError::AccountPending),
        AccountStatus::Activated => Ok(()),
        AccountStatus::Suspended | AccountStatus::Deleted => Err(AuthError::AccountNotActive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::credentials::Argon2Verifier;
    use crate::auth::role::Role;
    use crate::auth::store::memory::MemoryAuthStore;
    use chrono::{Duration, TimeZone, Utc};

    fn principal(status: AccountStatus) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            phone: Some("+2519000001".to_string()),
            email: Some("farmer@example.com".to_string()),
            role: Role::Farmer,
            status,
        }
    }

    struct Harness {
        store: Arc<MemoryAuthStore>,
        clock: Arc<ManualClock>,
        manager: SessionManager,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::starting_at(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryAuthStore::new(clock.clone()));
        let manager = SessionManager::new(
            store.clone(),
            store.clone(),
            Arc::new(Argon2Verifier),
            store.clone(),
            clock.clone(),
            AuthConfig::default(),
        );
        Harness {
            store,
            clock,
            manager,
        }
    }

    fn seed(harness: &Harness, status: AccountStatus, password: &str) -> Principal {
        let principal = principal(status);
        let digest = Argon2Verifier.hash(password).expect("hash");
        harness
            .store
            .insert_principal(principal.clone(), Some(digest), None);
        principal
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn account_gate_maps_statuses() {
        assert!(account_gate(&principal(AccountStatus::Activated)).is_ok());
        assert!(matches!(
            account_gate(&principal(AccountStatus::Pending)),
            Err(AuthError::AccountPending)
        ));
        assert!(matches!(
            account_gate(&principal(AccountStatus::Suspended)),
            Err(AuthError::AccountNotActive)
        ));
        assert!(matches!(
            account_gate(&principal(AccountStatus::Deleted)),
            Err(AuthError::AccountNotActive)
        ));
    }

    #[tokio::test]
    async fn login_issues_a_pair_for_valid_credentials() {
        let harness = harness();
        let principal = seed(&harness, AccountStatus::Activated, "correct-horse");

        let grant = harness
            .manager
            .login(
                "+2519000001",
                &secret("correct-horse"),
                RoleClass::Member,
                "android-14",
            )
            .await
            .expect("login");

        assert_eq!(grant.principal_id, principal.id);
        assert!(!grant.pair.token.is_empty());
        assert_ne!(grant.pair.token, grant.pair.refresh_token);
    }

    #[tokio::test]
    async fn unknown_identifier_and_wrong_password_are_indistinguishable() {
        let harness = harness();
        seed(&harness, AccountStatus::Activated, "correct-horse");

        let missing = harness
            .manager
            .login(
                "+2519999999",
                &secret("correct-horse"),
                RoleClass::Member,
                "android-14",
            )
            .await
            .expect_err("should deny");
        let wrong = harness
            .manager
            .login(
                "+2519000001",
                &secret("battery-staple"),
                RoleClass::Member,
                "android-14",
            )
            .await
            .expect_err("should deny");

        assert_eq!(missing.error_code(), wrong.error_code());
        assert!(matches!(missing, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn pending_and_suspended_accounts_get_distinct_denials() {
        let harness = harness();
        let pending = seed(&harness, AccountStatus::Pending, "correct-horse");
        let suspended = seed(&harness, AccountStatus::Suspended, "correct-horse");

        let outcome = harness
            .manager
            .login(
                &pending.id.to_string(),
                &secret("correct-horse"),
                RoleClass::Member,
                "android-14",
            )
            .await;
        assert!(matches!(outcome, Err(AuthError::AccountPending)));

        let outcome = harness
            .manager
            .login(
                &suspended.id.to_string(),
                &secret("correct-horse"),
                RoleClass::Member,
                "android-14",
            )
            .await;
        assert!(matches!(outcome, Err(AuthError::AccountNotActive)));
    }

    #[tokio::test]
    async fn third_login_evicts_the_oldest_session() {
        let harness = harness();
        let principal = seed(&harness, AccountStatus::Activated, "correct-horse");

        let mut pairs = Vec::new();
        for device in ["device-a", "device-b", "device-c"] {
            let grant = harness
                .manager
                .login(
                    "+2519000001",
                    &secret("correct-horse"),
                    RoleClass::Member,
                    device,
                )
                .await
                .expect("login");
            pairs.push(grant.pair);
            harness.clock.advance(Duration::seconds(1));
        }

        let active = harness
            .store
            .find_active(principal.id)
            .await
            .expect("find active");
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].device_info, "device-b");
        assert_eq!(active[1].device_info, "device-c");

        let evicted = harness
            .store
            .find_by_token(&pairs[0].token)
            .await
            .expect("lookup")
            .expect("row kept for audit");
        assert_eq!(evicted.status, TokenStatus::Inactive);
    }

    #[tokio::test]
    async fn resume_with_valid_pair_returns_it_unchanged() {
        let harness = harness();
        let principal = seed(&harness, AccountStatus::Activated, "correct-horse");
        let grant = harness
            .manager
            .login(
                "+2519000001",
                &secret("correct-horse"),
                RoleClass::Member,
                "android-14",
            )
            .await
            .expect("login");
        let before = harness
            .store
            .find_by_token(&grant.pair.token)
            .await
            .expect("lookup")
            .expect("present");

        harness.clock.advance(Duration::days(1));
        let resumed = harness
            .manager
            .resume(
                &grant.pair.token,
                &grant.pair.refresh_token,
                principal.id,
                "android-14",
            )
            .await
            .expect("resume");

        assert!(!resumed.rotated);
        assert_eq!(resumed.pair.token, grant.pair.token);
        assert_eq!(resumed.pair.refresh_token, grant.pair.refresh_token);

        let after = harness
            .store
            .find_by_token(&grant.pair.token)
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(after.expires_at, before.expires_at);
    }

    #[tokio::test]
    async fn resume_after_expiry_rotates_the_pair() {
        let harness = harness();
        let principal = seed(&harness, AccountStatus::Activated, "correct-horse");
        let grant = harness
            .manager
            .login(
                "+2519000001",
                &secret("correct-horse"),
                RoleClass::Member,
                "android-14",
            )
            .await
            .expect("login");

        harness.clock.advance(Duration::days(41));
        let resumed = harness
            .manager
            .resume(
                &grant.pair.token,
                &grant.pair.refresh_token,
                principal.id,
                "android-14",
            )
            .await
            .expect("resume");

        assert!(resumed.rotated);
        assert_ne!(resumed.pair.token, grant.pair.token);
        assert_ne!(resumed.pair.refresh_token, grant.pair.refresh_token);
    }

    #[tokio::test]
    async fn resume_requires_the_exact_tuple() {
        let harness = harness();
        let principal = seed(&harness, AccountStatus::Activated, "correct-horse");
        let grant = harness
            .manager
            .login(
                "+2519000001",
                &secret("correct-horse"),
                RoleClass::Member,
                "android-14",
            )
            .await
            .expect("login");

        let outcome = harness
            .manager
            .resume(
                &grant.pair.token,
                &grant.pair.refresh_token,
                principal.id,
                "ios-17",
            )
            .await;
        assert!(matches!(outcome, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn resume_rejects_an_evicted_token() {
        let harness = harness();
        let principal = seed(&harness, AccountStatus::Activated, "correct-horse");
        let grant = harness
            .manager
            .login(
                "+2519000001",
                &secret("correct-horse"),
                RoleClass::Member,
                "android-14",
            )
            .await
            .expect("login");
        harness.manager.logout(&grant.pair.token).await.expect("logout");

        let outcome = harness
            .manager
            .resume(
                &grant.pair.token,
                &grant.pair.refresh_token,
                principal.id,
                "android-14",
            )
            .await;
        assert!(matches!(outcome, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn logout_all_retires_every_active_session() {
        let harness = harness();
        let principal = seed(&harness, AccountStatus::Activated, "correct-horse");
        for device in ["device-a", "device-b"] {
            harness
                .manager
                .login(
                    "+2519000001",
                    &secret("correct-horse"),
                    RoleClass::Member,
                    device,
                )
                .await
                .expect("login");
        }

        let retired = harness
            .manager
            .logout_all(principal.id)
            .await
            .expect("logout all");
        assert_eq!(retired, 2);
        assert!(harness
            .store
            .find_active(principal.id)
            .await
            .expect("find active")
            .is_empty());
    }

    #[tokio::test]
    async fn reset_password_activates_and_revokes() {
        let harness = harness();
        let principal = seed(&harness, AccountStatus::Pending, "first-password");

        harness
            .manager
            .reset_password(principal.id, &secret("second-password"))
            .await
            .expect("reset");

        assert_eq!(
            harness.store.principal(principal.id).map(|p| p.status),
            Some(AccountStatus::Activated)
        );

        let grant = harness
            .manager
            .login(
                "+2519000001",
                &secret("second-password"),
                RoleClass::Member,
                "android-14",
            )
            .await
            .expect("login with new password");

        let outcome = harness
            .manager
            .login(
                "+2519000001",
                &secret("first-password"),
                RoleClass::Member,
                "android-14",
            )
            .await;
        assert!(matches!(outcome, Err(AuthError::InvalidCredentials)));

        harness
            .manager
            .reset_password(principal.id, &secret("third-password"))
            .await
            .expect("reset again");
        let outcome = harness
            .manager
            .resume(
                &grant.pair.token,
                &grant.pair.refresh_token,
                principal.id,
                "android-14",
            )
            .await;
        assert!(matches!(outcome, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn pin_verification_round_trip() {
        let harness = harness();
        let principal = seed(&harness, AccountStatus::Activated, "correct-horse");

        // No PIN set yet: indistinguishable from a mismatch.
        let outcome = harness
            .manager
            .verify_pin(principal.id, &secret("4312"))
            .await;
        assert!(matches!(outcome, Err(AuthError::InvalidCredentials)));

        harness
            .manager
            .reset_pin(principal.id, &secret("4312"))
            .await
            .expect("set pin");
        assert!(harness
            .manager
            .verify_pin(principal.id, &secret("4312"))
            .await
            .is_ok());
        let outcome = harness
            .manager
            .verify_pin(principal.id, &secret("9999"))
            .await;
        assert!(matches!(outcome, Err(AuthError::InvalidCredentials)));
    }
}
