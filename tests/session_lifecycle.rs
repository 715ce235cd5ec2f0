//! End-to-end exercises of the session and passcode lifecycle over the
//! in-memory backend, with a manual clock driving expiry.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use secrecy::SecretString;

use farmgate::auth::clock::{Clock, ManualClock};
use farmgate::auth::config::AuthConfig;
use farmgate::auth::credentials::{Argon2Verifier, CredentialVerifier};
use farmgate::auth::delivery::{OtpDelivery, RecordingDelivery};
use farmgate::auth::error::AuthError;
use farmgate::auth::otp::{effective_status, OtpPurpose, OtpStatus, OtpStore};
use farmgate::auth::principal::{AccountStatus, Principal};
use farmgate::auth::rate_limit::NoopRateLimiter;
use farmgate::auth::role::{Role, RoleClass};
use farmgate::auth::store::memory::MemoryAuthStore;
use farmgate::auth::token::{TokenStatus, TokenStore};
use farmgate::auth::AuthRuntime;
use uuid::Uuid;

struct Harness {
    runtime: AuthRuntime,
    store: Arc<MemoryAuthStore>,
    clock: Arc<ManualClock>,
    delivery: Arc<RecordingDelivery>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
    ));
    let store = Arc::new(MemoryAuthStore::new(clock.clone()));
    let delivery = Arc::new(RecordingDelivery::new());
    let runtime = AuthRuntime::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(Argon2Verifier),
        store.clone(),
        delivery.clone(),
        Arc::new(NoopRateLimiter),
        clock.clone(),
        AuthConfig::default(),
    );
    Harness {
        runtime,
        store,
        clock,
        delivery,
    }
}

fn seed_consumer(harness: &Harness, password: &str) -> Principal {
    let principal = Principal {
        id: Uuid::new_v4(),
        phone: Some("+2519000001".to_string()),
        email: Some("u1@example.com".to_string()),
        role: Role::Consumer,
        status: AccountStatus::Activated,
    };
    let digest = Argon2Verifier.hash(password).expect("hash");
    harness
        .store
        .insert_principal(principal.clone(), Some(digest), None);
    principal
}

fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

#[tokio::test]
async fn device_cap_holds_across_sequential_logins() {
    let harness = harness();
    let u1 = seed_consumer(&harness, "correct-horse");

    // Device A, then B, then C: the cap stays at two and the oldest loses.
    let mut grants = Vec::new();
    for device in ["device-a", "device-b", "device-c"] {
        let grant = harness
            .runtime
            .sessions
            .login(
                "+2519000001",
                &secret("correct-horse"),
                RoleClass::Member,
                device,
            )
            .await
            .expect("login");
        grants.push(grant);
        harness.clock.advance(Duration::seconds(1));

        let active = harness.store.find_active(u1.id).await.expect("find active");
        assert!(active.len() <= 2);
    }

    let active = harness.store.find_active(u1.id).await.expect("find active");
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].device_info, "device-b");
    assert_eq!(active[1].device_info, "device-c");

    // T1 is retired, not deleted.
    let t1 = harness
        .store
        .find_by_token(&grants[0].pair.token)
        .await
        .expect("lookup")
        .expect("row kept");
    assert_eq!(t1.status, TokenStatus::Inactive);

    // The evicted pair no longer authenticates.
    let outcome = harness
        .runtime
        .authenticator
        .authenticate(&grants[0].pair.token, Some(u1.id))
        .await;
    assert!(matches!(outcome, Err(AuthError::InvalidToken)));
}

#[tokio::test]
async fn expired_token_never_authenticates_even_while_active() {
    let harness = harness();
    let u1 = seed_consumer(&harness, "correct-horse");
    let grant = harness
        .runtime
        .sessions
        .login(
            "+2519000001",
            &secret("correct-horse"),
            RoleClass::Member,
            "device-a",
        )
        .await
        .expect("login");

    harness.clock.advance(Duration::days(41));

    // The row still reads ACTIVE; only the clock says otherwise.
    let record = harness
        .store
        .find_by_token(&grant.pair.token)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(record.status, TokenStatus::Active);

    let outcome = harness
        .runtime
        .authenticator
        .authenticate(&grant.pair.token, Some(u1.id))
        .await;
    assert!(matches!(outcome, Err(AuthError::InvalidToken)));
}

#[tokio::test]
async fn resume_does_not_downgrade_a_valid_session() {
    let harness = harness();
    let u1 = seed_consumer(&harness, "correct-horse");
    let grant = harness
        .runtime
        .sessions
        .login(
            "+2519000001",
            &secret("correct-horse"),
            RoleClass::Member,
            "device-a",
        )
        .await
        .expect("login");
    let before = harness
        .store
        .find_by_token(&grant.pair.token)
        .await
        .expect("lookup")
        .expect("present");

    harness.clock.advance(Duration::days(10));
    let resumed = harness
        .runtime
        .sessions
        .resume(
            &grant.pair.token,
            &grant.pair.refresh_token,
            u1.id,
            "device-a",
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
async fn resume_after_expiry_rotates_and_retires_the_old_pair() {
    let harness = harness();
    let u1 = seed_consumer(&harness, "correct-horse");
    let grant = harness
        .runtime
        .sessions
        .login(
            "+2519000001",
            &secret("correct-horse"),
            RoleClass::Member,
            "device-a",
        )
        .await
        .expect("login");

    harness.clock.advance(Duration::days(41));
    let resumed = harness
        .runtime
        .sessions
        .resume(
            &grant.pair.token,
            &grant.pair.refresh_token,
            u1.id,
            "device-a",
        )
        .await
        .expect("resume");

    assert!(resumed.rotated);
    assert_ne!(resumed.pair.token, grant.pair.token);
    assert_ne!(resumed.pair.refresh_token, grant.pair.refresh_token);

    // New pair works, old pair is dead.
    assert!(harness
        .runtime
        .authenticator
        .authenticate(&resumed.pair.token, Some(u1.id))
        .await
        .is_ok());
    assert!(harness
        .runtime
        .authenticator
        .authenticate(&grant.pair.token, Some(u1.id))
        .await
        .is_err());
}

#[tokio::test]
async fn login_denials_do_not_reveal_which_credential_was_wrong() {
    let harness = harness();
    seed_consumer(&harness, "correct-horse");

    let unknown = harness
        .runtime
        .sessions
        .login(
            "+2519999999",
            &secret("correct-horse"),
            RoleClass::Member,
            "device-a",
        )
        .await
        .expect_err("denied");
    let wrong_password = harness
        .runtime
        .sessions
        .login(
            "+2519000001",
            &secret("battery-staple"),
            RoleClass::Member,
            "device-a",
        )
        .await
        .expect_err("denied");

    assert_eq!(unknown.error_code(), wrong_password.error_code());
}

#[tokio::test]
async fn otp_is_single_use() {
    let harness = harness();
    let u1 = seed_consumer(&harness, "correct-horse");

    let issued = harness
        .runtime
        .otp
        .issue(u1.id, OtpPurpose::ForgetPassword, Duration::minutes(10))
        .await
        .expect("issue");

    assert!(harness
        .runtime
        .otp
        .verify(u1.id, OtpPurpose::ForgetPassword, &issued.code)
        .await
        .is_ok());

    let replay = harness
        .runtime
        .otp
        .verify(u1.id, OtpPurpose::ForgetPassword, &issued.code)
        .await;
    assert!(matches!(replay, Err(AuthError::OtpAlreadyUsed)));
}

#[tokio::test]
async fn otp_expires_lazily_and_never_verifies_after_ttl() {
    let harness = harness();
    let u1 = seed_consumer(&harness, "correct-horse");

    let issued = harness
        .runtime
        .otp
        .issue(u1.id, OtpPurpose::ForgetPassword, Duration::minutes(2))
        .await
        .expect("issue");

    harness.clock.advance(Duration::minutes(3));

    // First read after expiry already reports EXPIRED, before any write.
    let stored = harness
        .store
        .latest(u1.id, OtpPurpose::ForgetPassword)
        .await
        .expect("latest")
        .expect("present");
    assert_eq!(stored.status, OtpStatus::Active);
    assert_eq!(
        effective_status(&stored, harness.clock.now()),
        OtpStatus::Expired
    );

    let outcome = harness
        .runtime
        .otp
        .verify(u1.id, OtpPurpose::ForgetPassword, &issued.code)
        .await;
    assert!(matches!(outcome, Err(AuthError::OtpExpired)));

    // The verify write path persisted the correction.
    let stored = harness
        .store
        .latest(u1.id, OtpPurpose::ForgetPassword)
        .await
        .expect("latest")
        .expect("present");
    assert_eq!(stored.status, OtpStatus::Expired);
}

#[tokio::test]
async fn newer_otp_supersedes_the_old_one() {
    let harness = harness();
    let u1 = seed_consumer(&harness, "correct-horse");

    let first = harness
        .runtime
        .otp
        .issue(u1.id, OtpPurpose::ForgetPassword, Duration::minutes(10))
        .await
        .expect("issue");
    let second = harness
        .runtime
        .otp
        .issue(u1.id, OtpPurpose::ForgetPassword, Duration::minutes(10))
        .await
        .expect("issue");

    let old = harness
        .runtime
        .otp
        .verify(u1.id, OtpPurpose::ForgetPassword, &first.code)
        .await;
    // Either the digits happen to collide (then the new code was consumed)
    // or the old code is rejected; it must never consume the first row.
    if first.code != second.code {
        assert!(matches!(old, Err(AuthError::OtpMismatch)));
        assert!(harness
            .runtime
            .otp
            .verify(u1.id, OtpPurpose::ForgetPassword, &second.code)
            .await
            .is_ok());
    }
}

#[tokio::test]
async fn otp_is_bound_to_its_purpose() {
    let harness = harness();
    let u1 = seed_consumer(&harness, "correct-horse");

    let issued = harness
        .runtime
        .otp
        .issue(u1.id, OtpPurpose::ForgetPassword, Duration::minutes(10))
        .await
        .expect("issue");

    // The same digits never verify under another purpose.
    let outcome = harness
        .runtime
        .otp
        .verify(u1.id, OtpPurpose::ResetPin, &issued.code)
        .await;
    assert!(matches!(outcome, Err(AuthError::OtpNotFound)));

    assert!(harness
        .runtime
        .otp
        .verify(u1.id, OtpPurpose::ForgetPassword, &issued.code)
        .await
        .is_ok());
}

#[tokio::test]
async fn forgotten_password_flow_end_to_end() {
    let harness = harness();
    let u1 = seed_consumer(&harness, "old-password");
    let old_grant = harness
        .runtime
        .sessions
        .login(
            "+2519000001",
            &secret("old-password"),
            RoleClass::Member,
            "device-a",
        )
        .await
        .expect("login");

    // Issue and deliver a code the way the forgot-password endpoint does.
    let issued = harness
        .runtime
        .otp
        .issue(
            u1.id,
            OtpPurpose::ForgetPassword,
            harness.runtime.config.otp_ttl(),
        )
        .await
        .expect("issue");
    harness
        .runtime
        .delivery
        .deliver("u1@example.com", &issued.code)
        .await
        .expect("deliver");

    let sent = harness.delivery.drain();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "u1@example.com");
    let code = sent[0].1.clone();

    harness
        .runtime
        .otp
        .verify(u1.id, OtpPurpose::ForgetPassword, &code)
        .await
        .expect("verify");
    harness
        .runtime
        .sessions
        .reset_password(u1.id, &secret("new-password"))
        .await
        .expect("reset");

    // Old sessions are revoked; the new password signs in.
    let outcome = harness
        .runtime
        .authenticator
        .authenticate(&old_grant.pair.token, Some(u1.id))
        .await;
    assert!(matches!(outcome, Err(AuthError::InvalidToken)));

    assert!(harness
        .runtime
        .sessions
        .login(
            "+2519000001",
            &secret("new-password"),
            RoleClass::Member,
            "device-a",
        )
        .await
        .is_ok());
    let outcome = harness
        .runtime
        .sessions
        .login(
            "+2519000001",
            &secret("old-password"),
            RoleClass::Member,
            "device-b",
        )
        .await;
    assert!(matches!(outcome, Err(AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn admin_sessions_expire_sooner_than_member_sessions() {
    let harness = harness();
    let admin = Principal {
        id: Uuid::new_v4(),
        phone: Some("+2519000009".to_string()),
        email: Some("ops@example.com".to_string()),
        role: Role::Admin,
        status: AccountStatus::Activated,
    };
    let digest = Argon2Verifier.hash("admin-password").expect("hash");
    harness
        .store
        .insert_principal(admin.clone(), Some(digest), None);
    seed_consumer(&harness, "correct-horse");

    let admin_grant = harness
        .runtime
        .sessions
        .login(
            "+2519000009",
            &secret("admin-password"),
            RoleClass::Admin,
            "laptop",
        )
        .await
        .expect("admin login");
    let member_grant = harness
        .runtime
        .sessions
        .login(
            "+2519000001",
            &secret("correct-horse"),
            RoleClass::Member,
            "device-a",
        )
        .await
        .expect("member login");

    // Two days in: the admin session is gone, the member session lives on.
    harness.clock.advance(Duration::days(2));
    assert!(harness
        .runtime
        .authenticator
        .authenticate(&admin_grant.pair.token, Some(admin.id))
        .await
        .is_err());
    assert!(harness
        .runtime
        .authenticator
        .authenticate(&member_grant.pair.token, None)
        .await
        .is_ok());
}

#[tokio::test]
async fn role_class_keeps_admin_and_member_logins_apart() {
    let harness = harness();
    seed_consumer(&harness, "correct-horse");

    // A member cannot log in through the admin door, and the denial is the
    // generic credential error.
    let outcome = harness
        .runtime
        .sessions
        .login(
            "+2519000001",
            &secret("correct-horse"),
            RoleClass::Admin,
            "device-a",
        )
        .await;
    assert!(matches!(outcome, Err(AuthError::InvalidCredentials)));
}
