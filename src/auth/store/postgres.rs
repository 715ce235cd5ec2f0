//! PostgreSQL backend for tokens, passcodes, principals and audit rows.
//!
//! Raw SQL with bound parameters; every statement runs inside a `db.query`
//! span. The evict-then-insert sequence runs as one transaction with the
//! principal's ACTIVE rows locked, so the device cap holds even under
//! concurrent logins.

use anyhow::{anyhow, Context};
use chrono::Duration;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use std::sync::Arc;

use crate::auth::activity::{ActivityKind, ActivitySink};
use crate::auth::clock::Clock;
use crate::auth::delivery::OtpDelivery;
use crate::auth::error::StoreError;
use crate::auth::otp::{Otp, OtpPurpose, OtpStatus, OtpStore};
use crate::auth::principal::{AccountStatus, Principal, PrincipalDirectory};
use crate::auth::role::{Role, RoleClass};
use crate::auth::token::{
    generate_token, hash_token, IssuedSession, SessionPair, SessionToken, TokenStatus, TokenStore,
};

const OUTBOX_OTP_TEMPLATE: &str = "password_reset_otp";

pub struct PgAuthStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgAuthStore {
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn token_from_row(row: &PgRow) -> Result<SessionToken, StoreError> {
    let status: String = row
        .try_get("status")
        .context("failed to read token status")?;
    let status = TokenStatus::parse(&status)
        .ok_or_else(|| StoreError::from(anyhow!("unknown token status: {status}")))?;
    Ok(SessionToken {
        id: row.try_get("id").context("failed to read token id")?,
        principal_id: row
            .try_get("principal_id")
            .context("failed to read token principal")?,
        device_info: row
            .try_get("device_info")
            .context("failed to read token device info")?,
        issued_at: row
            .try_get("issued_at")
            .context("failed to read token issuance time")?,
        expires_at: row
            .try_get("expires_at")
            .context("failed to read token expiry")?,
        status,
    })
}

fn otp_from_row(row: &PgRow) -> Result<Otp, StoreError> {
    let status: String = row
        .try_get("status")
        .context("failed to read passcode status")?;
    let status = OtpStatus::parse(&status)
        .ok_or_else(|| StoreError::from(anyhow!("unknown passcode status: {status}")))?;
    let purpose: String = row
        .try_get("purpose")
        .context("failed to read passcode purpose")?;
    let purpose = OtpPurpose::parse(&purpose)
        .ok_or_else(|| StoreError::from(anyhow!("unknown passcode purpose: {purpose}")))?;
    Ok(Otp {
        id: row.try_get("id").context("failed to read passcode id")?,
        principal_id: row
            .try_get("principal_id")
            .context("failed to read passcode principal")?,
        purpose,
        code_hash: row
            .try_get("code_hash")
            .context("failed to read passcode hash")?,
        status,
        created_at: row
            .try_get("created_at")
            .context("failed to read passcode creation time")?,
        expires_at: row
            .try_get("expires_at")
            .context("failed to read passcode expiry")?,
    })
}

fn principal_from_row(row: &PgRow) -> Result<Principal, StoreError> {
    let role: String = row
        .try_get("role")
        .context("failed to read principal role")?;
    let role = Role::parse(&role)
        .ok_or_else(|| StoreError::from(anyhow!("unknown principal role: {role}")))?;
    let status: String = row
        .try_get("status")
        .context("failed to read principal status")?;
    let status = AccountStatus::parse(&status)
        .ok_or_else(|| StoreError::from(anyhow!("unknown principal status: {status}")))?;
    Ok(Principal {
        id: row.try_get("id").context("failed to read principal id")?,
        phone: row
            .try_get("phone")
            .context("failed to read principal phone")?,
        email: row
            .try_get("email")
            .context("failed to read principal email")?,
        role,
        status,
    })
}

#[async_trait::async_trait]
impl TokenStore for PgAuthStore {
    async fn issue(
        &self,
        principal_id: Uuid,
        ttl: Duration,
        device_info: &str,
        cap: usize,
    ) -> Result<IssuedSession, StoreError> {
        let now = self.clock.now();
        let expires_at = now + ttl;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin token issuance transaction")?;

        // Lock this principal's ACTIVE rows so concurrent logins serialize
        // and the cap cannot be overshot.
        let query = r"
            SELECT id
            FROM session_tokens
            WHERE principal_id = $1
              AND status = 'ACTIVE'
            ORDER BY issued_at ASC
            FOR UPDATE
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let active = sqlx::query(query)
            .bind(principal_id)
            .fetch_all(&mut *tx)
            .instrument(span)
            .await
            .context("failed to list active tokens")?;

        if active.len() >= cap {
            let evict = active.len() + 1 - cap;
            let query = "UPDATE session_tokens SET status = 'INACTIVE' WHERE id = $1";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            for row in active.iter().take(evict) {
                let oldest: Uuid = row.try_get("id").context("failed to read token id")?;
                sqlx::query(query)
                    .bind(oldest)
                    .execute(&mut *tx)
                    .instrument(span.clone())
                    .await
                    .context("failed to evict oldest token")?;
            }
        }

        let query = r"
            INSERT INTO session_tokens
                (id, principal_id, token_hash, refresh_hash, device_info, issued_at, expires_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'ACTIVE')
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );

        for _ in 0..3 {
            let token = generate_token()?;
            let refresh_token = generate_token()?;
            let id = Uuid::now_v7();

            let result = sqlx::query(query)
                .bind(id)
                .bind(principal_id)
                .bind(hash_token(&token))
                .bind(hash_token(&refresh_token))
                .bind(device_info)
                .bind(now)
                .bind(expires_at)
                .execute(&mut *tx)
                .instrument(span.clone())
                .await;

            match result {
                Ok(_) => {
                    tx.commit()
                        .await
                        .context("commit token issuance transaction")?;
                    return Ok(IssuedSession {
                        record: SessionToken {
                            id,
                            principal_id,
                            device_info: device_info.to_string(),
                            issued_at: now,
                            expires_at,
                            status: TokenStatus::Active,
                        },
                        pair: SessionPair {
                            token,
                            refresh_token,
                        },
                    });
                }
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => {
                    return Err(StoreError::from(
                        anyhow::Error::new(err).context("failed to insert session token"),
                    ))
                }
            }
        }

        Err(StoreError::from(anyhow!(
            "failed to generate unique session token"
        )))
    }

    async fn find_active(&self, principal_id: Uuid) -> Result<Vec<SessionToken>, StoreError> {
        let query = r"
            SELECT id, principal_id, device_info, issued_at, expires_at, status
            FROM session_tokens
            WHERE principal_id = $1
              AND status = 'ACTIVE'
            ORDER BY issued_at ASC
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(principal_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list active tokens")?;
        rows.iter().map(token_from_row).collect()
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionToken>, StoreError> {
        let query = r"
            SELECT id, principal_id, device_info, issued_at, expires_at, status
            FROM session_tokens
            WHERE token_hash = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup token")?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn find_by_tuple(
        &self,
        token: &str,
        principal_id: Uuid,
        refresh_token: &str,
        device_info: &str,
    ) -> Result<Option<SessionToken>, StoreError> {
        let query = r"
            SELECT id, principal_id, device_info, issued_at, expires_at, status
            FROM session_tokens
            WHERE token_hash = $1
              AND principal_id = $2
              AND refresh_hash = $3
              AND device_info = $4
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(hash_token(token))
            .bind(principal_id)
            .bind(hash_token(refresh_token))
            .bind(device_info)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup token tuple")?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn set_status(&self, token_id: Uuid, status: TokenStatus) -> Result<(), StoreError> {
        let query = "UPDATE session_tokens SET status = $2 WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update token status")?;
        Ok(())
    }

    async fn set_status_all(
        &self,
        principal_id: Uuid,
        from: TokenStatus,
        to: TokenStatus,
    ) -> Result<u64, StoreError> {
        let query = r"
            UPDATE session_tokens
            SET status = $3
            WHERE principal_id = $1
              AND status = $2
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(principal_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to bulk-update token status")?;
        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl OtpStore for PgAuthStore {
    async fn create(
        &self,
        principal_id: Uuid,
        purpose: OtpPurpose,
        code_hash: &[u8],
        ttl: Duration,
    ) -> Result<Otp, StoreError> {
        let now = self.clock.now();
        let expires_at = now + ttl;
        let id = Uuid::now_v7();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin passcode transaction")?;

        // Supersede outstanding codes so only the newest can ever verify.
        let query = r"
            UPDATE one_time_passcodes
            SET status = 'EXPIRED'
            WHERE principal_id = $1
              AND purpose = $2
              AND status = 'ACTIVE'
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(principal_id)
            .bind(purpose.as_str())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to supersede outstanding passcodes")?;

        let query = r"
            INSERT INTO one_time_passcodes
                (id, principal_id, purpose, code_hash, status, created_at, expires_at)
            VALUES ($1, $2, $3, $4, 'ACTIVE', $5, $6)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(principal_id)
            .bind(purpose.as_str())
            .bind(code_hash)
            .bind(now)
            .bind(expires_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert passcode")?;

        tx.commit().await.context("commit passcode transaction")?;

        Ok(Otp {
            id,
            principal_id,
            purpose,
            code_hash: code_hash.to_vec(),
            status: OtpStatus::Active,
            created_at: now,
            expires_at,
        })
    }

    async fn latest(
        &self,
        principal_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<Option<Otp>, StoreError> {
        let query = r"
            SELECT id, principal_id, purpose, code_hash, status, created_at, expires_at
            FROM one_time_passcodes
            WHERE principal_id = $1
              AND purpose = $2
            ORDER BY created_at DESC, id DESC
            LIMIT 1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(principal_id)
            .bind(purpose.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup latest passcode")?;
        row.as_ref().map(otp_from_row).transpose()
    }

    async fn set_status(&self, otp_id: Uuid, status: OtpStatus) -> Result<(), StoreError> {
        let query = "UPDATE one_time_passcodes SET status = $2 WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(otp_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update passcode status")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PrincipalDirectory for PgAuthStore {
    async fn find_by_identifier(
        &self,
        identifier: &str,
        class: RoleClass,
    ) -> Result<Option<Principal>, StoreError> {
        let query = r"
            SELECT id, phone, email, role, status
            FROM principals
            WHERE (id::text = $1 OR phone = $1)
              AND (role IN ('ADMIN', 'SUPER_ADMIN')) = $2
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(identifier)
            .bind(class == RoleClass::Admin)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to resolve identifier")?;

        // Absence and ambiguity both resolve to "not found".
        match rows.as_slice() {
            [row] => Ok(Some(principal_from_row(row)?)),
            _ => Ok(None),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, StoreError> {
        let query = r"
            SELECT id, phone, email, role, status
            FROM principals
            WHERE id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup principal")?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn password_hash(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let query = "SELECT password_hash FROM credentials WHERE principal_id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup password hash")?;
        match row {
            Some(row) => Ok(row
                .try_get("password_hash")
                .context("failed to read password hash")?),
            None => Ok(None),
        }
    }

    async fn replace_password_hash(&self, id: Uuid, digest: &str) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin credential transaction")?;

        let query = r"
            INSERT INTO credentials (principal_id, password_hash)
            VALUES ($1, $2)
            ON CONFLICT (principal_id) DO UPDATE SET password_hash = EXCLUDED.password_hash
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(digest)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to replace password hash")?;

        // First password change activates a pending account.
        let query = r"
            UPDATE principals
            SET status = 'ACTIVATED'
            WHERE id = $1
              AND status = 'PENDING'
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to activate pending account")?;

        tx.commit().await.context("commit credential transaction")?;
        Ok(())
    }

    async fn pin_hash(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let query = "SELECT pin_hash FROM credentials WHERE principal_id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup pin hash")?;
        match row {
            Some(row) => Ok(row.try_get("pin_hash").context("failed to read pin hash")?),
            None => Ok(None),
        }
    }

    async fn replace_pin_hash(&self, id: Uuid, digest: &str) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO credentials (principal_id, pin_hash)
            VALUES ($1, $2)
            ON CONFLICT (principal_id) DO UPDATE SET pin_hash = EXCLUDED.pin_hash
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(digest)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to replace pin hash")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActivitySink for PgAuthStore {
    async fn record(
        &self,
        principal_id: Uuid,
        kind: ActivityKind,
        detail: &str,
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO user_activity (principal_id, kind, detail, created_at)
            VALUES ($1, $2, $3, $4)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(principal_id)
            .bind(kind.as_str())
            .bind(detail)
            .bind(self.clock.now())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to record activity")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl OtpDelivery for PgAuthStore {
    /// Enqueue the code for the notification subsystem; transport happens
    /// out of process.
    async fn deliver(&self, address: &str, code: &str) -> Result<(), StoreError> {
        let payload = serde_json::json!({ "code": code });
        let payload_text =
            serde_json::to_string(&payload).context("failed to serialize outbox payload")?;

        let query = r"
            INSERT INTO email_outbox (to_address, template, payload_json)
            VALUES ($1, $2, $3::jsonb)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(address)
            .bind(OUTBOX_OTP_TEMPLATE)
            .bind(payload_text)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to enqueue outbox row")?;
        Ok(())
    }
}
