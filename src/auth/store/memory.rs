//! In-memory backend implementing every store trait behind one mutex.
//!
//! The single lock makes the evict-then-insert sequence trivially atomic,
//! which is exactly the guarantee the Postgres backend provides with a
//! transaction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use uuid::Uuid;

use crate::auth::activity::{ActivityKind, ActivitySink};
use crate::auth::clock::Clock;
use crate::auth::error::StoreError;
use crate::auth::otp::{Otp, OtpPurpose, OtpStatus, OtpStore};
use crate::auth::principal::{AccountStatus, Principal, PrincipalDirectory};
use crate::auth::role::RoleClass;
use crate::auth::token::{
    generate_token, hash_token, IssuedSession, SessionPair, SessionToken, TokenStatus, TokenStore,
};

#[derive(Clone, Debug)]
struct StoredToken {
    record: SessionToken,
    token_hash: Vec<u8>,
    refresh_hash: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
struct CredentialRow {
    password_hash: Option<String>,
    pin_hash: Option<String>,
}

#[derive(Default)]
struct Inner {
    principals: HashMap<Uuid, Principal>,
    credentials: HashMap<Uuid, CredentialRow>,
    tokens: Vec<StoredToken>,
    otps: Vec<Otp>,
    activity: Vec<(Uuid, String, String)>,
}

pub struct MemoryAuthStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryAuthStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Seed a principal with optional credential digests.
    pub fn insert_principal(
        &self,
        principal: Principal,
        password_hash: Option<String>,
        pin_hash: Option<String>,
    ) {
        let mut inner = self.lock();
        inner.credentials.insert(
            principal.id,
            CredentialRow {
                password_hash,
                pin_hash,
            },
        );
        inner.principals.insert(principal.id, principal);
    }

    pub fn set_account_status(&self, principal_id: Uuid, status: AccountStatus) {
        let mut inner = self.lock();
        if let Some(principal) = inner.principals.get_mut(&principal_id) {
            principal.status = status;
        }
    }

    #[must_use]
    pub fn principal(&self, principal_id: Uuid) -> Option<Principal> {
        self.lock().principals.get(&principal_id).cloned()
    }

    /// Recorded (principal, kind, detail) activity rows, oldest first.
    #[must_use]
    pub fn activity(&self) -> Vec<(Uuid, String, String)> {
        self.lock().activity.clone()
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryAuthStore {
    async fn issue(
        &self,
        principal_id: Uuid,
        ttl: Duration,
        device_info: &str,
        cap: usize,
    ) -> Result<IssuedSession, StoreError> {
        let token = generate_token()?;
        let refresh_token = generate_token()?;
        let now = self.clock.now();

        let mut inner = self.lock();

        let mut active: Vec<usize> = inner
            .tokens
            .iter()
            .enumerate()
            .filter(|(_, stored)| {
                stored.record.principal_id == principal_id
                    && stored.record.status == TokenStatus::Active
            })
            .map(|(index, _)| index)
            .collect();
        active.sort_by_key(|&index| inner.tokens[index].record.issued_at);

        if active.len() >= cap {
            let evict = active.len() + 1 - cap;
            for &index in active.iter().take(evict) {
                inner.tokens[index].record.status = TokenStatus::Inactive;
            }
        }

        let record = SessionToken {
            id: Uuid::new_v4(),
            principal_id,
            device_info: device_info.to_string(),
            issued_at: now,
            expires_at: now + ttl,
            status: TokenStatus::Active,
        };
        inner.tokens.push(StoredToken {
            record: record.clone(),
            token_hash: hash_token(&token),
            refresh_hash: hash_token(&refresh_token),
        });

        Ok(IssuedSession {
            record,
            pair: SessionPair {
                token,
                refresh_token,
            },
        })
    }

    async fn find_active(&self, principal_id: Uuid) -> Result<Vec<SessionToken>, StoreError> {
        let inner = self.lock();
        let mut records: Vec<SessionToken> = inner
            .tokens
            .iter()
            .filter(|stored| {
                stored.record.principal_id == principal_id
                    && stored.record.status == TokenStatus::Active
            })
            .map(|stored| stored.record.clone())
            .collect();
        records.sort_by_key(|record| record.issued_at);
        Ok(records)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionToken>, StoreError> {
        let token_hash = hash_token(token);
        let inner = self.lock();
        Ok(inner
            .tokens
            .iter()
            .find(|stored| stored.token_hash == token_hash)
            .map(|stored| stored.record.clone()))
    }

    async fn find_by_tuple(
        &self,
        token: &str,
        principal_id: Uuid,
        refresh_token: &str,
        device_info: &str,
    ) -> Result<Option<SessionToken>, StoreError> {
        let token_hash = hash_token(token);
        let refresh_hash = hash_token(refresh_token);
        let inner = self.lock();
        Ok(inner
            .tokens
            .iter()
            .find(|stored| {
                stored.token_hash == token_hash
                    && stored.record.principal_id == principal_id
                    && stored.refresh_hash == refresh_hash
                    && stored.record.device_info == device_info
            })
            .map(|stored| stored.record.clone()))
    }

    async fn set_status(&self, token_id: Uuid, status: TokenStatus) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(stored) = inner
            .tokens
            .iter_mut()
            .find(|stored| stored.record.id == token_id)
        {
            stored.record.status = status;
        }
        Ok(())
    }

    async fn set_status_all(
        &self,
        principal_id: Uuid,
        from: TokenStatus,
        to: TokenStatus,
    ) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let mut moved = 0;
        for stored in inner
            .tokens
            .iter_mut()
            .filter(|stored| {
                stored.record.principal_id == principal_id && stored.record.status == from
            })
        {
            stored.record.status = to;
            moved += 1;
        }
        Ok(moved)
    }
}

#[async_trait::async_trait]
impl OtpStore for MemoryAuthStore {
    async fn create(
        &self,
        principal_id: Uuid,
        purpose: OtpPurpose,
        code_hash: &[u8],
        ttl: Duration,
    ) -> Result<Otp, StoreError> {
        let now = self.clock.now();
        let mut inner = self.lock();

        for otp in inner.otps.iter_mut().filter(|otp| {
            otp.principal_id == principal_id
                && otp.purpose == purpose
                && otp.status == OtpStatus::Active
        }) {
            otp.status = OtpStatus::Expired;
        }

        let record = Otp {
            id: Uuid::new_v4(),
            principal_id,
            purpose,
            code_hash: code_hash.to_vec(),
            status: OtpStatus::Active,
            created_at: now,
            expires_at: now + ttl,
        };
        inner.otps.push(record.clone());
        Ok(record)
    }

    async fn latest(
        &self,
        principal_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<Option<Otp>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .otps
            .iter()
            .rev()
            .find(|otp| otp.principal_id == principal_id && otp.purpose == purpose)
            .cloned())
    }

    async fn set_status(&self, otp_id: Uuid, status: OtpStatus) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(otp) = inner.otps.iter_mut().find(|otp| otp.id == otp_id) {
            otp.status = status;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PrincipalDirectory for MemoryAuthStore {
    async fn find_by_identifier(
        &self,
        identifier: &str,
        class: RoleClass,
    ) -> Result<Option<Principal>, StoreError> {
        let inner = self.lock();
        let matches: Vec<&Principal> = inner
            .principals
            .values()
            .filter(|principal| {
                class.matches(principal.role)
                    && (principal.id.to_string() == identifier
                        || principal.phone.as_deref() == Some(identifier))
            })
            .collect();
        match matches.as_slice() {
            [principal] => Ok(Some((*principal).clone())),
            _ => Ok(None),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, StoreError> {
        Ok(self.lock().principals.get(&id).cloned())
    }

    async fn password_hash(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .credentials
            .get(&id)
            .and_then(|row| row.password_hash.clone()))
    }

    async fn replace_password_hash(&self, id: Uuid, digest: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.credentials.entry(id).or_default().password_hash = Some(digest.to_string());
        if let Some(principal) = inner.principals.get_mut(&id) {
            if principal.status == AccountStatus::Pending {
                principal.status = AccountStatus::Activated;
            }
        }
        Ok(())
    }

    async fn pin_hash(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .credentials
            .get(&id)
            .and_then(|row| row.pin_hash.clone()))
    }

    async fn replace_pin_hash(&self, id: Uuid, digest: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.credentials.entry(id).or_default().pin_hash = Some(digest.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActivitySink for MemoryAuthStore {
    async fn record(
        &self,
        principal_id: Uuid,
        kind: ActivityKind,
        detail: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .activity
            .push((principal_id, kind.as_str().to_string(), detail.to_string()));
        Ok(())
    }
}
