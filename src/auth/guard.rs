//! Request guard: maps a presented token to a verified principal and role.
//!
//! Strictly a read path. No implicit renewal, no status writes, so the
//! check stays cheap and safe to run on every protected request.

use std::sync::Arc;

use uuid::Uuid;

use super::clock::Clock;
use super::error::AuthError;
use super::principal::{AccountStatus, Principal, PrincipalDirectory};
use super::role::{requires, Role};
use super::token::{SessionToken, TokenStatus, TokenStore};

/// A verified identity attached to one request.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub principal: Principal,
    pub token_id: Uuid,
}

impl AuthContext {
    /// Role authorization, layered on top of the authentication itself.
    pub fn require(&self, allowed: &[Role]) -> Result<(), AuthError> {
        requires(self.principal.role, allowed)
    }
}

pub struct Authenticator {
    tokens: Arc<dyn TokenStore>,
    directory: Arc<dyn PrincipalDirectory>,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    #[must_use]
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        directory: Arc<dyn PrincipalDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            directory,
            clock,
        }
    }

    /// Resolve a presented token, optionally pinned to a claimed principal.
    ///
    /// Every failure collapses into [`AuthError::InvalidToken`] (or an
    /// account-state denial) so callers cannot probe whether a session row
    /// exists but is merely expired.
    pub async fn authenticate(
        &self,
        token: &str,
        claimed_principal: Option<Uuid>,
    ) -> Result<AuthContext, AuthError> {
        let record = self
            .tokens
            .find_by_token(token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if let Some(claimed) = claimed_principal {
            if record.principal_id != claimed {
                return Err(AuthError::InvalidToken);
            }
        }

        if let Err(err) = self.check_usable(&record) {
            // TokenExpired is actionable only on the resume path; here it
            // must read the same as any other bad token.
            return Err(match err {
                AuthError::TokenExpired => AuthError::InvalidToken,
                other => other,
            });
        }

        let principal = self
            .directory
            .find_by_id(record.principal_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if principal.status != AccountStatus::Activated {
            return Err(AuthError::AccountNotActive);
        }

        Ok(AuthContext {
            principal,
            token_id: record.id,
        })
    }

    fn check_usable(&self, record: &SessionToken) -> Result<(), AuthError> {
        if record.status != TokenStatus::Active {
            return Err(AuthError::InvalidToken);
        }
        if self.clock.now() >= record.expires_at {
            return Err(AuthError::TokenExpired);
        }
        Ok(())
    }
}
