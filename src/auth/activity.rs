//! Audit/activity sink consumed fire-and-forget by the managers.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::error::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityKind {
    Login,
    Logout,
    LogoutAll,
    PasswordReset,
    PinReset,
}

impl ActivityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::LogoutAll => "LOGOUT_ALL",
            Self::PasswordReset => "PASSWORD_RESET",
            Self::PinReset => "PIN_RESET",
        }
    }
}

#[async_trait::async_trait]
pub trait ActivitySink: Send + Sync {
    async fn record(
        &self,
        principal_id: Uuid,
        kind: ActivityKind,
        detail: &str,
    ) -> Result<(), StoreError>;
}

/// Fallback sink that only emits a trace event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

#[async_trait::async_trait]
impl ActivitySink for TracingSink {
    async fn record(
        &self,
        principal_id: Uuid,
        kind: ActivityKind,
        detail: &str,
    ) -> Result<(), StoreError> {
        debug!(%principal_id, kind = kind.as_str(), detail, "activity");
        Ok(())
    }
}

/// Record without blocking the caller; a failed audit write is logged and
/// never surfaced to the request.
pub(crate) fn record_detached(
    sink: Arc<dyn ActivitySink>,
    principal_id: Uuid,
    kind: ActivityKind,
    detail: String,
) {
    tokio::spawn(async move {
        if let Err(err) = sink.record(principal_id, kind, &detail).await {
            warn!(%principal_id, kind = kind.as_str(), "failed to record activity: {err:#}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_have_wire_names() {
        assert_eq!(ActivityKind::Login.as_str(), "LOGIN");
        assert_eq!(ActivityKind::LogoutAll.as_str(), "LOGOUT_ALL");
        assert_eq!(ActivityKind::PasswordReset.as_str(), "PASSWORD_RESET");
    }

    #[tokio::test]
    async fn tracing_sink_accepts_events() {
        let sink = TracingSink;
        let outcome = sink
            .record(Uuid::new_v4(), ActivityKind::Login, "device=test")
            .await;
        assert!(outcome.is_ok());
    }
}
