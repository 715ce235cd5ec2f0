//! Tunables for the session and passcode lifecycle.

use chrono::Duration;

use super::role::Role;

/// At most this many ACTIVE tokens per principal.
const DEFAULT_DEVICE_CAP: usize = 2;
/// Administrator sessions are short-lived.
const DEFAULT_ADMIN_SESSION_TTL_HOURS: i64 = 24;
/// Farmer/consumer sessions last tens of days.
const DEFAULT_MEMBER_SESSION_TTL_DAYS: i64 = 40;
const DEFAULT_OTP_TTL_MINUTES: i64 = 10;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    device_cap: usize,
    admin_session_ttl: Duration,
    member_session_ttl: Duration,
    otp_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            device_cap: DEFAULT_DEVICE_CAP,
            admin_session_ttl: Duration::hours(DEFAULT_ADMIN_SESSION_TTL_HOURS),
            member_session_ttl: Duration::days(DEFAULT_MEMBER_SESSION_TTL_DAYS),
            otp_ttl: Duration::minutes(DEFAULT_OTP_TTL_MINUTES),
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_device_cap(mut self, cap: usize) -> Self {
        self.device_cap = cap;
        self
    }

    #[must_use]
    pub fn with_admin_session_ttl(mut self, ttl: Duration) -> Self {
        self.admin_session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_member_session_ttl(mut self, ttl: Duration) -> Self {
        self.member_session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_otp_ttl(mut self, ttl: Duration) -> Self {
        self.otp_ttl = ttl;
        self
    }

    #[must_use]
    pub fn device_cap(&self) -> usize {
        self.device_cap
    }

    /// TTL for a freshly issued session, by role.
    #[must_use]
    pub fn session_ttl(&self, role: Role) -> Duration {
        if role.is_admin() {
            self.admin_session_ttl
        } else {
            self.member_session_ttl
        }
    }

    #[must_use]
    pub fn otp_ttl(&self) -> Duration {
        self.otp_ttl
    }
}
