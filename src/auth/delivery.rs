//! Out-of-band delivery boundary for one-time passcodes.
//!
//! The notification subsystem owns transport; this side only hands over an
//! address and a raw code. Implementations must not log the code.

use std::sync::Mutex;

use super::error::StoreError;

#[async_trait::async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn deliver(&self, address: &str, code: &str) -> Result<(), StoreError>;
}

/// Captures deliveries in memory; used by tests and local development.
#[derive(Debug, Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingDelivery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain every captured (address, code) pair.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    pub fn drain(&self) -> Vec<(String, String)> {
        let mut sent = self.sent.lock().expect("delivery lock poisoned");
        std::mem::take(&mut *sent)
    }
}

#[async_trait::async_trait]
impl OtpDelivery for RecordingDelivery {
    async fn deliver(&self, address: &str, code: &str) -> Result<(), StoreError> {
        let mut sent = self.sent.lock().expect("delivery lock poisoned");
        sent.push((address.to_string(), code.to_string()));
        Ok(())
    }
}
