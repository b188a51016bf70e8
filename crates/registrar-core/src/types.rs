//! Binding and configuration types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use tfm_sip_core::Uri;

/// Expiration used when neither the contact nor the request carries one.
pub const DEFAULT_EXPIRES: u32 = 3600;

/// Registrar settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrarConfig {
    pub default_expires: u32,
    /// Contacts whose user part is longer than this are refused with a 500
    pub max_contact_user_len: usize,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            default_expires: DEFAULT_EXPIRES,
            max_contact_user_len: 1024,
        }
    }
}

/// One contact registered for an address-of-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub contact: Uri,
    /// Expiration granted when the binding was last refreshed, in seconds
    pub expires: u32,
    pub expires_at: Instant,
    pub registered_at: DateTime<Utc>,
}

impl Binding {
    pub fn new(contact: Uri, expires: u32) -> Self {
        Self {
            contact,
            expires,
            expires_at: Instant::now() + Duration::from_secs(u64::from(expires)),
            registered_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Seconds left, rounded down.
    pub fn remaining(&self) -> u32 {
        let left = self.expires_at.saturating_duration_since(Instant::now());
        u32::try_from(left.as_secs()).unwrap_or(u32::MAX)
    }
}
