//! User agent configuration

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use tfm_sip_core::Uri;
use tfm_transaction_core::TransactionManagerConfig;

/// Configuration of a simulated user agent.
///
/// ```
/// use tfm_client_core::UserAgentConfig;
///
/// let config = UserAgentConfig::new("sip:jason@example.com".parse().unwrap(), "127.0.0.1:5060".parse().unwrap())
///     .with_auto_trying(true)
///     .with_auto_digest_retry(true);
/// assert!(config.auto_trying);
/// assert!(!config.auto_cancel_487);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgentConfig {
    /// Address-of-record used in From/To and as the registration key
    pub aor: Uri,
    /// Contact advertised in REGISTER and INVITE; derived from the local
    /// address when unset
    pub contact: Option<Uri>,
    /// Outbound proxy every out-of-dialog request goes to
    pub proxy: SocketAddr,
    /// User name presented when answering a challenge; defaults to the AOR user
    pub credentials: Option<String>,
    /// Answer 401/407 challenges without being told to
    pub auto_digest_retry: bool,
    /// Send 100 Trying for every incoming INVITE
    pub auto_trying: bool,
    /// Answer a cancelled INVITE with 487
    pub auto_cancel_487: bool,
    pub transaction: TransactionManagerConfig,
}

impl UserAgentConfig {
    pub fn new(aor: Uri, proxy: SocketAddr) -> Self {
        Self {
            aor,
            contact: None,
            proxy,
            credentials: None,
            auto_digest_retry: false,
            auto_trying: false,
            auto_cancel_487: false,
            transaction: TransactionManagerConfig::default(),
        }
    }

    pub fn with_contact(mut self, contact: Uri) -> Self {
        self.contact = Some(contact);
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>) -> Self {
        self.credentials = Some(username.into());
        self
    }

    pub fn with_auto_digest_retry(mut self, enabled: bool) -> Self {
        self.auto_digest_retry = enabled;
        self
    }

    pub fn with_auto_trying(mut self, enabled: bool) -> Self {
        self.auto_trying = enabled;
        self
    }

    pub fn with_auto_cancel_487(mut self, enabled: bool) -> Self {
        self.auto_cancel_487 = enabled;
        self
    }

    pub fn with_transaction_config(mut self, config: TransactionManagerConfig) -> Self {
        self.transaction = config;
        self
    }

    /// Name presented in credentials.
    pub fn username(&self) -> &str {
        self.credentials
            .as_deref()
            .or(self.aor.user.as_deref())
            .unwrap_or("anonymous")
    }
}
