//! Proxy configuration

use serde::{Deserialize, Serialize};

use tfm_registrar_core::RegistrarConfig;
use tfm_sip_core::MessageLimits;
use tfm_transaction_core::TransactionManagerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Realm named in Proxy-Authenticate challenges
    pub realm: String,
    /// Challenge requests that carry no credentials with 407
    pub challenge_requests: bool,
    /// Answer every INVITE with 100 Trying before anything else
    pub send_100_trying: bool,
    /// Send 408 upstream when a forwarded non-INVITE request times out.
    /// Off by default: the upstream transaction times out on its own.
    pub forward_non_invite_timeouts: bool,
    pub message_limits: MessageLimits,
    pub registrar: RegistrarConfig,
    pub transaction: TransactionManagerConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            realm: "tfm".to_string(),
            challenge_requests: true,
            send_100_trying: true,
            forward_non_invite_timeouts: false,
            message_limits: MessageLimits::default(),
            registrar: RegistrarConfig::default(),
            transaction: TransactionManagerConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn with_challenges(mut self, enabled: bool) -> Self {
        self.challenge_requests = enabled;
        self
    }

    pub fn with_100_trying(mut self, enabled: bool) -> Self {
        self.send_100_trying = enabled;
        self
    }

    pub fn with_forward_non_invite_timeouts(mut self, enabled: bool) -> Self {
        self.forward_non_invite_timeouts = enabled;
        self
    }

    pub fn with_message_limits(mut self, limits: MessageLimits) -> Self {
        self.message_limits = limits;
        self
    }

    pub fn with_registrar(mut self, registrar: RegistrarConfig) -> Self {
        self.registrar = registrar;
        self
    }
}
