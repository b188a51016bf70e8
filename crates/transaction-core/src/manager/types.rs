use serde::{Deserialize, Serialize};

use tfm_sip_core::MessageLimits;

use crate::timer::TimerSettings;

/// Default capacity of the TU event channels
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Configuration of a [`TransactionManager`](super::TransactionManager).
///
/// ```rust
/// use tfm_transaction_core::{TimerSettings, TransactionManagerConfig};
///
/// let config = TransactionManagerConfig::default()
///     .with_timers(TimerSettings::fast_for_tests())
///     .with_reliable_transport(true);
/// assert!(config.reliable_transport);
/// assert_eq!(config.event_capacity, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionManagerConfig {
    /// Timer durations; derived to zero drain timers when the transport is reliable
    pub timers: TimerSettings,
    /// Treat the transport as reliable even if it does not say so
    pub reliable_transport: bool,
    /// Capacity of the TU event channel and of each subscriber channel
    pub event_capacity: usize,
    /// Size limits the TU applies to incoming requests
    pub message_limits: MessageLimits,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            timers: TimerSettings::default(),
            reliable_transport: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            message_limits: MessageLimits::default(),
        }
    }
}

impl TransactionManagerConfig {
    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_reliable_transport(mut self, reliable: bool) -> Self {
        self.reliable_transport = reliable;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_message_limits(mut self, limits: MessageLimits) -> Self {
        self.message_limits = limits;
        self
    }
}
