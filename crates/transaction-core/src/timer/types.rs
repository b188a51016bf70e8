//! Timer names and durations used by the transaction state machines.
//!
//! RFC 3261 groups the transaction timers in three families:
//!
//! - **Retransmission timers** (A, E, G) fire at T1, 2*T1, 4*T1 ... capped at T2
//!   and only run over unreliable transports.
//! - **Transaction timeout timers** (B, F, H) bound the lifetime of a
//!   transaction at 64*T1.
//! - **Wait timers** (D, I, J, K) keep a finished transaction around long
//!   enough to absorb retransmissions. They are zero over reliable transports.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// RFC 3261 transaction timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerType {
    /// INVITE client: request retransmission
    A,
    /// INVITE client: transaction timeout
    B,
    /// INVITE client: wait for response retransmissions in Completed
    D,
    /// Non-INVITE client: request retransmission
    E,
    /// Non-INVITE client: transaction timeout
    F,
    /// INVITE server: final response retransmission
    G,
    /// INVITE server: wait for ACK
    H,
    /// INVITE server: wait for ACK retransmissions in Confirmed
    I,
    /// Non-INVITE server: wait for request retransmissions in Completed
    J,
    /// Non-INVITE client: wait for response retransmissions in Completed
    K,
}

impl TimerType {
    /// True for the timers that drive retransmissions.
    pub fn is_retransmission(&self) -> bool {
        matches!(self, TimerType::A | TimerType::E | TimerType::G)
    }
}

impl fmt::Display for TimerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerType::A => "A",
            TimerType::B => "B",
            TimerType::D => "D",
            TimerType::E => "E",
            TimerType::F => "F",
            TimerType::G => "G",
            TimerType::H => "H",
            TimerType::I => "I",
            TimerType::J => "J",
            TimerType::K => "K",
        };
        f.write_str(name)
    }
}

/// Configuration for SIP transaction timer durations, based on RFC 3261.
///
/// # Example: Custom Timer Settings
///
/// ```rust
/// use std::time::Duration;
/// use tfm_transaction_core::timer::TimerSettings;
///
/// // Default settings (RFC 3261 recommended values)
/// let default_settings = TimerSettings::default();
/// assert_eq!(default_settings.t1, Duration::from_millis(500));
/// assert_eq!(default_settings.t2, Duration::from_secs(4));
///
/// // Strict RFC behaviour: stop retransmitting INVITE once a 1xx arrives
/// let strict = TimerSettings::default().with_invite_retransmission_in_proceeding(false);
/// assert!(!strict.retransmit_invite_in_proceeding);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// **T1: RTT estimate (Default: 500 ms)**
    /// Initial retransmission interval for Timers A, E and G.
    pub t1: Duration,

    /// **T2: Maximum retransmission interval (Default: 4 s)**
    pub t2: Duration,

    /// **T4: Maximum time a message stays in the network (Default: 5 s)**
    pub t4: Duration,

    /// **Transaction timeout (Default: 32 s, i.e. 64 * T1)**
    /// Duration of Timers B and F.
    pub transaction_timeout: Duration,

    /// **Timer D (Default: 32 s)**
    pub wait_time_d: Duration,

    /// **Timer H (Default: 32 s, i.e. 64 * T1)**
    pub wait_time_h: Duration,

    /// **Timer I (Default: 5 s, i.e. T4)**
    pub wait_time_i: Duration,

    /// **Timer J (Default: 32 s, i.e. 64 * T1)**
    pub wait_time_j: Duration,

    /// **Timer K (Default: 5 s, i.e. T4)**
    pub wait_time_k: Duration,

    /// Upper bound on request retransmissions (Timers A and E).
    /// `None` lets the transaction timeout be the only bound.
    pub max_retransmissions: Option<u32>,

    /// Keep retransmitting an INVITE at T2 after a provisional response has
    /// been received over an unreliable transport. `false` gives strict
    /// RFC 3261 behaviour (Timer A stops in Proceeding).
    pub retransmit_invite_in_proceeding: bool,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            transaction_timeout: Duration::from_secs(32), // 64 * T1
            wait_time_d: Duration::from_secs(32),
            wait_time_h: Duration::from_secs(32), // 64 * T1
            wait_time_i: Duration::from_secs(5),  // T4
            wait_time_j: Duration::from_secs(32), // 64 * T1
            wait_time_k: Duration::from_secs(5),  // T4
            max_retransmissions: None,
            retransmit_invite_in_proceeding: true,
        }
    }
}

impl TimerSettings {
    /// Settings derived from a T1 value: every 64*T1 timer follows T1.
    pub fn from_t1(t1: Duration) -> Self {
        let defaults = Self::default();
        Self {
            t1,
            transaction_timeout: t1 * 64,
            wait_time_h: t1 * 64,
            wait_time_j: t1 * 64,
            ..defaults
        }
    }

    /// Short timers for tests that run against a real clock.
    pub fn fast_for_tests() -> Self {
        Self {
            t1: Duration::from_millis(10),
            t2: Duration::from_millis(80),
            t4: Duration::from_millis(100),
            transaction_timeout: Duration::from_millis(640),
            wait_time_d: Duration::from_millis(640),
            wait_time_h: Duration::from_millis(640),
            wait_time_i: Duration::from_millis(100),
            wait_time_j: Duration::from_millis(640),
            wait_time_k: Duration::from_millis(100),
            max_retransmissions: None,
            retransmit_invite_in_proceeding: true,
        }
    }

    /// The same settings for a reliable transport: wait timers collapse to zero.
    pub fn for_reliable(&self) -> Self {
        Self {
            wait_time_d: Duration::ZERO,
            wait_time_i: Duration::ZERO,
            wait_time_j: Duration::ZERO,
            wait_time_k: Duration::ZERO,
            ..*self
        }
    }

    pub fn with_t1(mut self, t1: Duration) -> Self {
        self.t1 = t1;
        self
    }

    pub fn with_t2(mut self, t2: Duration) -> Self {
        self.t2 = t2;
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn with_max_retransmissions(mut self, max: u32) -> Self {
        self.max_retransmissions = Some(max);
        self
    }

    pub fn with_invite_retransmission_in_proceeding(mut self, enabled: bool) -> Self {
        self.retransmit_invite_in_proceeding = enabled;
        self
    }

    /// Wait before the retransmission that follows retransmission number `n`
    /// (`n = 0` is the wait after the initial send): `min(T1 * 2^n, T2)`.
    pub fn retransmit_interval(&self, n: u32) -> Duration {
        let factor = 1u32.checked_shl(n.min(31)).unwrap_or(u32::MAX);
        self.t1.saturating_mul(factor).min(self.t2)
    }

    /// Offsets, measured from the initial send, of every retransmission that
    /// happens strictly before `ceiling`, honouring `max_retransmissions`.
    pub fn retransmission_schedule(&self, ceiling: Duration) -> Vec<Duration> {
        let mut schedule = Vec::new();
        if self.t1.is_zero() {
            return schedule;
        }
        let mut offset = Duration::ZERO;
        let mut n = 0;
        loop {
            if let Some(max) = self.max_retransmissions {
                if n >= max {
                    break;
                }
            }
            offset += self.retransmit_interval(n);
            if offset >= ceiling {
                break;
            }
            schedule.push(offset);
            n += 1;
        }
        schedule
    }
}
