//! Timer engine for SIP transactions.
//!
//! - [`TimerType`]: the RFC 3261 timers A through K.
//! - [`TimerSettings`]: configured durations (T1, T2, T4 and the derived timers).
//! - [`TimerManager`]: arms timers and delivers their firings to the owning transaction.

pub mod manager;
pub mod types;

pub use manager::{TimerHandle, TimerManager};
pub use types::{TimerSettings, TimerType};
