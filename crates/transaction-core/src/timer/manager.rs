//! Arms, cancels and delivers transaction timers.
//!
//! Every arm spawns a tokio sleep task and records a live handle. When the
//! sleep completes the task queues `InternalTransactionCommand::Timer` on the
//! owning transaction's command channel. The transaction loop asks
//! [`TimerManager::take_fired`] before acting on it, which consumes the live
//! handle. A handle cancelled before that point is no longer live, so a
//! cancellation always wins over a firing that is already queued, and each
//! arm is acted on at most once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::timer::TimerType;
use crate::transaction::{InternalTransactionCommand, TransactionKey};

/// Identifies one arm of one timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
    transaction_id: TransactionKey,
    timer_type: TimerType,
}

impl TimerHandle {
    pub fn transaction_id(&self) -> &TransactionKey {
        &self.transaction_id
    }

    pub fn timer_type(&self) -> TimerType {
        self.timer_type
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer {}#{} for {}", self.timer_type, self.id, self.transaction_id)
    }
}

struct LiveTimer {
    transaction_id: TransactionKey,
    task: Option<JoinHandle<()>>,
}

/// Timer engine shared by all transactions of a manager.
pub struct TimerManager {
    next_id: AtomicU64,
    live: DashMap<u64, LiveTimer>,
    registrations: DashMap<TransactionKey, mpsc::Sender<InternalTransactionCommand>>,
}

impl fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerManager")
            .field("live", &self.live.len())
            .field("transactions", &self.registrations.len())
            .finish()
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerManager {
    pub fn new() -> Self {
        TimerManager {
            next_id: AtomicU64::new(1),
            live: DashMap::new(),
            registrations: DashMap::new(),
        }
    }

    /// Registers the command channel fired timers of `transaction_id` are delivered to.
    pub fn register_transaction(&self, transaction_id: &TransactionKey, cmd_tx: mpsc::Sender<InternalTransactionCommand>) {
        self.registrations.insert(transaction_id.clone(), cmd_tx);
    }

    /// Arms `timer_type` for `transaction_id` to fire after `duration`.
    pub fn arm(&self, transaction_id: &TransactionKey, timer_type: TimerType, duration: Duration) -> Result<TimerHandle> {
        let cmd_tx = self
            .registrations
            .get(transaction_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.clone()))?;

        let handle = TimerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            transaction_id: transaction_id.clone(),
            timer_type,
        };

        // Live before the task exists, so a zero-length timer cannot outrun it
        self.live.insert(
            handle.id,
            LiveTimer {
                transaction_id: transaction_id.clone(),
                task: None,
            },
        );

        let fired = handle.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(id=%fired.transaction_id, timer=%fired.timer_type, "Timer fired");
            let _ = cmd_tx.send(InternalTransactionCommand::Timer(fired)).await;
        });

        match self.live.get_mut(&handle.id) {
            Some(mut entry) => entry.task = Some(task),
            None => task.abort(),
        }
        trace!(id=%transaction_id, timer=%timer_type, ?duration, "Armed timer");
        Ok(handle)
    }

    /// Cancels `handle`. Returns false when it already fired or was cancelled.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        match self.live.remove(&handle.id) {
            Some((_, timer)) => {
                if let Some(task) = timer.task {
                    task.abort();
                }
                trace!(id=%handle.transaction_id, timer=%handle.timer_type, "Cancelled timer");
                true
            }
            None => false,
        }
    }

    /// Cancels `handle` and arms the same timer again with `duration`.
    pub fn rearm(&self, handle: &TimerHandle, duration: Duration) -> Result<TimerHandle> {
        self.cancel(handle);
        self.arm(&handle.transaction_id, handle.timer_type, duration)
    }

    /// Consumes a fired handle. Returns false for a handle that was cancelled
    /// (or already consumed); the caller must then ignore the firing.
    pub fn take_fired(&self, handle: &TimerHandle) -> bool {
        self.live.remove(&handle.id).is_some()
    }

    pub fn is_live(&self, handle: &TimerHandle) -> bool {
        self.live.contains_key(&handle.id)
    }

    /// Cancels every timer of `transaction_id` and forgets its command channel.
    pub fn cancel_all(&self, transaction_id: &TransactionKey) -> usize {
        let ids: Vec<u64> = self
            .live
            .iter()
            .filter(|entry| &entry.value().transaction_id == transaction_id)
            .map(|entry| *entry.key())
            .collect();

        let mut cancelled = 0;
        for id in ids {
            if let Some((_, timer)) = self.live.remove(&id) {
                if let Some(task) = timer.task {
                    task.abort();
                }
                cancelled += 1;
            }
        }
        if self.registrations.remove(transaction_id).is_none() && cancelled > 0 {
            warn!(id=%transaction_id, "Cancelled timers of an unregistered transaction");
        }
        trace!(id=%transaction_id, cancelled, "Cancelled all timers");
        cancelled
    }

    /// Number of live timers of `transaction_id`.
    pub fn active_timers(&self, transaction_id: &TransactionKey) -> usize {
        self.live
            .iter()
            .filter(|entry| &entry.value().transaction_id == transaction_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfm_sip_core::Method;

    fn key(name: &str) -> TransactionKey {
        TransactionKey::new(format!("z9hG4bK-{}", name), Method::Invite, false)
    }

    async fn next_timer(rx: &mut mpsc::Receiver<InternalTransactionCommand>) -> TimerHandle {
        match rx.recv().await {
            Some(InternalTransactionCommand::Timer(handle)) => handle,
            other => panic!("expected timer command, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_and_is_consumed() {
        let timers = TimerManager::new();
        let (tx, mut rx) = mpsc::channel(8);
        let id = key("fire");
        timers.register_transaction(&id, tx);

        let handle = timers.arm(&id, TimerType::E, Duration::from_millis(500)).unwrap();
        let fired = next_timer(&mut rx).await;
        assert_eq!(fired, handle);
        assert!(timers.take_fired(&fired));
        assert!(!timers.take_fired(&fired));
        assert_eq!(timers.active_timers(&id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_dispatch_wins() {
        let timers = TimerManager::new();
        let (tx, mut rx) = mpsc::channel(8);
        let id = key("race");
        timers.register_transaction(&id, tx);

        let handle = timers.arm(&id, TimerType::B, Duration::ZERO).unwrap();
        // Let the sleep complete and the command get queued
        let fired = next_timer(&mut rx).await;
        assert!(timers.cancel(&handle));
        assert!(!timers.take_fired(&fired));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_previous_arm() {
        let timers = TimerManager::new();
        let (tx, mut rx) = mpsc::channel(8);
        let id = key("rearm");
        timers.register_transaction(&id, tx);

        let first = timers.arm(&id, TimerType::A, Duration::from_millis(500)).unwrap();
        let second = timers.rearm(&first, Duration::from_millis(1000)).unwrap();
        assert!(!timers.is_live(&first));
        assert_eq!(timers.active_timers(&id), 1);

        let fired = next_timer(&mut rx).await;
        assert_eq!(fired, second);
        assert!(timers.take_fired(&fired));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_silences_transaction() {
        let timers = TimerManager::new();
        let (tx, mut rx) = mpsc::channel(8);
        let id = key("all");
        timers.register_transaction(&id, tx);

        timers.arm(&id, TimerType::A, Duration::from_millis(10)).unwrap();
        timers.arm(&id, TimerType::B, Duration::from_millis(20)).unwrap();
        assert_eq!(timers.cancel_all(&id), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(timers.arm(&id, TimerType::A, Duration::from_millis(10)).is_err());
    }
}
