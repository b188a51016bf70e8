use std::sync::Arc;

use async_trait::async_trait;

use tfm_sip_core::{Message, Response};

use crate::error::{Error, Result};
use crate::timer::TimerType;
use crate::transaction::{TransactionKind, TransactionState};

/// State-specific behaviour of one kind of transaction.
///
/// The generic runner ([`run_transaction_loop`](super::runner::run_transaction_loop))
/// owns the event loop, validates and applies transitions and delivers fired
/// timers; an implementor only decides what each input means in each state.
///
/// - `D` is the shared transaction data (`ClientTransactionData`, `ServerTransactionData`).
/// - `TH` holds the live timer handles of this kind of transaction.
///
/// Every handler returns the state to move to, if any. The runner applies
/// that transition before taking the next command.
#[async_trait]
pub trait TransactionLogic<D, TH>: Send + Sync + 'static
where
    D: Send + Sync + 'static,
    TH: Default + Send + Sync + 'static,
{
    fn kind(&self) -> TransactionKind;

    fn initial_state(&self) -> TransactionState;

    /// Handles a message from the network that matched this transaction.
    async fn process_message(
        &self,
        data: &Arc<D>,
        message: Message,
        current_state: TransactionState,
        timer_handles: &mut TH,
    ) -> Result<Option<TransactionState>>;

    /// Handles a live timer of this transaction. Firings of cancelled timers
    /// are filtered out by the runner and never reach this method.
    async fn handle_timer(
        &self,
        data: &Arc<D>,
        timer: TimerType,
        current_state: TransactionState,
        timer_handles: &mut TH,
    ) -> Result<Option<TransactionState>>;

    /// Transmits a response from the TU. Only server transactions send responses.
    async fn send_response(
        &self,
        _data: &Arc<D>,
        _response: Response,
        current_state: TransactionState,
        _timer_handles: &mut TH,
    ) -> Result<Option<TransactionState>> {
        Err(Error::Other(format!(
            "{} transaction cannot send responses (state {:?})",
            self.kind(),
            current_state
        )))
    }

    /// Called after the transaction entered `new_state`: sends what the state
    /// requires, arms its timers and cancels the ones that no longer apply.
    async fn on_enter_state(
        &self,
        data: &Arc<D>,
        new_state: TransactionState,
        previous_state: TransactionState,
        timer_handles: &mut TH,
    ) -> Result<Option<TransactionState>>;

    /// Cancels every timer held in `timer_handles`.
    fn cancel_all_specific_timers(&self, data: &Arc<D>, timer_handles: &mut TH);
}
