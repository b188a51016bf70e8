use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::timer::{TimerHandle, TimerManager};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, TransactionEvent, TransactionKey, TransactionState,
};

/// The event loop shared by all transaction kinds.
///
/// Commands are processed strictly one at a time, so the logic never sees
/// two inputs concurrently. When the transaction reaches `Terminated` the loop
/// cancels every timer, emits `TransactionTerminated` once and returns.
pub async fn run_transaction_loop<D, TH, L>(
    data: Arc<D>,
    logic: Arc<L>,
    mut cmd_rx: mpsc::Receiver<InternalTransactionCommand>,
) where
    D: AsRefState + AsRefKey + HasTransactionEvents + HasTimerManager + Send + Sync + 'static,
    TH: Default + Send + Sync + 'static,
    L: TransactionLogic<D, TH>,
{
    let mut timer_handles = TH::default();
    let tx_id = data.as_ref_key().clone();

    debug!(id=%tx_id, kind=%logic.kind(), state=?data.as_ref_state().get(), "Transaction loop starting");

    while let Some(command) = cmd_rx.recv().await {
        let current_state = data.as_ref_state().get();

        let outcome = match command {
            InternalTransactionCommand::TransitionTo(requested) => Ok(Some(requested)),
            InternalTransactionCommand::ProcessMessage(message) => {
                trace!(id=%tx_id, message=%message.short_description(), state=?current_state, "Processing message");
                logic
                    .process_message(&data, message, current_state, &mut timer_handles)
                    .await
            }
            InternalTransactionCommand::Timer(handle) => {
                if !data.timer_manager().take_fired(&handle) {
                    trace!(id=%tx_id, timer=%handle.timer_type(), "Ignoring firing of a cancelled timer");
                    continue;
                }
                debug!(id=%tx_id, timer=%handle.timer_type(), state=?current_state, "Timer fired");
                logic
                    .handle_timer(&data, handle.timer_type(), current_state, &mut timer_handles)
                    .await
            }
            InternalTransactionCommand::SendResponse(response) => {
                logic
                    .send_response(&data, response, current_state, &mut timer_handles)
                    .await
            }
            InternalTransactionCommand::Terminate => {
                debug!(id=%tx_id, "Received explicit termination command");
                Ok(Some(TransactionState::Terminated))
            }
        };

        match outcome {
            Ok(Some(next_state)) => {
                apply_transition(&data, logic.as_ref(), &mut timer_handles, next_state).await;
            }
            Ok(None) => {}
            Err(e) => {
                error!(id=%tx_id, error=%e, state=?current_state, "Error in transaction logic");
                let _ = data
                    .get_tu_event_sender()
                    .send(TransactionEvent::Error {
                        transaction_id: Some(tx_id.clone()),
                        error: e.to_string(),
                    })
                    .await;
            }
        }

        if data.as_ref_state().get() == TransactionState::Terminated {
            debug!(id=%tx_id, "Transaction reached Terminated state, stopping event loop");
            break;
        }
    }

    logic.cancel_all_specific_timers(&data, &mut timer_handles);
    data.timer_manager().cancel_all(&tx_id);

    if data.as_ref_state().get() == TransactionState::Terminated {
        let _ = data
            .get_tu_event_sender()
            .send(TransactionEvent::TransactionTerminated {
                transaction_id: tx_id.clone(),
            })
            .await;
    }
    debug!(id=%tx_id, "Transaction loop ended");
}

/// Applies `requested` and any transition `on_enter_state` chains after it.
async fn apply_transition<D, TH, L>(data: &Arc<D>, logic: &L, timer_handles: &mut TH, requested: TransactionState)
where
    D: AsRefState + AsRefKey + HasTransactionEvents + HasTimerManager + Send + Sync + 'static,
    TH: Default + Send + Sync + 'static,
    L: TransactionLogic<D, TH>,
{
    let tx_id = data.as_ref_key();
    let mut next = Some(requested);

    while let Some(new_state) = next.take() {
        let current_state = data.as_ref_state().get();
        if current_state == new_state {
            trace!(id=%tx_id, state=?current_state, "Already in requested state");
            break;
        }

        if let Err(e) = AtomicTransactionState::validate_transition(logic.kind(), current_state, new_state) {
            error!(id=%tx_id, error=%e, "Rejected state transition");
            let _ = data
                .get_tu_event_sender()
                .send(TransactionEvent::Error {
                    transaction_id: Some(tx_id.clone()),
                    error: e.to_string(),
                })
                .await;
            break;
        }

        let previous_state = data.as_ref_state().set(new_state);
        debug!(id=%tx_id, "State transition: {:?} -> {:?}", previous_state, new_state);

        let _ = data
            .get_tu_event_sender()
            .send(TransactionEvent::StateChanged {
                transaction_id: tx_id.clone(),
                previous_state,
                new_state,
            })
            .await;

        match logic.on_enter_state(data, new_state, previous_state, timer_handles).await {
            Ok(chained) => next = chained,
            Err(e) => {
                error!(id=%tx_id, error=%e, "Error entering state {:?}", new_state);
                let _ = data
                    .get_tu_event_sender()
                    .send(TransactionEvent::Error {
                        transaction_id: Some(tx_id.clone()),
                        error: format!("Error entering state {:?}: {}", new_state, e),
                    })
                    .await;
            }
        }
    }
}

/// Cancels the timer held in `slot`, if any.
pub fn cancel_timer(timers: &TimerManager, slot: &mut Option<TimerHandle>) {
    if let Some(handle) = slot.take() {
        timers.cancel(&handle);
    }
}

pub trait AsRefState {
    fn as_ref_state(&self) -> &AtomicTransactionState;
}

pub trait AsRefKey {
    fn as_ref_key(&self) -> &TransactionKey;
}

pub trait HasTransactionEvents {
    fn get_tu_event_sender(&self) -> mpsc::Sender<TransactionEvent>;
}

pub trait HasTimerManager {
    fn timer_manager(&self) -> &Arc<TimerManager>;
}
