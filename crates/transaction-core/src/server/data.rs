use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, trace};

use tfm_sip_core::{Message, Request, Response};
use tfm_sip_transport::Transport;

use crate::error::{Error, Result};
use crate::method::cancel::FinalResponseGate;
use crate::timer::{TimerManager, TimerSettings};
use crate::transaction::runner::{AsRefKey, AsRefState, HasTimerManager, HasTransactionEvents};
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, MessageLog, TransactionEvent, TransactionKey,
    TransactionState,
};

/// Data shared by a server transaction and its event loop
#[derive(Debug)]
pub struct ServerTransactionData {
    /// Transaction ID
    pub id: TransactionKey,
    /// Current transaction state
    pub state: AtomicTransactionState,
    /// The request that created the transaction
    pub request: Request,
    /// Last sent response
    pub last_response: Mutex<Option<Response>>,
    /// Where responses are sent (the request's source)
    pub remote_addr: SocketAddr,
    /// Transport for sending messages
    pub transport: Arc<dyn Transport>,
    /// Whether the transport is reliable (no retransmission timers)
    pub reliable: bool,
    /// Channel for sending events to the transaction user
    pub events_tx: mpsc::Sender<TransactionEvent>,
    /// Channel for sending commands to the transaction's event loop
    pub cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    /// Timer engine shared with the manager
    pub timer_manager: Arc<TimerManager>,
    /// Timer configuration
    pub timer_config: TimerSettings,
    /// Messages sent and received
    pub log: MessageLog,
    /// CANCEL versus final response arbitration (INVITE only)
    pub gate: FinalResponseGate,
}

impl ServerTransactionData {
    async fn send(&self, message: Message) -> Result<()> {
        self.transport
            .send_message(message.clone(), self.remote_addr)
            .await?;
        self.log.record_sent(&message);
        Ok(())
    }

    /// Stores `response` as the last response and transmits it. A send
    /// failure is reported to the TU and yields `Terminated`.
    pub(crate) async fn transmit_response(&self, response: Response) -> Option<TransactionState> {
        *self.last_response.lock() = Some(response.clone());
        match self.send(Message::Response(response)).await {
            Ok(()) => None,
            Err(e) => {
                self.report_transport_error(&e).await;
                Some(TransactionState::Terminated)
            }
        }
    }

    /// Retransmits the last response, if one was sent.
    pub(crate) async fn retransmit_last_response(&self) -> Option<TransactionState> {
        let last = self.last_response.lock().clone();
        match last {
            Some(response) => {
                trace!(id=%self.id, status=%response.status(), "Retransmitting last response");
                match self.send(Message::Response(response)).await {
                    Ok(()) => None,
                    Err(e) => {
                        self.report_transport_error(&e).await;
                        Some(TransactionState::Terminated)
                    }
                }
            }
            None => {
                trace!(id=%self.id, "Request retransmission before any response, ignoring");
                None
            }
        }
    }

    async fn report_transport_error(&self, error: &Error) {
        error!(id=%self.id, %error, "Transport failure, terminating transaction");
        let _ = self
            .events_tx
            .send(TransactionEvent::TransportError {
                transaction_id: self.id.clone(),
                error: error.to_string(),
            })
            .await;
    }

    pub(crate) async fn emit(&self, event: TransactionEvent) {
        let _ = self.events_tx.send(event).await;
    }
}

impl AsRefState for ServerTransactionData {
    fn as_ref_state(&self) -> &AtomicTransactionState {
        &self.state
    }
}

impl AsRefKey for ServerTransactionData {
    fn as_ref_key(&self) -> &TransactionKey {
        &self.id
    }
}

impl HasTransactionEvents for ServerTransactionData {
    fn get_tu_event_sender(&self) -> mpsc::Sender<TransactionEvent> {
        self.events_tx.clone()
    }
}

impl HasTimerManager for ServerTransactionData {
    fn timer_manager(&self) -> &Arc<TimerManager> {
        &self.timer_manager
    }
}
