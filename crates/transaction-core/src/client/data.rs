use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::error;

use tfm_sip_core::{Message, Request, Response};
use tfm_sip_transport::Transport;

use crate::error::Result;
use crate::timer::{TimerManager, TimerSettings};
use crate::transaction::runner::{AsRefKey, AsRefState, HasTimerManager, HasTransactionEvents};
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, MessageLog, TransactionEvent, TransactionKey,
};

/// Command sender type for transaction
pub type CommandSender = mpsc::Sender<InternalTransactionCommand>;

/// Data shared by a client transaction and its event loop
#[derive(Debug)]
pub struct ClientTransactionData {
    /// Transaction ID
    pub id: TransactionKey,
    /// Current transaction state
    pub state: AtomicTransactionState,
    /// The request this transaction sends; never modified
    pub request: Request,
    /// Last response received
    pub last_response: Mutex<Option<Response>>,
    /// INVITE only: the ACK sent for a non-2xx final response
    pub ack_request: Mutex<Option<Request>>,
    /// Where requests are sent
    pub remote_addr: SocketAddr,
    /// Transport for sending messages
    pub transport: Arc<dyn Transport>,
    /// Whether the transport is reliable (no retransmission timers)
    pub reliable: bool,
    /// Channel for sending events to the transaction user
    pub events_tx: mpsc::Sender<TransactionEvent>,
    /// Channel for sending commands to the transaction's event loop
    pub cmd_tx: CommandSender,
    /// Timer engine shared with the manager
    pub timer_manager: Arc<TimerManager>,
    /// Timer configuration
    pub timer_config: TimerSettings,
    /// Messages sent and received
    pub log: MessageLog,
}

impl ClientTransactionData {
    /// Sends `message` to the remote address and logs it.
    pub(crate) async fn send(&self, message: Message) -> Result<()> {
        self.transport
            .send_message(message.clone(), self.remote_addr)
            .await?;
        self.log.record_sent(&message);
        Ok(())
    }

    /// Reports a send failure to the TU.
    pub(crate) async fn report_transport_error(&self, error: &crate::error::Error) {
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

impl AsRefState for ClientTransactionData {
    fn as_ref_state(&self) -> &AtomicTransactionState {
        &self.state
    }
}

impl AsRefKey for ClientTransactionData {
    fn as_ref_key(&self) -> &TransactionKey {
        &self.id
    }
}

impl HasTransactionEvents for ClientTransactionData {
    fn get_tu_event_sender(&self) -> mpsc::Sender<TransactionEvent> {
        self.events_tx.clone()
    }
}

impl HasTimerManager for ClientTransactionData {
    fn timer_manager(&self) -> &Arc<TimerManager> {
        &self.timer_manager
    }
}
