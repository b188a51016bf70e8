use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use tfm_sip_core::{Message, Method, Request, Response};
use tfm_sip_transport::Transport;

use crate::error::{Error, Result};
use crate::method::cancel::FinalResponseGate;
use crate::server::{ServerTransaction, ServerTransactionData};
use crate::timer::{TimerHandle, TimerManager, TimerSettings, TimerType};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::runner::{cancel_timer, run_transaction_loop};
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, MessageLog, Transaction, TransactionEvent, TransactionKey,
    TransactionKind, TransactionState,
};

/// Server non-INVITE transaction (RFC 3261 Section 17.2.2)
#[derive(Debug, Clone)]
pub struct ServerNonInviteTransaction {
    data: Arc<ServerTransactionData>,
}

#[derive(Default, Debug)]
struct ServerNonInviteTimerHandles {
    timer_j: Option<TimerHandle>,
}

#[derive(Debug, Clone, Default)]
struct ServerNonInviteLogic;

#[async_trait]
impl TransactionLogic<ServerTransactionData, ServerNonInviteTimerHandles> for ServerNonInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteServer
    }

    fn initial_state(&self) -> TransactionState {
        TransactionState::Initial
    }

    fn cancel_all_specific_timers(&self, data: &Arc<ServerTransactionData>, timer_handles: &mut ServerNonInviteTimerHandles) {
        cancel_timer(&data.timer_manager, &mut timer_handles.timer_j);
    }

    async fn on_enter_state(
        &self,
        data: &Arc<ServerTransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timer_handles: &mut ServerNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        match new_state {
            TransactionState::Completed => {
                let wait = data.timer_config.wait_time_j;
                if wait.is_zero() {
                    return Ok(Some(TransactionState::Terminated));
                }
                timer_handles.timer_j = Some(data.timer_manager.arm(&data.id, TimerType::J, wait)?);
            }
            TransactionState::Terminated => {
                self.cancel_all_specific_timers(data, timer_handles);
            }
            _ => {
                trace!(id=%data.id, "Entered state {:?}", new_state);
            }
        }
        Ok(None)
    }

    async fn process_message(
        &self,
        data: &Arc<ServerTransactionData>,
        message: Message,
        current_state: TransactionState,
        _timer_handles: &mut ServerNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let request = match message {
            Message::Request(r) => r,
            Message::Response(_) => {
                warn!(id=%data.id, "Server transaction received a Response, ignoring");
                return Ok(None);
            }
        };
        data.log.record_received(&Message::Request(request));

        match current_state {
            TransactionState::Proceeding | TransactionState::Completed => Ok(data.retransmit_last_response().await),
            _ => {
                trace!(id=%data.id, state=?current_state, "Request retransmission absorbed");
                Ok(None)
            }
        }
    }

    async fn send_response(
        &self,
        data: &Arc<ServerTransactionData>,
        response: Response,
        current_state: TransactionState,
        _timer_handles: &mut ServerNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let status = response.status();
        if !matches!(current_state, TransactionState::Trying | TransactionState::Proceeding) {
            let target = if status.is_provisional() {
                TransactionState::Proceeding
            } else {
                TransactionState::Completed
            };
            return Err(Error::invalid_state_transition(self.kind(), current_state, target));
        }

        debug!(id=%data.id, %status, "Sending response");
        if let Some(next) = data.transmit_response(response).await {
            return Ok(Some(next));
        }
        if status.is_provisional() {
            Ok(Some(TransactionState::Proceeding))
        } else {
            Ok(Some(TransactionState::Completed))
        }
    }

    async fn handle_timer(
        &self,
        data: &Arc<ServerTransactionData>,
        timer: TimerType,
        current_state: TransactionState,
        timer_handles: &mut ServerNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        match timer {
            TimerType::J => {
                timer_handles.timer_j = None;
                if current_state == TransactionState::Completed {
                    return Ok(Some(TransactionState::Terminated));
                }
                Ok(None)
            }
            other => {
                warn!(id=%data.id, timer=%other, "Unknown timer triggered for server non-INVITE");
                Ok(None)
            }
        }
    }
}

impl ServerNonInviteTransaction {
    /// Creates the transaction for an incoming non-INVITE request and starts
    /// its event loop. Call [`start`](ServerTransaction::start) to enter Trying.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TransactionKey,
        request: Request,
        remote_addr: SocketAddr,
        transport: Arc<dyn Transport>,
        reliable: bool,
        events_tx: mpsc::Sender<TransactionEvent>,
        timer_manager: Arc<TimerManager>,
        timer_config: TimerSettings,
    ) -> Result<Self> {
        if matches!(request.method, Method::Invite | Method::Ack) {
            return Err(Error::InvalidMessage(format!(
                "server non-INVITE transaction created for {}",
                request.method
            )));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        timer_manager.register_transaction(&id, cmd_tx.clone());

        let logic = Arc::new(ServerNonInviteLogic);
        let data = Arc::new(ServerTransactionData {
            id,
            state: AtomicTransactionState::new(logic.initial_state()),
            request,
            last_response: Mutex::new(None),
            remote_addr,
            transport,
            reliable,
            events_tx,
            cmd_tx,
            timer_manager,
            timer_config,
            log: MessageLog::new(),
            gate: FinalResponseGate::new(),
        });

        tokio::spawn(run_transaction_loop::<_, ServerNonInviteTimerHandles, _>(
            data.clone(),
            logic,
            cmd_rx,
        ));

        Ok(Self { data })
    }
}

#[async_trait]
impl Transaction for ServerNonInviteTransaction {
    fn id(&self) -> &TransactionKey {
        &self.data.id
    }

    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteServer
    }

    fn state(&self) -> TransactionState {
        self.data.state.get()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.data.remote_addr
    }

    fn original_request(&self) -> &Request {
        &self.data.request
    }

    fn last_response(&self) -> Option<Response> {
        self.data.last_response.lock().clone()
    }

    fn message_log(&self) -> &MessageLog {
        &self.data.log
    }

    async fn send_command(&self, cmd: InternalTransactionCommand) -> Result<()> {
        self.data.cmd_tx.send(cmd).await?;
        Ok(())
    }
}

#[async_trait]
impl ServerTransaction for ServerNonInviteTransaction {
    async fn start(&self) -> Result<()> {
        self.data
            .log
            .record_received(&Message::Request(self.data.request.clone()));
        self.send_command(InternalTransactionCommand::TransitionTo(TransactionState::Trying))
            .await
    }

    async fn process_request(&self, request: Request) -> Result<()> {
        self.send_command(InternalTransactionCommand::ProcessMessage(Message::Request(request)))
            .await
    }

    async fn send_response(&self, response: Response) -> Result<()> {
        self.send_command(InternalTransactionCommand::SendResponse(response))
            .await
    }

    fn final_response_gate(&self) -> Option<&FinalResponseGate> {
        None
    }
}
