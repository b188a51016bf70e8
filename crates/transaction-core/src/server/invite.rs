use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

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

/// Server INVITE transaction (RFC 3261 Section 17.2.1)
///
/// Every final response, 2xx included, moves the transaction to Completed
/// where it is retransmitted on Timer G until the ACK arrives.
#[derive(Debug, Clone)]
pub struct ServerInviteTransaction {
    data: Arc<ServerTransactionData>,
}

#[derive(Default, Debug)]
struct ServerInviteTimerHandles {
    timer_g: Option<TimerHandle>,
    current_timer_g_interval: Option<Duration>,
    timer_h: Option<TimerHandle>,
    timer_i: Option<TimerHandle>,
}

#[derive(Debug, Clone, Default)]
struct ServerInviteLogic;

#[async_trait]
impl TransactionLogic<ServerTransactionData, ServerInviteTimerHandles> for ServerInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteServer
    }

    fn initial_state(&self) -> TransactionState {
        TransactionState::Initial
    }

    fn cancel_all_specific_timers(&self, data: &Arc<ServerTransactionData>, timer_handles: &mut ServerInviteTimerHandles) {
        cancel_timer(&data.timer_manager, &mut timer_handles.timer_g);
        cancel_timer(&data.timer_manager, &mut timer_handles.timer_h);
        cancel_timer(&data.timer_manager, &mut timer_handles.timer_i);
        timer_handles.current_timer_g_interval = None;
    }

    async fn on_enter_state(
        &self,
        data: &Arc<ServerTransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timer_handles: &mut ServerInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let tx_id = &data.id;
        let timer_config = &data.timer_config;
        let timers = &data.timer_manager;

        match new_state {
            TransactionState::Completed => {
                if !data.reliable {
                    timer_handles.current_timer_g_interval = Some(timer_config.t1);
                    timer_handles.timer_g = Some(timers.arm(tx_id, TimerType::G, timer_config.t1)?);
                }
                timer_handles.timer_h = Some(timers.arm(tx_id, TimerType::H, timer_config.wait_time_h)?);
            }
            TransactionState::Confirmed => {
                cancel_timer(timers, &mut timer_handles.timer_g);
                cancel_timer(timers, &mut timer_handles.timer_h);
                if timer_config.wait_time_i.is_zero() {
                    return Ok(Some(TransactionState::Terminated));
                }
                timer_handles.timer_i = Some(timers.arm(tx_id, TimerType::I, timer_config.wait_time_i)?);
            }
            TransactionState::Terminated => {
                self.cancel_all_specific_timers(data, timer_handles);
            }
            _ => {
                trace!(id=%tx_id, "Entered state {:?}", new_state);
            }
        }
        Ok(None)
    }

    async fn process_message(
        &self,
        data: &Arc<ServerTransactionData>,
        message: Message,
        current_state: TransactionState,
        _timer_handles: &mut ServerInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let request = match message {
            Message::Request(r) => r,
            Message::Response(_) => {
                warn!(id=%data.id, "Server transaction received a Response, ignoring");
                return Ok(None);
            }
        };
        data.log.record_received(&Message::Request(request.clone()));

        match request.method {
            Method::Ack => match current_state {
                TransactionState::Completed => {
                    debug!(id=%data.id, "ACK received, confirming");
                    data.emit(TransactionEvent::AckReceived {
                        transaction_id: data.id.clone(),
                        request,
                    })
                    .await;
                    Ok(Some(TransactionState::Confirmed))
                }
                TransactionState::Confirmed => {
                    let answered = data.last_response.lock().as_ref().is_some_and(|r| r.status.is_success());
                    if answered {
                        // The ACK of a 2xx is end to end; each copy goes to the TU
                        trace!(id=%data.id, "Repeated ACK for 2xx");
                        data.emit(TransactionEvent::AckRetransmission {
                            transaction_id: data.id.clone(),
                            request,
                        })
                        .await;
                    } else {
                        trace!(id=%data.id, "Duplicate ACK absorbed");
                    }
                    Ok(None)
                }
                _ => {
                    warn!(id=%data.id, state=?current_state, "ACK before any final response, ignoring");
                    Ok(None)
                }
            },
            Method::Invite => match current_state {
                TransactionState::Proceeding | TransactionState::Completed => {
                    Ok(data.retransmit_last_response().await)
                }
                _ => {
                    trace!(id=%data.id, state=?current_state, "INVITE retransmission absorbed");
                    Ok(None)
                }
            },
            other => {
                warn!(id=%data.id, method=%other, "Unexpected request for INVITE server transaction");
                Ok(None)
            }
        }
    }

    async fn send_response(
        &self,
        data: &Arc<ServerTransactionData>,
        response: Response,
        current_state: TransactionState,
        _timer_handles: &mut ServerInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let status = response.status();
        if current_state != TransactionState::Proceeding {
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
            Ok(None)
        } else {
            Ok(Some(TransactionState::Completed))
        }
    }

    async fn handle_timer(
        &self,
        data: &Arc<ServerTransactionData>,
        timer: TimerType,
        current_state: TransactionState,
        timer_handles: &mut ServerInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let tx_id = &data.id;
        let timer_config = &data.timer_config;

        match timer {
            TimerType::G => {
                timer_handles.timer_g = None;
                if current_state != TransactionState::Completed {
                    trace!(id=%tx_id, state=?current_state, "Timer G fired in invalid state, ignoring");
                    return Ok(None);
                }
                debug!(id=%tx_id, "Timer G fired, retransmitting final response");
                if let Some(next) = data.retransmit_last_response().await {
                    return Ok(Some(next));
                }
                let current = timer_handles.current_timer_g_interval.unwrap_or(timer_config.t1);
                let next_interval = std::cmp::min(current * 2, timer_config.t2);
                timer_handles.current_timer_g_interval = Some(next_interval);
                timer_handles.timer_g = Some(data.timer_manager.arm(tx_id, TimerType::G, next_interval)?);
                Ok(None)
            }
            TimerType::H => {
                timer_handles.timer_h = None;
                if current_state == TransactionState::Completed {
                    warn!(id=%tx_id, "Timer H fired, no ACK received");
                    data.emit(TransactionEvent::TransactionTimeout {
                        transaction_id: tx_id.clone(),
                    })
                    .await;
                    return Ok(Some(TransactionState::Terminated));
                }
                Ok(None)
            }
            TimerType::I => {
                timer_handles.timer_i = None;
                if current_state == TransactionState::Confirmed {
                    return Ok(Some(TransactionState::Terminated));
                }
                Ok(None)
            }
            other => {
                warn!(id=%tx_id, timer=%other, "Unknown timer triggered for server INVITE");
                Ok(None)
            }
        }
    }
}

impl ServerInviteTransaction {
    /// Creates the transaction for an incoming INVITE and starts its event
    /// loop. Call [`start`](ServerTransaction::start) to enter Proceeding.
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
        if request.method != Method::Invite {
            return Err(Error::InvalidMessage(format!(
                "server INVITE transaction created for {}",
                request.method
            )));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        timer_manager.register_transaction(&id, cmd_tx.clone());

        let logic = Arc::new(ServerInviteLogic);
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

        tokio::spawn(run_transaction_loop::<_, ServerInviteTimerHandles, _>(
            data.clone(),
            logic,
            cmd_rx,
        ));

        Ok(Self { data })
    }
}

#[async_trait]
impl Transaction for ServerInviteTransaction {
    fn id(&self) -> &TransactionKey {
        &self.data.id
    }

    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteServer
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
impl ServerTransaction for ServerInviteTransaction {
    async fn start(&self) -> Result<()> {
        self.data
            .log
            .record_received(&Message::Request(self.data.request.clone()));
        self.send_command(InternalTransactionCommand::TransitionTo(TransactionState::Proceeding))
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
        Some(&self.data.gate)
    }
}
