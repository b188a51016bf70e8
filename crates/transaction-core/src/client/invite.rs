use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use tfm_sip_core::{Message, Method, Request, Response};
use tfm_sip_transport::Transport;

use crate::client::{ClientTransaction, ClientTransactionData};
use crate::error::{Error, Result};
use crate::method::ack::create_ack_for_error_response;
use crate::timer::{TimerHandle, TimerManager, TimerSettings, TimerType};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::runner::{cancel_timer, run_transaction_loop};
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, MessageLog, Transaction, TransactionEvent, TransactionKey,
    TransactionKind, TransactionState,
};

/// Client INVITE transaction (RFC 3261 Section 17.1.1)
#[derive(Debug, Clone)]
pub struct ClientInviteTransaction {
    data: Arc<ClientTransactionData>,
}

/// Live timers of a client INVITE transaction and the Timer A backoff.
#[derive(Default, Debug)]
struct ClientInviteTimerHandles {
    timer_a: Option<TimerHandle>,
    current_timer_a_interval: Option<Duration>,
    retransmissions: u32,
    timer_b: Option<TimerHandle>,
    timer_d: Option<TimerHandle>,
}

#[derive(Debug, Clone, Default)]
struct ClientInviteLogic;

impl ClientInviteLogic {
    async fn send_request(&self, data: &Arc<ClientTransactionData>) -> Option<TransactionState> {
        match data.send(Message::Request(data.request.clone())).await {
            Ok(()) => None,
            Err(e) => {
                data.report_transport_error(&e).await;
                Some(TransactionState::Terminated)
            }
        }
    }

    async fn handle_final_failure(
        &self,
        data: &Arc<ClientTransactionData>,
        response: Response,
    ) -> Result<Option<TransactionState>> {
        data.emit(TransactionEvent::FailureResponse {
            transaction_id: data.id.clone(),
            response: response.clone(),
        })
        .await;

        let ack = create_ack_for_error_response(&data.request, &response)?;
        *data.ack_request.lock() = Some(ack.clone());
        if let Err(e) = data.send(Message::Request(ack)).await {
            data.report_transport_error(&e).await;
            return Ok(Some(TransactionState::Terminated));
        }
        Ok(Some(TransactionState::Completed))
    }
}

#[async_trait]
impl TransactionLogic<ClientTransactionData, ClientInviteTimerHandles> for ClientInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteClient
    }

    fn initial_state(&self) -> TransactionState {
        TransactionState::Initial
    }

    fn cancel_all_specific_timers(&self, data: &Arc<ClientTransactionData>, timer_handles: &mut ClientInviteTimerHandles) {
        cancel_timer(&data.timer_manager, &mut timer_handles.timer_a);
        cancel_timer(&data.timer_manager, &mut timer_handles.timer_b);
        cancel_timer(&data.timer_manager, &mut timer_handles.timer_d);
        timer_handles.current_timer_a_interval = None;
    }

    async fn on_enter_state(
        &self,
        data: &Arc<ClientTransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timer_handles: &mut ClientInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let tx_id = &data.id;
        let timer_config = &data.timer_config;
        let timers = &data.timer_manager;

        match new_state {
            TransactionState::Calling => {
                debug!(id=%tx_id, "Sending INVITE");
                if let Some(next) = self.send_request(data).await {
                    return Ok(Some(next));
                }

                if !data.reliable {
                    timer_handles.current_timer_a_interval = Some(timer_config.t1);
                    timer_handles.timer_a = Some(timers.arm(tx_id, TimerType::A, timer_config.t1)?);
                }
                timer_handles.timer_b = Some(timers.arm(tx_id, TimerType::B, timer_config.transaction_timeout)?);
            }
            TransactionState::Proceeding => {
                cancel_timer(timers, &mut timer_handles.timer_b);
                if data.reliable || !timer_config.retransmit_invite_in_proceeding {
                    cancel_timer(timers, &mut timer_handles.timer_a);
                    trace!(id=%tx_id, "Entered Proceeding, INVITE retransmission stopped");
                } else {
                    trace!(id=%tx_id, "Entered Proceeding, INVITE retransmission continues at T2");
                }
            }
            TransactionState::Completed => {
                cancel_timer(timers, &mut timer_handles.timer_a);
                cancel_timer(timers, &mut timer_handles.timer_b);
                if timer_config.wait_time_d.is_zero() {
                    return Ok(Some(TransactionState::Terminated));
                }
                timer_handles.timer_d = Some(timers.arm(tx_id, TimerType::D, timer_config.wait_time_d)?);
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
        data: &Arc<ClientTransactionData>,
        message: Message,
        current_state: TransactionState,
        _timer_handles: &mut ClientInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let response = match message {
            Message::Response(r) => r,
            Message::Request(_) => {
                warn!(id=%data.id, "Client transaction received a Request, ignoring");
                return Ok(None);
            }
        };

        if response.cseq.method != Method::Invite || response.branch() != Some(data.id.branch()) {
            warn!(id=%data.id, cseq=%response.cseq, "Response does not belong to this transaction, ignoring");
            return Ok(None);
        }
        data.log.record_received(&Message::Response(response.clone()));

        let status = response.status();
        match current_state {
            TransactionState::Calling | TransactionState::Proceeding => {
                *data.last_response.lock() = Some(response.clone());
                if status.is_provisional() {
                    data.emit(TransactionEvent::ProvisionalResponse {
                        transaction_id: data.id.clone(),
                        response,
                    })
                    .await;
                    if current_state == TransactionState::Calling {
                        return Ok(Some(TransactionState::Proceeding));
                    }
                    Ok(None)
                } else if status.is_success() {
                    data.emit(TransactionEvent::SuccessResponse {
                        transaction_id: data.id.clone(),
                        response,
                        need_ack: true,
                    })
                    .await;
                    Ok(Some(TransactionState::Completed))
                } else {
                    self.handle_final_failure(data, response).await
                }
            }
            TransactionState::Completed => {
                if status.is_provisional() {
                    trace!(id=%data.id, "Late provisional response in Completed, ignoring");
                } else if status.is_success() {
                    debug!(id=%data.id, "2xx retransmission in Completed");
                    data.emit(TransactionEvent::SuccessRetransmission {
                        transaction_id: data.id.clone(),
                        response,
                    })
                    .await;
                } else {
                    let ack = data.ack_request.lock().clone();
                    if let Some(ack) = ack {
                        trace!(id=%data.id, "Final response retransmission, re-sending ACK");
                        if let Err(e) = data.send(Message::Request(ack)).await {
                            data.report_transport_error(&e).await;
                            return Ok(Some(TransactionState::Terminated));
                        }
                    }
                }
                Ok(None)
            }
            _ => {
                trace!(id=%data.id, state=?current_state, "Response ignored in this state");
                Ok(None)
            }
        }
    }

    async fn handle_timer(
        &self,
        data: &Arc<ClientTransactionData>,
        timer: TimerType,
        current_state: TransactionState,
        timer_handles: &mut ClientInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let tx_id = &data.id;
        let timer_config = &data.timer_config;

        match timer {
            TimerType::A => {
                timer_handles.timer_a = None;
                let retransmitting = match current_state {
                    TransactionState::Calling => true,
                    TransactionState::Proceeding => timer_config.retransmit_invite_in_proceeding,
                    _ => false,
                };
                if !retransmitting {
                    trace!(id=%tx_id, state=?current_state, "Timer A fired in invalid state, ignoring");
                    return Ok(None);
                }
                if let Some(max) = timer_config.max_retransmissions {
                    if timer_handles.retransmissions >= max {
                        debug!(id=%tx_id, max, "Retransmission limit reached, Timer A stopped");
                        return Ok(None);
                    }
                }

                debug!(id=%tx_id, "Timer A fired, retransmitting INVITE");
                if let Some(next) = self.send_request(data).await {
                    return Ok(Some(next));
                }
                timer_handles.retransmissions += 1;

                let current = timer_handles.current_timer_a_interval.unwrap_or(timer_config.t1);
                let next_interval = if current_state == TransactionState::Proceeding {
                    timer_config.t2
                } else {
                    std::cmp::min(current * 2, timer_config.t2)
                };
                timer_handles.current_timer_a_interval = Some(next_interval);
                timer_handles.timer_a = Some(data.timer_manager.arm(tx_id, TimerType::A, next_interval)?);
                Ok(None)
            }
            TimerType::B => {
                timer_handles.timer_b = None;
                if current_state == TransactionState::Calling {
                    warn!(id=%tx_id, "Timer B (timeout) fired");
                    data.emit(TransactionEvent::TransactionTimeout {
                        transaction_id: tx_id.clone(),
                    })
                    .await;
                    return Ok(Some(TransactionState::Terminated));
                }
                trace!(id=%tx_id, state=?current_state, "Timer B fired in invalid state, ignoring");
                Ok(None)
            }
            TimerType::D => {
                timer_handles.timer_d = None;
                if current_state == TransactionState::Completed {
                    return Ok(Some(TransactionState::Terminated));
                }
                Ok(None)
            }
            other => {
                warn!(id=%tx_id, timer=%other, "Unknown timer triggered for client INVITE");
                Ok(None)
            }
        }
    }
}

impl ClientInviteTransaction {
    /// Creates the transaction and starts its event loop. Nothing is sent
    /// until [`initiate`](ClientTransaction::initiate).
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
                "client INVITE transaction created for {}",
                request.method
            )));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        timer_manager.register_transaction(&id, cmd_tx.clone());

        let logic = Arc::new(ClientInviteLogic);
        let data = Arc::new(ClientTransactionData {
            id,
            state: AtomicTransactionState::new(logic.initial_state()),
            request,
            last_response: Mutex::new(None),
            ack_request: Mutex::new(None),
            remote_addr,
            transport,
            reliable,
            events_tx,
            cmd_tx,
            timer_manager,
            timer_config,
            log: MessageLog::new(),
        });

        tokio::spawn(run_transaction_loop::<_, ClientInviteTimerHandles, _>(
            data.clone(),
            logic,
            cmd_rx,
        ));

        Ok(Self { data })
    }
}

#[async_trait]
impl Transaction for ClientInviteTransaction {
    fn id(&self) -> &TransactionKey {
        &self.data.id
    }

    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteClient
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
impl ClientTransaction for ClientInviteTransaction {
    async fn initiate(&self) -> Result<()> {
        let current_state = self.data.state.get();
        if current_state != TransactionState::Initial {
            return Err(Error::invalid_state_transition(
                self.kind(),
                current_state,
                TransactionState::Calling,
            ));
        }
        self.send_command(InternalTransactionCommand::TransitionTo(TransactionState::Calling))
            .await
    }

    async fn process_response(&self, response: Response) -> Result<()> {
        trace!(id=%self.data.id, status=%response.status(), "Received response");
        self.send_command(InternalTransactionCommand::ProcessMessage(Message::Response(response)))
            .await
    }

    fn ack_request(&self) -> Option<Request> {
        self.data.ack_request.lock().clone()
    }
}
