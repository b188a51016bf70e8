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
use crate::timer::{TimerHandle, TimerManager, TimerSettings, TimerType};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::runner::{cancel_timer, run_transaction_loop};
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, MessageLog, Transaction, TransactionEvent, TransactionKey,
    TransactionKind, TransactionState,
};

/// Client non-INVITE transaction (RFC 3261 Section 17.1.2)
#[derive(Debug, Clone)]
pub struct ClientNonInviteTransaction {
    data: Arc<ClientTransactionData>,
}

/// Live timers of a client non-INVITE transaction and the Timer E backoff.
#[derive(Default, Debug)]
struct ClientNonInviteTimerHandles {
    timer_e: Option<TimerHandle>,
    current_timer_e_interval: Option<Duration>,
    retransmissions: u32,
    timer_f: Option<TimerHandle>,
    timer_k: Option<TimerHandle>,
}

#[derive(Debug, Clone, Default)]
struct ClientNonInviteLogic;

#[async_trait]
impl TransactionLogic<ClientTransactionData, ClientNonInviteTimerHandles> for ClientNonInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteClient
    }

    fn initial_state(&self) -> TransactionState {
        TransactionState::Initial
    }

    fn cancel_all_specific_timers(&self, data: &Arc<ClientTransactionData>, timer_handles: &mut ClientNonInviteTimerHandles) {
        cancel_timer(&data.timer_manager, &mut timer_handles.timer_e);
        cancel_timer(&data.timer_manager, &mut timer_handles.timer_f);
        cancel_timer(&data.timer_manager, &mut timer_handles.timer_k);
        timer_handles.current_timer_e_interval = None;
    }

    async fn on_enter_state(
        &self,
        data: &Arc<ClientTransactionData>,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timer_handles: &mut ClientNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let tx_id = &data.id;
        let timer_config = &data.timer_config;
        let timers = &data.timer_manager;

        match new_state {
            TransactionState::Trying => {
                debug!(id=%tx_id, method=%data.request.method, "Sending initial request in Trying state");
                if let Err(e) = data.send(Message::Request(data.request.clone())).await {
                    data.report_transport_error(&e).await;
                    return Ok(Some(TransactionState::Terminated));
                }

                if !data.reliable {
                    timer_handles.current_timer_e_interval = Some(timer_config.t1);
                    timer_handles.timer_e = Some(timers.arm(tx_id, TimerType::E, timer_config.t1)?);
                }
                timer_handles.timer_f = Some(timers.arm(tx_id, TimerType::F, timer_config.transaction_timeout)?);
            }
            TransactionState::Proceeding => {
                trace!(id=%tx_id, "Entered Proceeding state. Timers E & F continue");
            }
            TransactionState::Completed => {
                cancel_timer(timers, &mut timer_handles.timer_e);
                cancel_timer(timers, &mut timer_handles.timer_f);
                if timer_config.wait_time_k.is_zero() {
                    return Ok(Some(TransactionState::Terminated));
                }
                timer_handles.timer_k = Some(timers.arm(tx_id, TimerType::K, timer_config.wait_time_k)?);
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
        _timer_handles: &mut ClientNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let response = match message {
            Message::Response(r) => r,
            Message::Request(_) => {
                warn!(id=%data.id, "Client transaction received a Request, ignoring");
                return Ok(None);
            }
        };

        if response.cseq.method != data.request.method || response.branch() != Some(data.id.branch()) {
            warn!(id=%data.id, cseq=%response.cseq, "Response does not belong to this transaction, ignoring");
            return Ok(None);
        }
        data.log.record_received(&Message::Response(response.clone()));

        let status = response.status();
        match current_state {
            TransactionState::Trying | TransactionState::Proceeding => {
                *data.last_response.lock() = Some(response.clone());
                if status.is_provisional() {
                    data.emit(TransactionEvent::ProvisionalResponse {
                        transaction_id: data.id.clone(),
                        response,
                    })
                    .await;
                    if current_state == TransactionState::Trying {
                        return Ok(Some(TransactionState::Proceeding));
                    }
                    Ok(None)
                } else if status.is_success() {
                    data.emit(TransactionEvent::SuccessResponse {
                        transaction_id: data.id.clone(),
                        response,
                        need_ack: false,
                    })
                    .await;
                    Ok(Some(TransactionState::Completed))
                } else {
                    data.emit(TransactionEvent::FailureResponse {
                        transaction_id: data.id.clone(),
                        response,
                    })
                    .await;
                    Ok(Some(TransactionState::Completed))
                }
            }
            TransactionState::Completed => {
                trace!(id=%data.id, status=%status, "Response retransmission absorbed in Completed");
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
        timer_handles: &mut ClientNonInviteTimerHandles,
    ) -> Result<Option<TransactionState>> {
        let tx_id = &data.id;
        let timer_config = &data.timer_config;

        match timer {
            TimerType::E => {
                timer_handles.timer_e = None;
                if !matches!(current_state, TransactionState::Trying | TransactionState::Proceeding) {
                    trace!(id=%tx_id, state=?current_state, "Timer E fired in invalid state, ignoring");
                    return Ok(None);
                }
                if let Some(max) = timer_config.max_retransmissions {
                    if timer_handles.retransmissions >= max {
                        debug!(id=%tx_id, max, "Retransmission limit reached, Timer E stopped");
                        return Ok(None);
                    }
                }

                debug!(id=%tx_id, "Timer E triggered, retransmitting request");
                if let Err(e) = data.send(Message::Request(data.request.clone())).await {
                    data.report_transport_error(&e).await;
                    return Ok(Some(TransactionState::Terminated));
                }
                timer_handles.retransmissions += 1;

                let current = timer_handles.current_timer_e_interval.unwrap_or(timer_config.t1);
                let next_interval = if current_state == TransactionState::Proceeding {
                    timer_config.t2
                } else {
                    std::cmp::min(current * 2, timer_config.t2)
                };
                timer_handles.current_timer_e_interval = Some(next_interval);
                timer_handles.timer_e = Some(data.timer_manager.arm(tx_id, TimerType::E, next_interval)?);
                Ok(None)
            }
            TimerType::F => {
                timer_handles.timer_f = None;
                if matches!(current_state, TransactionState::Trying | TransactionState::Proceeding) {
                    warn!(id=%tx_id, "Timer F (Timeout) fired in state {:?}", current_state);
                    data.emit(TransactionEvent::TransactionTimeout {
                        transaction_id: tx_id.clone(),
                    })
                    .await;
                    return Ok(Some(TransactionState::Terminated));
                }
                trace!(id=%tx_id, state=?current_state, "Timer F fired in invalid state, ignoring");
                Ok(None)
            }
            TimerType::K => {
                timer_handles.timer_k = None;
                if current_state == TransactionState::Completed {
                    return Ok(Some(TransactionState::Terminated));
                }
                Ok(None)
            }
            other => {
                warn!(id=%tx_id, timer=%other, "Unknown timer triggered for client non-INVITE");
                Ok(None)
            }
        }
    }
}

impl ClientNonInviteTransaction {
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
        if matches!(request.method, Method::Invite | Method::Ack) {
            return Err(Error::InvalidMessage(format!(
                "client non-INVITE transaction created for {}",
                request.method
            )));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        timer_manager.register_transaction(&id, cmd_tx.clone());

        let logic = Arc::new(ClientNonInviteLogic);
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

        tokio::spawn(run_transaction_loop::<_, ClientNonInviteTimerHandles, _>(
            data.clone(),
            logic,
            cmd_rx,
        ));

        Ok(Self { data })
    }
}

#[async_trait]
impl Transaction for ClientNonInviteTransaction {
    fn id(&self) -> &TransactionKey {
        &self.data.id
    }

    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteClient
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
impl ClientTransaction for ClientNonInviteTransaction {
    async fn initiate(&self) -> Result<()> {
        let current_state = self.data.state.get();
        if current_state != TransactionState::Initial {
            return Err(Error::invalid_state_transition(
                self.kind(),
                current_state,
                TransactionState::Trying,
            ));
        }
        self.send_command(InternalTransactionCommand::TransitionTo(TransactionState::Trying))
            .await
    }

    async fn process_response(&self, response: Response) -> Result<()> {
        trace!(id=%self.data.id, status=%response.status(), "Received response");
        self.send_command(InternalTransactionCommand::ProcessMessage(Message::Response(response)))
            .await
    }
}
