//! Call coordination on top of the transaction layer.
//!
//! The coordinator ties an outgoing INVITE client transaction to the CANCEL
//! that may follow it and to the ACK of its 2xx:
//!
//! ```text
//!   invite() ──► INVITE client tx ──1xx──► Provisional ──► (deferred CANCEL sent)
//!                      │                   cancel() ──► CANCEL client tx (new branch)
//!                      ├──2xx──► Final ──► ack() ──► ACK (stateless, repeated on retransmitted 2xx)
//!                      ├──3xx-6xx──► Final (the transaction sends the ACK)
//!                      ├──Timer B──► Final 408 (synthesized)
//!                      └──transport failure──► Final 503 (synthesized)
//! ```
//!
//! It also keeps a view of incoming INVITEs so a TU can ask whether the
//! caller cancelled.

use std::net::SocketAddr;

use dashmap::DashMap;
use tracing::{debug, info, trace, warn};

use tfm_sip_core::{Message, Method, Request, Response, SimpleResponseBuilder, StatusCode};
use tfm_transaction_core::{create_ack_for_2xx, TransactionEvent, TransactionKey, TransactionManager};

use crate::call::{CallContext, CallEvent, CallHandle, CancelOutcome, IncomingCall};
use crate::errors::{CallError, CallResult};

/// Tracks the calls of one endpoint.
#[derive(Debug)]
pub struct CallCoordinator {
    manager: TransactionManager,
    calls: DashMap<CallHandle, CallContext>,
    /// INVITE and CANCEL client transactions to their call
    transactions: DashMap<TransactionKey, CallHandle>,
    /// Incoming INVITEs by server transaction
    incoming: DashMap<TransactionKey, IncomingCall>,
}

impl CallCoordinator {
    pub fn new(manager: TransactionManager) -> Self {
        Self {
            manager,
            calls: DashMap::new(),
            transactions: DashMap::new(),
            incoming: DashMap::new(),
        }
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Sends `request` on a new INVITE client transaction.
    pub async fn invite(&self, request: Request, destination: SocketAddr) -> CallResult<CallHandle> {
        if request.method != Method::Invite {
            return Err(CallError::InvalidRequest(format!("{} cannot start a call", request.method)));
        }

        let invite_id = self
            .manager
            .create_client_transaction(request.clone(), destination)
            .await?;
        let handle = CallHandle::new();

        // Registered before sending so the first response finds the call
        self.transactions.insert(invite_id.clone(), handle);
        self.calls
            .insert(handle, CallContext::new(handle, invite_id.clone(), request, destination));

        if let Err(e) = self.manager.send_request(&invite_id).await {
            self.transactions.remove(&invite_id);
            self.calls.remove(&handle);
            return Err(e.into());
        }

        info!(%handle, invite=%invite_id, %destination, "Call started");
        Ok(handle)
    }

    /// Cancels a call that has not received its final response.
    pub async fn cancel(&self, handle: CallHandle) -> CallResult<CancelOutcome> {
        let invite_id = {
            let mut call = self.calls.get_mut(&handle).ok_or(CallError::CallNotFound(handle))?;
            if call.final_response.is_some() || call.invite_terminated {
                debug!(%handle, "CANCEL requested after the final response, nothing sent");
                return Ok(CancelOutcome::AlreadyCompleted);
            }
            if let Some(cancel_id) = &call.cancel_id {
                return Ok(CancelOutcome::Sent(cancel_id.clone()));
            }
            if call.pending_cancel {
                return Ok(CancelOutcome::Deferred);
            }
            call.pending_cancel = true;
            if !call.provisional_seen {
                debug!(%handle, "CANCEL deferred until a provisional response arrives");
                return Ok(CancelOutcome::Deferred);
            }
            call.invite_id.clone()
        };
        self.send_cancel(handle, &invite_id).await
    }

    async fn send_cancel(&self, handle: CallHandle, invite_id: &TransactionKey) -> CallResult<CancelOutcome> {
        match self.manager.create_cancel(invite_id).await {
            Ok(cancel_id) => {
                self.transactions.insert(cancel_id.clone(), handle);
                if let Some(mut call) = self.calls.get_mut(&handle) {
                    call.cancel_id = Some(cancel_id.clone());
                    call.pending_cancel = false;
                }
                info!(%handle, cancel=%cancel_id, "CANCEL sent");
                Ok(CancelOutcome::Sent(cancel_id))
            }
            Err(e) => {
                let completed = match self.calls.get_mut(&handle) {
                    Some(mut call) => {
                        call.pending_cancel = false;
                        call.final_response.is_some() || call.invite_terminated
                    }
                    None => false,
                };
                if completed {
                    debug!(%handle, "INVITE completed while the CANCEL was being built");
                    Ok(CancelOutcome::AlreadyCompleted)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Sends the ACK for the call's 2xx and remembers it for retransmitted 2xx.
    pub async fn ack(&self, handle: CallHandle) -> CallResult<Request> {
        let (request, response, destination) = {
            let call = self.calls.get(&handle).ok_or(CallError::CallNotFound(handle))?;
            match &call.final_response {
                Some(response) if response.status.is_success() => {
                    (call.request.clone(), response.clone(), call.destination)
                }
                _ => return Err(CallError::NoSuccessResponse(handle)),
            }
        };

        let ack = create_ack_for_2xx(&request, &response, &self.manager.local_addr())?;
        self.manager
            .send_stateless(Message::Request(ack.clone()), destination)
            .await?;
        if let Some(mut call) = self.calls.get_mut(&handle) {
            call.ack = Some(ack.clone());
        }
        debug!(%handle, "ACK sent for 2xx");
        Ok(ack)
    }

    /// Snapshot of a call.
    pub fn call(&self, handle: CallHandle) -> Option<CallContext> {
        self.calls.get(&handle).map(|c| c.value().clone())
    }

    /// The call a client transaction belongs to.
    pub fn handle_for(&self, transaction_id: &TransactionKey) -> Option<CallHandle> {
        self.transactions.get(transaction_id).map(|h| *h.value())
    }

    pub fn calls(&self) -> Vec<CallHandle> {
        self.calls.iter().map(|c| *c.key()).collect()
    }

    /// Forgets a finished call.
    pub fn release(&self, handle: CallHandle) -> Option<CallContext> {
        let (_, call) = self.calls.remove(&handle)?;
        self.transactions.remove(&call.invite_id);
        if let Some(cancel_id) = &call.cancel_id {
            self.transactions.remove(cancel_id);
        }
        Some(call)
    }

    /// Incoming INVITE view for a server transaction.
    pub fn incoming_call(&self, invite_id: &TransactionKey) -> Option<IncomingCall> {
        self.incoming.get(invite_id).map(|c| c.value().clone())
    }

    /// True when the caller's CANCEL won against our final response.
    pub fn pending_cancel(&self, invite_id: &TransactionKey) -> bool {
        self.incoming.get(invite_id).is_some_and(|c| c.cancelled)
    }

    /// Feeds a transaction event to the coordinator.
    ///
    /// Returns the call level event for events about outgoing calls; events
    /// that do not concern a call return `None` and can be handled by the
    /// caller as usual.
    pub async fn handle_event(&self, event: &TransactionEvent) -> Option<CallEvent> {
        match event {
            TransactionEvent::NewRequest {
                transaction_id,
                request,
                source,
            } if request.method == Method::Invite => {
                self.incoming.insert(
                    transaction_id.clone(),
                    IncomingCall {
                        invite_id: transaction_id.clone(),
                        request: request.clone(),
                        source: *source,
                        cancelled: false,
                        received_at: chrono::Utc::now(),
                    },
                );
                return None;
            }
            TransactionEvent::CancelReceived { transaction_id, .. } => {
                if let Some(mut call) = self.incoming.get_mut(transaction_id) {
                    call.cancelled = true;
                }
                return None;
            }
            TransactionEvent::StrayResponse { response, .. } => {
                self.repeat_ack_for_stray(response).await;
                return None;
            }
            TransactionEvent::TransactionTerminated { transaction_id } if transaction_id.is_server() => {
                self.incoming.remove(transaction_id);
                return None;
            }
            _ => {}
        }

        let transaction_id = event.transaction_id()?;
        let handle = self.handle_for(transaction_id)?;
        let is_invite = self.calls.get(&handle)?.invite_id == *transaction_id;

        if is_invite {
            self.handle_invite_event(handle, event).await
        } else {
            self.handle_cancel_event(handle, event)
        }
    }

    async fn handle_invite_event(&self, handle: CallHandle, event: &TransactionEvent) -> Option<CallEvent> {
        match event {
            TransactionEvent::ProvisionalResponse {
                transaction_id,
                response,
            } => {
                let send_deferred = {
                    let mut call = self.calls.get_mut(&handle)?;
                    let first = !call.provisional_seen;
                    call.provisional_seen = true;
                    first && call.pending_cancel && call.cancel_id.is_none()
                };
                if send_deferred {
                    debug!(%handle, "First provisional response, sending deferred CANCEL");
                    if let Err(e) = self.send_cancel(handle, transaction_id).await {
                        warn!(%handle, error=%e, "Deferred CANCEL failed");
                    }
                }
                Some(CallEvent::Provisional {
                    handle,
                    response: response.clone(),
                })
            }
            TransactionEvent::SuccessResponse { response, .. } | TransactionEvent::FailureResponse { response, .. } => {
                self.record_final(handle, response.clone(), false)
            }
            TransactionEvent::SuccessRetransmission { .. } => {
                let resend = self
                    .calls
                    .get(&handle)
                    .and_then(|call| call.ack.clone().map(|ack| (ack, call.destination)));
                match resend {
                    Some((ack, destination)) => {
                        trace!(%handle, "2xx retransmitted, repeating ACK");
                        if let Err(e) = self.manager.send_stateless(Message::Request(ack), destination).await {
                            warn!(%handle, error=%e, "Failed to repeat ACK");
                        }
                    }
                    None => trace!(%handle, "2xx retransmitted before the TU sent its ACK"),
                }
                None
            }
            TransactionEvent::TransactionTimeout { .. } => {
                let response = self.synthesize(handle, StatusCode::RequestTimeout)?;
                warn!(%handle, "INVITE timed out, reporting 408");
                self.record_final(handle, response, true)
            }
            TransactionEvent::TransportError { error, .. } => {
                let response = self.synthesize(handle, StatusCode::ServiceUnavailable)?;
                warn!(%handle, %error, "INVITE could not be sent, reporting 503");
                self.record_final(handle, response, true)
            }
            TransactionEvent::TransactionTerminated { transaction_id } => {
                if let Some(mut call) = self.calls.get_mut(&handle) {
                    call.invite_terminated = true;
                    call.pending_cancel = false;
                }
                self.transactions.remove(transaction_id);
                debug!(%handle, "INVITE transaction terminated");
                Some(CallEvent::Terminated { handle })
            }
            _ => None,
        }
    }

    fn handle_cancel_event(&self, handle: CallHandle, event: &TransactionEvent) -> Option<CallEvent> {
        match event {
            TransactionEvent::SuccessResponse { response, .. } | TransactionEvent::FailureResponse { response, .. } => {
                debug!(%handle, status=%response.status, "CANCEL answered");
                Some(CallEvent::CancelAnswered {
                    handle,
                    response: response.clone(),
                })
            }
            TransactionEvent::TransactionTimeout { .. } | TransactionEvent::TransportError { .. } => {
                warn!(%handle, "CANCEL transaction failed; the INVITE's own timers still apply");
                None
            }
            TransactionEvent::TransactionTerminated { transaction_id } => {
                self.transactions.remove(transaction_id);
                None
            }
            _ => None,
        }
    }

    /// Records the first final response of a call. Later ones (a real final
    /// after a synthesized one) are dropped.
    fn record_final(&self, handle: CallHandle, response: Response, synthesized: bool) -> Option<CallEvent> {
        {
            let mut call = self.calls.get_mut(&handle)?;
            if call.final_response.is_some() {
                trace!(%handle, status=%response.status, "Final response already recorded");
                return None;
            }
            call.final_response = Some(response.clone());
            call.pending_cancel = false;
        }
        Some(CallEvent::Final {
            handle,
            response,
            synthesized,
        })
    }

    /// Builds a local final response for a call that never got one.
    fn synthesize(&self, handle: CallHandle, status: StatusCode) -> Option<Response> {
        let call = self.calls.get(&handle)?;
        if call.final_response.is_some() {
            return None;
        }
        Some(SimpleResponseBuilder::response_from_request(&call.request, status, None).build())
    }

    /// A 2xx that arrives after the INVITE transaction is gone still needs
    /// our ACK.
    async fn repeat_ack_for_stray(&self, response: &Response) {
        if !response.status.is_success() || response.cseq.method != Method::Invite {
            return;
        }
        let resend = self.calls.iter().find_map(|call| {
            let matches = call.request.call_id == response.call_id && call.request.cseq.seq == response.cseq.seq;
            if matches {
                call.ack.clone().map(|ack| (ack, call.destination))
            } else {
                None
            }
        });
        if let Some((ack, destination)) = resend {
            trace!(call_id=%response.call_id, "Late 2xx, repeating ACK");
            if let Err(e) = self.manager.send_stateless(Message::Request(ack), destination).await {
                warn!(error=%e, "Failed to repeat ACK");
            }
        }
    }
}
