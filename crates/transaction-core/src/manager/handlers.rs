use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use tfm_sip_core::{Message, Method, Request, Response, SimpleResponseBuilder, StatusCode};
use tfm_sip_transport::TransportEvent;

use crate::client::ClientTransaction;
use crate::error::{Error, Result};
use crate::method::{ack, cancel};
use crate::method::cancel::GateCancel;
use crate::server::{ServerInviteTransaction, ServerNonInviteTransaction, ServerTransaction};
use crate::transaction::{Transaction, TransactionEvent, TransactionKey, TransactionKind};

use super::TransactionManager;

/// Forwards transaction events to the TU and the subscribers, forgetting
/// transactions as they terminate.
pub(super) async fn dispatch_events(
    manager: TransactionManager,
    mut internal_rx: mpsc::Receiver<TransactionEvent>,
    tu_tx: mpsc::Sender<TransactionEvent>,
) {
    while let Some(event) = internal_rx.recv().await {
        if let TransactionEvent::TransactionTerminated { transaction_id } = &event {
            let removed = if transaction_id.is_server() {
                manager.inner.server_transactions.remove(transaction_id).is_some()
            } else {
                manager.inner.client_transactions.remove(transaction_id).is_some()
            };
            trace!(id=%transaction_id, removed, "Transaction terminated");
        }

        let subscribers = manager.inner.event_subscribers.lock().clone();
        let mut closed = false;
        for subscriber in &subscribers {
            if subscriber.send(event.clone()).await.is_err() {
                closed = true;
            }
        }
        if closed {
            manager.inner.event_subscribers.lock().retain(|s| !s.is_closed());
        }

        if tu_tx.send(event).await.is_err() {
            trace!("TU event receiver dropped");
        }
    }
    debug!("Event dispatcher stopped");
}

/// Reads the transport and routes every message.
pub(super) async fn run_receive_loop(manager: TransactionManager, mut transport_rx: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = transport_rx.recv().await {
        match event {
            TransportEvent::MessageReceived { message, source, .. } => {
                if let Err(e) = manager.handle_message(message, source).await {
                    warn!(error=%e, %source, "Failed to handle incoming message");
                    manager
                        .emit(TransactionEvent::Error {
                            transaction_id: None,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
            TransportEvent::Error { error } => {
                error!(%error, "Transport error");
                manager
                    .emit(TransactionEvent::Error {
                        transaction_id: None,
                        error,
                    })
                    .await;
            }
            TransportEvent::Closed => {
                info!("Transport closed, stopping receive loop");
                break;
            }
        }
    }
}

impl TransactionManager {
    async fn emit(&self, event: TransactionEvent) {
        if self.inner.events_tx.send(event).await.is_err() {
            trace!("Event dispatcher gone");
        }
    }

    pub(super) async fn handle_message(&self, message: Message, source: SocketAddr) -> Result<()> {
        match message {
            Message::Response(response) => self.handle_response(response, source).await,
            Message::Request(request) if request.method == Method::Ack => self.handle_ack(request, source).await,
            Message::Request(request) => self.handle_request(request, source).await,
        }
    }

    async fn handle_response(&self, response: Response, source: SocketAddr) -> Result<()> {
        let transaction = TransactionKey::from_response(&response).and_then(|key| {
            self.inner
                .client_transactions
                .get(&key)
                .map(|entry| entry.value().clone())
        });

        match transaction {
            Some(tx) => {
                trace!(id=%tx.id(), status=%response.status, "Routing response to client transaction");
                tx.process_response(response).await
            }
            None => {
                debug!(status=%response.status, %source, "No client transaction for response");
                self.emit(TransactionEvent::StrayResponse { response, source }).await;
                Ok(())
            }
        }
    }

    async fn handle_ack(&self, request: Request, source: SocketAddr) -> Result<()> {
        // ACK for a non-2xx shares the INVITE's branch
        if let Some(key) = TransactionKey::from_request(&request) {
            let invite_key = key.with_method(Method::Invite);
            let transaction = self
                .inner
                .server_transactions
                .get(&invite_key)
                .map(|entry| entry.value().clone());
            if let Some(tx) = transaction {
                return tx.process_request(request).await;
            }
        }

        // ACK for a 2xx has a branch of its own; match it on the dialog
        let transaction = self
            .inner
            .server_transactions
            .iter()
            .find(|entry| {
                let tx = entry.value();
                tx.kind() == TransactionKind::InviteServer
                    && ack::is_ack_for_2xx(&request, tx.original_request())
                    && tx.last_response().is_some_and(|r| r.status.is_success())
            })
            .map(|entry| entry.value().clone());
        if let Some(tx) = transaction {
            return tx.process_request(request).await;
        }

        debug!(call_id=%request.call_id, %source, "ACK matches no transaction");
        self.emit(TransactionEvent::StrayAck { request, source }).await;
        Ok(())
    }

    async fn handle_request(&self, request: Request, source: SocketAddr) -> Result<()> {
        let key = TransactionKey::from_request(&request)
            .ok_or_else(|| Error::InvalidMessage(format!("{} without a Via branch", request.method)))?;

        let existing = self
            .inner
            .server_transactions
            .get(&key)
            .map(|entry| entry.value().clone());
        if let Some(tx) = existing {
            trace!(id=%key, "Request retransmission");
            return tx.process_request(request).await;
        }

        if !self.is_running() {
            debug!(id=%key, "Manager shut down, ignoring new request");
            return Ok(());
        }

        let transaction = self.create_server_transaction(key.clone(), request.clone(), source)?;
        self.inner.server_transactions.insert(key.clone(), transaction.clone());
        transaction.start().await?;

        if request.method == Method::Cancel {
            return self.handle_cancel(key, request).await;
        }

        debug!(id=%key, method=%request.method, %source, "New server transaction");
        self.emit(TransactionEvent::NewRequest {
            transaction_id: key,
            request,
            source,
        })
        .await;
        Ok(())
    }

    fn create_server_transaction(
        &self,
        key: TransactionKey,
        request: Request,
        source: SocketAddr,
    ) -> Result<Arc<dyn ServerTransaction>> {
        let inner = &self.inner;
        let transaction: Arc<dyn ServerTransaction> = if request.method == Method::Invite {
            Arc::new(ServerInviteTransaction::new(
                key,
                request,
                source,
                inner.transport.clone(),
                inner.reliable,
                inner.events_tx.clone(),
                inner.timer_manager.clone(),
                inner.timer_settings,
            )?)
        } else {
            Arc::new(ServerNonInviteTransaction::new(
                key,
                request,
                source,
                inner.transport.clone(),
                inner.reliable,
                inner.events_tx.clone(),
                inner.timer_manager.clone(),
                inner.timer_settings,
            )?)
        };
        Ok(transaction)
    }

    /// Answers a new CANCEL and tells the TU when it wins against the final
    /// response of the INVITE.
    async fn handle_cancel(&self, cancel_id: TransactionKey, request: Request) -> Result<()> {
        let invite = self
            .inner
            .server_transactions
            .iter()
            .find(|entry| {
                entry.value().kind() == TransactionKind::InviteServer
                    && cancel::is_cancel_for_invite(&request, entry.value().original_request())
            })
            .map(|entry| entry.value().clone());

        let outcome = invite
            .as_ref()
            .and_then(|tx| tx.final_response_gate().map(|gate| gate.try_cancel()));

        let status = match outcome {
            Some(GateCancel::Cancelled) | Some(GateCancel::AlreadyCancelled) => StatusCode::Ok,
            Some(GateCancel::FinalSent) | None => StatusCode::CallOrTransactionDoesNotExist,
        };
        let response = SimpleResponseBuilder::response_from_request(&request, status, None).build();
        self.send_response(&cancel_id, response).await?;

        match (outcome, invite) {
            (Some(GateCancel::Cancelled), Some(invite)) => {
                debug!(invite=%invite.id(), cancel=%cancel_id, "CANCEL accepted");
                self.emit(TransactionEvent::CancelReceived {
                    transaction_id: invite.id().clone(),
                    cancel_transaction_id: cancel_id,
                    request,
                })
                .await;
            }
            (Some(GateCancel::AlreadyCancelled), _) => {
                trace!(cancel=%cancel_id, "Repeated CANCEL answered");
            }
            _ => {
                debug!(cancel=%cancel_id, "CANCEL matches no cancellable INVITE, answered 481");
            }
        }
        Ok(())
    }
}
