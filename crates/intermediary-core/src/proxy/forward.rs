//! Request admission, forwarding and response relaying

use std::net::SocketAddr;

use tracing::{debug, info, trace, warn};

use tfm_dialog_core::CallEvent;
use tfm_sip_core::{generate_branch, generate_tag, Credentials, Method, Request, Response, SimpleResponseBuilder, StatusCode, Via};
use tfm_transaction_core::{TransactionEvent, TransactionKey};

use super::{Leg, ProxyInner};
use crate::error::Result;
use crate::policy::PolicyAction;

impl ProxyInner {
    pub(crate) async fn handle_event(&self, event: TransactionEvent) -> Result<()> {
        // Downstream INVITE legs are tracked by the coordinator
        if let Some(call_event) = self.calls.handle_event(&event).await {
            return self.on_call_event(call_event).await;
        }

        match event {
            TransactionEvent::NewRequest {
                transaction_id,
                request,
                ..
            } => self.on_request(transaction_id, request).await,
            TransactionEvent::CancelReceived { transaction_id, .. } => self.on_cancel(&transaction_id).await,
            TransactionEvent::ProvisionalResponse {
                transaction_id,
                response,
            } => {
                if response.status == StatusCode::Trying {
                    return Ok(());
                }
                self.relay(&transaction_id, &response).await
            }
            TransactionEvent::SuccessResponse {
                transaction_id,
                response,
                ..
            }
            | TransactionEvent::FailureResponse {
                transaction_id,
                response,
            } => self.relay(&transaction_id, &response).await,
            TransactionEvent::TransactionTimeout { transaction_id } => {
                let Some(leg) = self.legs.get(&transaction_id).map(|l| l.value().clone()) else {
                    return Ok(());
                };
                if self.config.forward_non_invite_timeouts {
                    self.respond(&leg.upstream_id, &leg.upstream_request, StatusCode::RequestTimeout)
                        .await
                } else {
                    debug!(id = %transaction_id, "Downstream timeout not forwarded upstream");
                    Ok(())
                }
            }
            TransactionEvent::TransportError { transaction_id, error } => {
                let Some(leg) = self.legs.get(&transaction_id).map(|l| l.value().clone()) else {
                    return Ok(());
                };
                warn!(id = %transaction_id, %error, "Downstream unreachable");
                self.respond(&leg.upstream_id, &leg.upstream_request, StatusCode::ServiceUnavailable)
                    .await
            }
            TransactionEvent::TransactionTerminated { transaction_id } => {
                self.legs.remove(&transaction_id);
                self.upstream_calls.remove(&transaction_id);
                self.ack_routes.remove(&transaction_id);
                Ok(())
            }
            TransactionEvent::AckReceived { transaction_id, request }
            | TransactionEvent::AckRetransmission { transaction_id, request } => {
                self.forward_ack(&transaction_id, request).await
            }
            TransactionEvent::StrayAck { request, .. } => self.forward_stray_ack(request).await,
            TransactionEvent::SuccessRetransmission {
                transaction_id,
                response,
            } => self.relay_2xx_retransmission(&transaction_id, &response).await,
            TransactionEvent::StrayResponse { response, .. } => self.forward_stray(response).await,
            TransactionEvent::Error { transaction_id, error } => {
                warn!(?transaction_id, %error, "Transaction layer error");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_call_event(&self, event: CallEvent) -> Result<()> {
        match event {
            CallEvent::Provisional { handle, response } => {
                if response.status == StatusCode::Trying {
                    return Ok(());
                }
                let Some(leg) = self.invite_legs.get(&handle).map(|l| l.value().clone()) else {
                    return Ok(());
                };
                let relayed = SimpleResponseBuilder::relay(&leg.upstream_request, &response).build();
                self.manager.send_response(&leg.upstream_id, relayed).await?;
            }
            CallEvent::Final {
                handle,
                response,
                synthesized,
            } => {
                let Some(leg) = self.invite_legs.get(&handle).map(|l| l.value().clone()) else {
                    return Ok(());
                };
                let upstream = if synthesized {
                    SimpleResponseBuilder::response_from_request(&leg.upstream_request, response.status, None).build()
                } else {
                    SimpleResponseBuilder::relay(&leg.upstream_request, &response).build()
                };
                debug!(%handle, status = %upstream.status, synthesized, "Relaying INVITE final response");
                self.manager.send_response(&leg.upstream_id, upstream).await?;
            }
            CallEvent::CancelAnswered { handle, response } => {
                trace!(%handle, status = %response.status, "Downstream CANCEL answered");
            }
            CallEvent::Terminated { handle } => {
                if let Some((_, leg)) = self.invite_legs.remove(&handle) {
                    self.upstream_calls.remove(&leg.upstream_id);
                }
                self.calls.release(handle);
            }
        }
        Ok(())
    }

    async fn on_request(&self, transaction_id: TransactionKey, request: Request) -> Result<()> {
        if request.method == Method::Invite && self.config.send_100_trying {
            self.respond(&transaction_id, &request, StatusCode::Trying).await?;
        }

        match self.policy.evaluate(&request).await {
            PolicyAction::Allow => {}
            PolicyAction::Reject(status) => {
                info!(method = %request.method, %status, "Request rejected");
                return self.respond(&transaction_id, &request, status).await;
            }
            PolicyAction::Challenge => return self.challenge(&transaction_id, &request).await,
        }

        if request.method == Method::Register {
            let response = self.registrar.process_register(&request).await;
            self.manager.send_response(&transaction_id, response).await?;
            return Ok(());
        }
        self.forward(transaction_id, request).await
    }

    /// Forwards to the first live binding of the To AOR.
    async fn forward(&self, transaction_id: TransactionKey, request: Request) -> Result<()> {
        let aor = request.to.uri.aor();
        let Some(binding) = self.registrar.fetch(&aor).into_iter().next() else {
            debug!(%aor, "No bindings");
            return self
                .respond(&transaction_id, &request, StatusCode::TemporarilyUnavailable)
                .await;
        };
        let destination = match binding.contact.socket_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(%aor, contact = %binding.contact, error = %e, "Cannot resolve binding");
                return self
                    .respond(&transaction_id, &request, StatusCode::ServiceUnavailable)
                    .await;
            }
        };

        let mut downstream = request.clone();
        downstream.uri = binding.contact.clone();
        downstream.max_forwards = request.max_forwards.saturating_sub(1);
        // Proxy credentials were meant for us
        if downstream.authorization.as_ref().is_some_and(Credentials::is_proxy) {
            downstream.authorization = None;
        }
        downstream.via.insert(
            0,
            Via::new("UDP", self.manager.local_addr().to_string(), generate_branch()),
        );

        let leg = Leg {
            upstream_id: transaction_id.clone(),
            upstream_request: request,
        };
        if downstream.method == Method::Invite {
            self.ack_routes
                .insert(transaction_id.clone(), (downstream.uri.clone(), destination));
            let handle = self.calls.invite(downstream, destination).await?;
            self.invite_legs.insert(handle, leg);
            self.upstream_calls.insert(transaction_id, handle);
        } else {
            let downstream_id = self
                .manager
                .create_client_transaction(downstream, destination)
                .await?;
            self.legs.insert(downstream_id.clone(), leg);
            self.manager.send_request(&downstream_id).await?;
        }
        debug!(%aor, %destination, "Request forwarded");
        Ok(())
    }

    async fn on_cancel(&self, invite_id: &TransactionKey) -> Result<()> {
        match self.upstream_calls.get(invite_id).map(|h| *h) {
            Some(handle) => {
                let outcome = self.calls.cancel(handle).await?;
                debug!(%handle, ?outcome, "Cancelling downstream leg");
            }
            None => {
                // Never forwarded, so nobody else will answer it
                let request = self.manager.original_request(invite_id)?;
                self.respond(invite_id, &request, StatusCode::RequestTerminated).await?;
            }
        }
        Ok(())
    }

    /// Relays a non-INVITE downstream response upstream.
    async fn relay(&self, transaction_id: &TransactionKey, response: &Response) -> Result<()> {
        let Some(leg) = self.legs.get(transaction_id).map(|l| l.value().clone()) else {
            trace!(id = %transaction_id, "Response for no leg");
            return Ok(());
        };
        let relayed = SimpleResponseBuilder::relay(&leg.upstream_request, response).build();
        self.manager.send_response(&leg.upstream_id, relayed).await?;
        Ok(())
    }

    /// Passes the ACK of a relayed 2xx on to the callee. ACKs for non-2xx
    /// finals end at our server transaction.
    async fn forward_ack(&self, invite_id: &TransactionKey, mut ack: Request) -> Result<()> {
        let answered = matches!(
            self.manager.last_response(invite_id),
            Ok(Some(response)) if response.status.is_success()
        );
        if !answered {
            trace!(id = %invite_id, "ACK absorbed");
            return Ok(());
        }
        let Some((uri, destination)) = self.ack_routes.get(invite_id).map(|r| r.value().clone()) else {
            return Ok(());
        };
        ack.uri = uri;
        debug!(id = %invite_id, %destination, "Forwarding ACK for 2xx");
        self.send_ack_downstream(ack, destination).await
    }

    /// An ACK for a 2xx whose upstream transaction is gone follows its
    /// Request-URI, which is the callee's Contact.
    async fn forward_stray_ack(&self, ack: Request) -> Result<()> {
        let destination = match ack.uri.socket_addr() {
            Ok(addr) if addr != self.manager.local_addr() => addr,
            _ => {
                trace!(uri = %ack.uri, "Dropping stray ACK");
                return Ok(());
            }
        };
        debug!(%destination, call_id = %ack.call_id, "Forwarding stray ACK");
        self.send_ack_downstream(ack, destination).await
    }

    async fn send_ack_downstream(&self, mut ack: Request, destination: SocketAddr) -> Result<()> {
        if ack.max_forwards == 0 {
            trace!(call_id = %ack.call_id, "ACK out of hops");
            return Ok(());
        }
        ack.max_forwards -= 1;
        ack.via.insert(
            0,
            Via::new("UDP", self.manager.local_addr().to_string(), generate_branch()),
        );
        self.manager.send_stateless(ack.into(), destination).await?;
        Ok(())
    }

    /// The callee repeats its 2xx until it sees an ACK. The upstream server
    /// transaction has already sent its final, so the copy goes statelessly.
    async fn relay_2xx_retransmission(&self, transaction_id: &TransactionKey, response: &Response) -> Result<()> {
        let Some(leg) = self
            .calls
            .handle_for(transaction_id)
            .and_then(|handle| self.invite_legs.get(&handle).map(|l| l.value().clone()))
        else {
            return Ok(());
        };
        let relayed = SimpleResponseBuilder::relay(&leg.upstream_request, response).build();
        let Some(next_hop) = relayed.via.first().and_then(|v| v.sent_by.parse::<SocketAddr>().ok()) else {
            return Ok(());
        };
        trace!(id = %transaction_id, %next_hop, "Relaying 2xx retransmission");
        self.manager.send_stateless(relayed.into(), next_hop).await?;
        Ok(())
    }

    /// A 2xx retransmission after the downstream INVITE transaction is gone
    /// goes upstream statelessly.
    async fn forward_stray(&self, mut response: Response) -> Result<()> {
        if !(response.status.is_success() && response.cseq.method == Method::Invite) {
            trace!(status = %response.status, "Dropping stray response");
            return Ok(());
        }
        let local = self.manager.local_addr().to_string();
        if response.via.first().is_some_and(|v| v.sent_by == local) {
            response.via.remove(0);
        }
        let Some(next_hop) = response.via.first().and_then(|v| v.sent_by.parse::<SocketAddr>().ok()) else {
            return Ok(());
        };
        self.manager.send_stateless(response.into(), next_hop).await?;
        Ok(())
    }

    async fn respond(&self, transaction_id: &TransactionKey, request: &Request, status: StatusCode) -> Result<()> {
        let response = SimpleResponseBuilder::response_from_request(request, status, None).build();
        self.manager.send_response(transaction_id, response).await?;
        Ok(())
    }

    async fn challenge(&self, transaction_id: &TransactionKey, request: &Request) -> Result<()> {
        let challenge = format!(
            "Digest realm=\"{}\", nonce=\"{}\", algorithm=MD5",
            self.config.realm,
            generate_tag()
        );
        debug!(method = %request.method, realm = %self.config.realm, "Challenging request");
        let response = SimpleResponseBuilder::response_from_request(request, StatusCode::ProxyAuthenticationRequired, None)
            .proxy_authenticate(&challenge)
            .build();
        self.manager.send_response(transaction_id, response).await?;
        Ok(())
    }
}
