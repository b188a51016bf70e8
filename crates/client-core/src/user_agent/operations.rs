//! Requests and responses a user agent sends

use std::net::SocketAddr;

use tracing::{debug, info};

use tfm_dialog_core::{CallError, CancelOutcome};
use tfm_sip_core::{
    generate_branch, generate_call_id, generate_tag, Contact, Credentials, Message, Method, NameAddr, Request,
    Response, SimpleRequestBuilder, SimpleResponseBuilder, StatusCode, Uri,
};

use super::state::{Dialog, PendingRequest};
use super::UserAgent;
use crate::arena::MessageHandle;
use crate::error::{ClientError, ClientResult};

impl UserAgent {
    /// Registers `contacts` for the agent's AOR through the proxy.
    pub async fn register(&self, expires: u32, contacts: Vec<Contact>) -> ClientResult<MessageHandle> {
        let request = self.register_request(expires, contacts)?;
        self.send_request(request, self.config.proxy).await
    }

    /// `Contact: *` with `Expires: 0`.
    pub async fn unregister_all(&self) -> ClientResult<MessageHandle> {
        let request = self.register_request(0, vec![Contact::Wildcard])?;
        self.send_request(request, self.config.proxy).await
    }

    /// Sends an INVITE for `target` through the proxy. It becomes the
    /// current call.
    pub async fn invite(&self, target: &Uri) -> ClientResult<MessageHandle> {
        let request = self.out_of_dialog(Method::Invite, target)?;
        self.send_request(request, self.config.proxy).await
    }

    pub async fn info(&self, target: &Uri) -> ClientResult<MessageHandle> {
        let request = self.out_of_dialog(Method::Info, target)?;
        self.send_request(request, self.config.proxy).await
    }

    /// Ends the dialog, sending BYE straight to the remote target.
    pub async fn bye(&self) -> ClientResult<MessageHandle> {
        let (request, destination) = {
            let mut state = self.state.lock();
            let mut dialog = state.dialog.take().ok_or(ClientError::NoDialog)?;
            dialog.local_cseq += 1;
            let request = SimpleRequestBuilder::with_uri(Method::Bye, dialog.remote_target.clone())
                .from_name_addr(dialog.local.clone())
                .to_name_addr(dialog.remote.clone())
                .call_id(&dialog.call_id)
                .cseq(dialog.local_cseq)
                .via(&self.local_addr.to_string(), "UDP", None)
                .build()?;
            (request, dialog.remote_target.socket_addr()?)
        };
        if let Some(handle) = self.current_call() {
            self.release_call_if_done(handle);
        }
        self.send_request(request, destination).await
    }

    /// Cancels the current call.
    pub async fn cancel(&self) -> ClientResult<CancelOutcome> {
        let handle = self.current_call().ok_or(ClientError::NoActiveCall)?;
        Ok(self.calls.cancel(handle).await?)
    }

    /// ACKs the current call's 2xx. A non-2xx final was already acknowledged
    /// by the INVITE transaction, so nothing is sent and `None` is returned.
    pub async fn ack(&self) -> ClientResult<Option<MessageHandle>> {
        let handle = self.current_call().ok_or(ClientError::NoActiveCall)?;
        let call = self.calls.call(handle).ok_or(ClientError::NoActiveCall)?;
        match call.final_status() {
            Some(status) if status.is_success() => {
                let ack = self.calls.ack(handle).await?;
                Ok(Some(self.save_sent(ack, call.destination)))
            }
            Some(status) => {
                debug!(%handle, %status, "Final response already acknowledged by the transaction");
                Ok(None)
            }
            None => Err(CallError::NoSuccessResponse(handle).into()),
        }
    }

    /// Re-sends the last challenged request with credentials, a new branch
    /// and the next CSeq.
    pub async fn digest_respond(&self) -> ClientResult<MessageHandle> {
        let (challenge, cseq) = {
            let mut state = self.state.lock();
            let challenge = state.challenge.take().ok_or(ClientError::NoChallenge)?;
            (challenge, state.next_cseq())
        };

        let mut request = challenge.request;
        request.cseq.seq = cseq;
        if let Some(via) = request.via.first_mut() {
            via.branch = Some(generate_branch());
        }
        let credentials = self.credentials(&challenge.response, &request);
        request.authorization = Some(if challenge.response.status == StatusCode::ProxyAuthenticationRequired {
            Credentials::Proxy(credentials)
        } else {
            Credentials::Origin(credentials)
        });

        info!(aor = %self.config.aor, method = %request.method, cseq, "Answering challenge");
        self.send_request(request, challenge.destination).await
    }

    /// Answers the most recent incoming request.
    pub async fn respond(&self, status: StatusCode) -> ClientResult<MessageHandle> {
        let pending = self
            .state
            .lock()
            .last_request
            .clone()
            .ok_or(ClientError::NoPendingRequest)?;
        self.respond_pending(pending, status, false).await
    }

    /// Answers `request`, which must be one of the agent's unanswered
    /// incoming requests.
    pub async fn respond_to(&self, request: &Request, status: StatusCode) -> ClientResult<MessageHandle> {
        let pending = self
            .state
            .lock()
            .pending_for(request)
            .cloned()
            .ok_or(ClientError::NoPendingRequest)?;
        self.respond_pending(pending, status, false).await
    }

    /// 180 Ringing for the incoming INVITE.
    pub async fn ring(&self) -> ClientResult<MessageHandle> {
        let pending = self.incoming()?;
        self.respond_pending(pending, StatusCode::Ringing, false).await
    }

    /// 200 OK with our Contact for the incoming INVITE; establishes a dialog.
    pub async fn answer(&self) -> ClientResult<MessageHandle> {
        let pending = self.incoming()?;
        let handle = self.respond_pending(pending.clone(), StatusCode::Ok, true).await?;

        let request = &pending.request;
        let remote_target = request
            .contacts
            .iter()
            .find_map(|c| c.uri())
            .unwrap_or(&request.from.uri)
            .clone();
        let mut state = self.state.lock();
        let local_cseq = state.next_cseq();
        state.dialog = Some(Dialog {
            call_id: request.call_id.clone(),
            local: request.to.clone().with_tag(pending.to_tag.clone()),
            remote: request.from.clone(),
            remote_target,
            local_cseq,
        });
        Ok(handle)
    }

    /// Sends a saved message again, bypassing its transaction.
    pub async fn retransmit(&self, handle: MessageHandle) -> ClientResult<()> {
        let message = self.arena.get(handle).ok_or(ClientError::UnknownHandle(handle))?;
        let destination = self
            .state
            .lock()
            .destinations
            .get(&handle)
            .copied()
            .ok_or(ClientError::UnknownHandle(handle))?;
        debug!(%handle, %destination, message = %message.short_description(), "Retransmitting saved message");
        self.manager.send_stateless((*message).clone(), destination).await?;
        Ok(())
    }

    /// Closes the agent's transport. Later sends fail with transport errors.
    pub async fn close_transport(&self) -> ClientResult<()> {
        info!(aor = %self.config.aor, "Closing transport");
        self.manager.transport().close().await?;
        Ok(())
    }

    fn register_request(&self, expires: u32, contacts: Vec<Contact>) -> ClientResult<Request> {
        let cseq = self.state.lock().next_cseq();
        let mut registrar = Uri::sip(self.config.aor.host.clone());
        registrar.port = self.config.aor.port;

        let mut builder = SimpleRequestBuilder::with_uri(Method::Register, registrar)
            .from_name_addr(self.local_name_addr().with_tag(self.registration_tag.clone()))
            .to_name_addr(self.local_name_addr())
            .call_id(&self.registration_call_id)
            .cseq(cseq)
            .via(&self.local_addr.to_string(), "UDP", None)
            .expires(expires);
        for contact in contacts {
            builder = builder.contact(contact);
        }
        Ok(builder.build()?)
    }

    fn out_of_dialog(&self, method: Method, target: &Uri) -> ClientResult<Request> {
        let cseq = self.state.lock().next_cseq();
        let mut builder = SimpleRequestBuilder::with_uri(method.clone(), target.clone())
            .from_name_addr(self.local_name_addr().with_tag(generate_tag()))
            .to_name_addr(NameAddr::new(target.clone()))
            .call_id(&generate_call_id(&self.local_addr.ip().to_string()))
            .cseq(cseq)
            .via(&self.local_addr.to_string(), "UDP", None);
        if method == Method::Invite {
            builder = builder.contact(Contact::new(self.contact.clone()));
        }
        Ok(builder.build()?)
    }

    /// Sends `request` on a new client transaction and saves it.
    async fn send_request(&self, request: Request, destination: SocketAddr) -> ClientResult<MessageHandle> {
        if request.method == Method::Invite {
            let handle = self.calls.invite(request.clone(), destination).await?;
            let invite_id = self.calls.call(handle).map(|c| c.invite_id);
            let mut state = self.state.lock();
            state.call = Some(handle);
            if let Some(invite_id) = invite_id {
                state.outgoing.insert(invite_id, (request.clone(), destination));
            }
        } else {
            let transaction_id = self
                .manager
                .create_client_transaction(request.clone(), destination)
                .await?;
            self.state
                .lock()
                .outgoing
                .insert(transaction_id.clone(), (request.clone(), destination));
            self.manager.send_request(&transaction_id).await?;
        }
        debug!(aor = %self.config.aor, method = %request.method, %destination, "Request sent");
        Ok(self.save_sent(request, destination))
    }

    async fn respond_pending(
        &self,
        pending: PendingRequest,
        status: StatusCode,
        with_contact: bool,
    ) -> ClientResult<MessageHandle> {
        let mut builder = SimpleResponseBuilder::response_from_request(&pending.request, status, None);
        if status != StatusCode::Trying {
            builder = builder.to_tag(&pending.to_tag);
        }
        if with_contact {
            builder = builder.contact(Contact::new(self.contact.clone()));
        }
        let response = builder.build();
        self.manager
            .send_response(&pending.transaction_id, response.clone())
            .await?;

        if status.is_final() {
            let mut state = self.state.lock();
            if state
                .incoming
                .as_ref()
                .is_some_and(|p| p.transaction_id == pending.transaction_id)
            {
                state.incoming = None;
            }
        }
        Ok(self.save_sent(response, pending.source))
    }

    fn incoming(&self) -> ClientResult<PendingRequest> {
        self.state
            .lock()
            .incoming
            .clone()
            .ok_or(ClientError::NoPendingRequest)
    }

    fn save_sent(&self, message: impl Into<Message>, destination: SocketAddr) -> MessageHandle {
        let handle = self.arena.save(message);
        self.state.lock().destinations.insert(handle, destination);
        handle
    }

    fn credentials(&self, challenge: &Response, request: &Request) -> String {
        let realm = challenge
            .proxy_authenticate
            .as_deref()
            .or_else(|| challenge.header("WWW-Authenticate"))
            .and_then(realm_of)
            .unwrap_or_default();
        format!(
            "Digest username=\"{}\", realm=\"{}\", uri=\"{}\"",
            self.config.username(),
            realm,
            request.uri
        )
    }
}

/// `realm="..."` parameter of a challenge.
fn realm_of(challenge: &str) -> Option<&str> {
    let start = challenge.find("realm=\"")? + "realm=\"".len();
    let rest = &challenge[start..];
    rest.find('"').map(|end| &rest[..end])
}
