//! Simulated SIP endpoint
//!
//! A [`UserAgent`] owns a transaction manager on one transport, a call
//! coordinator for its outgoing INVITEs and a message arena. Tests drive it
//! either step by step (`invite()`, `next_event()`, `ack()`, ...) or through a
//! [`TransactionUser`] with [`UserAgent::drive`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use tfm_dialog_core::{CallCoordinator, CallHandle};
use tfm_sip_core::{generate_call_id, generate_tag, Contact, Method, NameAddr, StatusCode, Uri};
use tfm_sip_transport::{MemoryNetwork, Transport, TransportEvent};
use tfm_transaction_core::{TransactionEvent, TransactionManager};

use crate::action::{Action, ActionInterpreter};
use crate::arena::MessageArena;
use crate::config::UserAgentConfig;
use crate::error::{ClientError, ClientResult};
use crate::events::UaEvent;
use crate::tu::TransactionUser;

mod operations;
mod state;

use state::{Challenge, Dialog, PendingRequest, UaState};

pub struct UserAgent {
    config: UserAgentConfig,
    manager: TransactionManager,
    calls: CallCoordinator,
    arena: MessageArena,
    events: AsyncMutex<mpsc::Receiver<TransactionEvent>>,
    state: Mutex<UaState>,
    local_addr: SocketAddr,
    contact: Uri,
    /// Call-ID and From tag shared by every REGISTER of this agent
    registration_call_id: String,
    registration_tag: String,
}

impl UserAgent {
    pub async fn new(
        config: UserAgentConfig,
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
    ) -> ClientResult<Self> {
        let (manager, events) = TransactionManager::new(transport, transport_rx, config.transaction.clone()).await?;
        let local_addr = manager.local_addr();
        let contact = config
            .contact
            .clone()
            .unwrap_or_else(|| Uri::from_addr(config.aor.user.as_deref(), local_addr));
        info!(aor = %config.aor, %local_addr, "User agent ready");

        Ok(Self {
            calls: CallCoordinator::new(manager.clone()),
            manager,
            arena: MessageArena::new(),
            events: AsyncMutex::new(events),
            state: Mutex::new(UaState::default()),
            local_addr,
            contact,
            registration_call_id: generate_call_id(&local_addr.ip().to_string()),
            registration_tag: generate_tag(),
            config,
        })
    }

    /// Binds a new agent to `addr` on an in-memory network.
    pub async fn bind(network: &MemoryNetwork, addr: SocketAddr, config: UserAgentConfig) -> ClientResult<Self> {
        let (transport, rx) = network.bind(addr)?;
        Self::new(config, Arc::new(transport), rx).await
    }

    pub fn config(&self) -> &UserAgentConfig {
        &self.config
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    pub fn calls(&self) -> &CallCoordinator {
        &self.calls
    }

    pub fn arena(&self) -> &MessageArena {
        &self.arena
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn aor(&self) -> &Uri {
        &self.config.aor
    }

    pub fn contact(&self) -> &Uri {
        &self.contact
    }

    pub fn default_contacts(&self) -> Vec<Contact> {
        vec![Contact::new(self.contact.clone())]
    }

    /// The last INVITE this agent sent.
    pub fn current_call(&self) -> Option<CallHandle> {
        self.state.lock().call
    }

    pub fn has_dialog(&self) -> bool {
        self.state.lock().dialog.is_some()
    }

    /// Waits up to `wait` for the next event worth reporting.
    ///
    /// Auto-policies run here: 100 Trying for new INVITEs, 487 for cancelled
    /// ones and digest retries for challenges, as configured.
    pub async fn next_event(&self, wait: Duration) -> ClientResult<UaEvent> {
        let deadline = Instant::now() + wait;
        let mut events = self.events.lock().await;
        loop {
            let event = match timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(ClientError::ChannelClosed),
                Err(_) => return Err(ClientError::Timeout(wait)),
            };
            if let Some(ua_event) = self.process(event).await? {
                debug!(aor = %self.config.aor, event = ?ua_event, "UA event");
                return Ok(ua_event);
            }
        }
    }

    /// Takes the next event, lets `tu` decide and runs its action.
    pub async fn drive(&self, tu: &dyn TransactionUser, wait: Duration) -> ClientResult<UaEvent> {
        let event = self.next_event(wait).await?;
        let action = match &event {
            UaEvent::Request { request, .. } => tu.on_request(request).await,
            UaEvent::Ack { request } => tu.on_ack(request).await,
            UaEvent::Cancelled { request, .. } => tu.on_cancel(request).await,
            UaEvent::Provisional { response, .. } => tu.on_provisional(response).await,
            UaEvent::Final { response, .. } => tu.on_final_response(response).await,
            UaEvent::Timeout { transaction_id } => tu.on_timeout(transaction_id).await,
            UaEvent::TransportError { transaction_id, error } => tu.on_transport_error(transaction_id, error).await,
            UaEvent::Terminated { .. } => Action::NoAction,
        };
        ActionInterpreter::new(self).run(&action, event.message().as_ref()).await?;
        Ok(event)
    }

    async fn process(&self, event: TransactionEvent) -> ClientResult<Option<UaEvent>> {
        // Looked up first: the coordinator forgets the transaction on termination
        let ended_call = match &event {
            TransactionEvent::TransactionTerminated { transaction_id } => self.calls.handle_for(transaction_id),
            _ => None,
        };
        // The coordinator keeps its own view of INVITEs, CANCELs and ACKs
        self.calls.handle_event(&event).await;

        let ua_event = match event {
            TransactionEvent::NewRequest {
                transaction_id,
                request,
                source,
            } => {
                let pending = PendingRequest {
                    transaction_id: transaction_id.clone(),
                    request: request.clone(),
                    source,
                    to_tag: generate_tag(),
                };
                let is_invite = request.method == Method::Invite;
                let hung_up = {
                    let mut state = self.state.lock();
                    if is_invite {
                        state.incoming = Some(pending.clone());
                    }
                    let hung_up = request.method == Method::Bye
                        && state.dialog.as_ref().is_some_and(|d| d.call_id == request.call_id);
                    if hung_up {
                        state.dialog = None;
                    }
                    state.last_request = Some(pending);
                    hung_up.then_some(state.call).flatten()
                };
                if let Some(handle) = hung_up {
                    self.release_call_if_done(handle);
                }
                if is_invite && self.config.auto_trying {
                    self.respond_to(&request, StatusCode::Trying).await?;
                }
                Some(UaEvent::Request {
                    transaction_id,
                    request,
                    source,
                })
            }
            TransactionEvent::CancelReceived {
                transaction_id,
                request,
                ..
            } => {
                let invite = {
                    let state = self.state.lock();
                    state
                        .incoming
                        .as_ref()
                        .filter(|p| p.transaction_id == transaction_id)
                        .map(|p| p.request.clone())
                };
                if let Some(invite) = invite.filter(|_| self.config.auto_cancel_487) {
                    self.respond_to(&invite, StatusCode::RequestTerminated).await?;
                }
                Some(UaEvent::Cancelled {
                    invite_id: transaction_id,
                    request,
                })
            }
            TransactionEvent::AckReceived { request, .. } | TransactionEvent::StrayAck { request, .. } => {
                Some(UaEvent::Ack { request })
            }
            TransactionEvent::ProvisionalResponse {
                transaction_id,
                response,
            } => Some(UaEvent::Provisional {
                transaction_id,
                response,
            }),
            TransactionEvent::SuccessResponse {
                transaction_id,
                response,
                ..
            } => {
                if response.cseq.method == Method::Invite {
                    let mut state = self.state.lock();
                    if let Some((request, _)) = state.outgoing.get(&transaction_id) {
                        let remote_target = response
                            .contacts
                            .iter()
                            .find_map(|c| c.uri())
                            .cloned()
                            .unwrap_or_else(|| request.uri.clone());
                        state.dialog = Some(Dialog {
                            call_id: request.call_id.clone(),
                            local: request.from.clone(),
                            remote: response.to.clone(),
                            remote_target,
                            local_cseq: request.cseq.seq,
                        });
                    }
                }
                Some(UaEvent::Final {
                    transaction_id,
                    response,
                })
            }
            TransactionEvent::FailureResponse {
                transaction_id,
                response,
            } => {
                let challenged = matches!(
                    response.status,
                    StatusCode::Unauthorized | StatusCode::ProxyAuthenticationRequired
                );
                if challenged {
                    let mut state = self.state.lock();
                    if let Some((request, destination)) = state.outgoing.get(&transaction_id).cloned() {
                        state.challenge = Some(Challenge {
                            request,
                            destination,
                            response: response.clone(),
                        });
                    }
                }
                if challenged && self.config.auto_digest_retry {
                    if let Err(e) = self.digest_respond().await {
                        warn!(aor = %self.config.aor, error = %e, "Automatic digest retry failed");
                    }
                }
                Some(UaEvent::Final {
                    transaction_id,
                    response,
                })
            }
            TransactionEvent::TransactionTimeout { transaction_id } => Some(UaEvent::Timeout { transaction_id }),
            TransactionEvent::TransportError { transaction_id, error } => {
                Some(UaEvent::TransportError { transaction_id, error })
            }
            TransactionEvent::TransactionTerminated { transaction_id } => {
                self.state.lock().outgoing.remove(&transaction_id);
                if let Some(handle) = ended_call {
                    self.release_call_if_done(handle);
                }
                Some(UaEvent::Terminated { transaction_id })
            }
            TransactionEvent::Error { transaction_id, error } => {
                warn!(aor = %self.config.aor, ?transaction_id, %error, "Transaction layer error");
                None
            }
            TransactionEvent::SuccessRetransmission { .. }
            | TransactionEvent::AckRetransmission { .. }
            | TransactionEvent::StrayResponse { .. }
            | TransactionEvent::StateChanged { .. } => None,
        };
        Ok(ua_event)
    }

    /// Forgets a call once its INVITE transaction is over, keeping an
    /// answered one while its dialog lasts so late 2xx still get the ACK.
    fn release_call_if_done(&self, handle: CallHandle) {
        let Some(call) = self.calls.call(handle) else { return };
        if !call.invite_terminated {
            return;
        }
        let mut state = self.state.lock();
        let in_dialog = state
            .dialog
            .as_ref()
            .is_some_and(|d| d.call_id == call.request.call_id);
        if call.is_answered() && in_dialog {
            return;
        }
        if state.call == Some(handle) {
            state.call = None;
        }
        drop(state);
        self.calls.release(handle);
        debug!(aor = %self.config.aor, %handle, "Call released");
    }

    fn local_name_addr(&self) -> NameAddr {
        let name = NameAddr::new(self.config.aor.clone());
        match &self.config.aor.user {
            Some(user) => name.with_display_name(user.clone()),
            None => name,
        }
    }
}

impl std::fmt::Debug for UserAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAgent")
            .field("aor", &self.config.aor)
            .field("local_addr", &self.local_addr)
            .field("contact", &self.contact)
            .finish()
    }
}
