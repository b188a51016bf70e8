//! Mutable per-agent bookkeeping

use std::collections::HashMap;
use std::net::SocketAddr;

use tfm_dialog_core::CallHandle;
use tfm_sip_core::{NameAddr, Request, Response, Uri};
use tfm_transaction_core::TransactionKey;

use crate::arena::MessageHandle;

/// Incoming request we may still answer.
#[derive(Debug, Clone)]
pub(crate) struct PendingRequest {
    pub transaction_id: TransactionKey,
    pub request: Request,
    pub source: SocketAddr,
    /// To tag of every response we send for it
    pub to_tag: String,
}

/// Dialog established by a 2xx to an INVITE, either side.
#[derive(Debug, Clone)]
pub(crate) struct Dialog {
    pub call_id: String,
    pub local: NameAddr,
    pub remote: NameAddr,
    pub remote_target: Uri,
    pub local_cseq: u32,
}

/// A request that got 401/407 and the challenge.
#[derive(Debug, Clone)]
pub(crate) struct Challenge {
    pub request: Request,
    pub destination: SocketAddr,
    pub response: Response,
}

#[derive(Debug, Default)]
pub(crate) struct UaState {
    pub cseq: u32,
    /// Outgoing call, the last INVITE sent
    pub call: Option<CallHandle>,
    pub dialog: Option<Dialog>,
    /// Unanswered incoming INVITE
    pub incoming: Option<PendingRequest>,
    /// Most recent incoming request of any method
    pub last_request: Option<PendingRequest>,
    pub challenge: Option<Challenge>,
    /// Requests on live client transactions and where they went
    pub outgoing: HashMap<TransactionKey, (Request, SocketAddr)>,
    /// Where saved messages were sent
    pub destinations: HashMap<MessageHandle, SocketAddr>,
}

impl UaState {
    pub fn next_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    /// The pending request a response to `request` belongs to.
    pub fn pending_for(&self, request: &Request) -> Option<&PendingRequest> {
        [self.incoming.as_ref(), self.last_request.as_ref()]
            .into_iter()
            .flatten()
            .find(|p| p.request.branch() == request.branch() && p.request.method == request.method)
    }
}
