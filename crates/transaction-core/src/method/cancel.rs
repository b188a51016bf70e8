//! CANCEL method utilities for SIP transactions
//!
//! Implements the CANCEL rules of RFC 3261 Section 9, with one deviation: the
//! CANCEL travels on its own branch, so it is a transaction of its own at
//! every hop and is matched to the INVITE by dialog fields rather than branch.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};

use tfm_sip_core::{generate_branch, CSeq, Method, Request, Via};

use crate::error::{Error, Result};

/// Creates a CANCEL request for `invite_request`.
///
/// The CANCEL has the same Request-URI, Route set, Call-ID, From, To and
/// CSeq number as the INVITE, CSeq method CANCEL and a single Via for
/// `local_addr` with a new branch.
pub fn create_cancel_request(invite_request: &Request, local_addr: &SocketAddr) -> Result<Request> {
    if invite_request.method != Method::Invite {
        return Err(Error::Other("Cannot create CANCEL for non-INVITE request".to_string()));
    }

    let transport = invite_request
        .top_via()
        .map(|via| via.transport.clone())
        .unwrap_or_else(|| "UDP".to_string());

    Ok(Request {
        method: Method::Cancel,
        uri: invite_request.uri.clone(),
        via: vec![Via::new(transport, local_addr.to_string(), generate_branch())],
        from: invite_request.from.clone(),
        to: invite_request.to.clone(),
        call_id: invite_request.call_id.clone(),
        cseq: CSeq::new(invite_request.cseq.seq, Method::Cancel),
        max_forwards: invite_request.max_forwards,
        contacts: Vec::new(),
        route: invite_request.route.clone(),
        expires: None,
        authorization: None,
        headers: Vec::new(),
        body: Default::default(),
    })
}

/// True when `cancel` targets `invite`: same Call-ID, From tag, CSeq number
/// and Request-URI.
pub fn is_cancel_for_invite(cancel: &Request, invite: &Request) -> bool {
    cancel.method == Method::Cancel
        && invite.method == Method::Invite
        && cancel.call_id == invite.call_id
        && cancel.from_tag() == invite.from_tag()
        && cancel.cseq.seq == invite.cseq.seq
        && cancel.uri == invite.uri
}

const GATE_OPEN: u8 = 0;
const GATE_CANCELLED: u8 = 1;
const GATE_FINAL: u8 = 2;

/// Outcome of [`FinalResponseGate::try_cancel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCancel {
    /// This CANCEL moved the gate from Open to Cancelled
    Cancelled,
    /// An earlier CANCEL already did
    AlreadyCancelled,
    /// A final response was already committed
    FinalSent,
}

/// Decides the race between a CANCEL and the final response of an INVITE
/// server transaction.
///
/// Exactly one of them wins: a CANCEL only succeeds while no final response
/// has been committed, and once it has succeeded the final that follows is
/// the TU's answer to it.
#[derive(Debug)]
pub struct FinalResponseGate {
    state: AtomicU8,
}

impl Default for FinalResponseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalResponseGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(GATE_OPEN),
        }
    }

    pub fn try_cancel(&self) -> GateCancel {
        match self
            .state
            .compare_exchange(GATE_OPEN, GATE_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => GateCancel::Cancelled,
            Err(GATE_CANCELLED) => GateCancel::AlreadyCancelled,
            Err(_) => GateCancel::FinalSent,
        }
    }

    /// Records that a final response is being sent. Returns true when this
    /// is the first final.
    pub fn commit_final(&self) -> bool {
        self.state.swap(GATE_FINAL, Ordering::AcqRel) != GATE_FINAL
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == GATE_CANCELLED
    }

    pub fn is_final(&self) -> bool {
        self.state.load(Ordering::Acquire) == GATE_FINAL
    }
}
