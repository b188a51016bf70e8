//! Per-call state tracked by the coordinator.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tfm_sip_core::{Request, Response, StatusCode};
use tfm_transaction_core::TransactionKey;

/// Opaque handle of an outgoing call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallHandle(Uuid);

impl CallHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// What [`CallCoordinator::cancel`](crate::CallCoordinator::cancel) did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A CANCEL was sent on its own client transaction
    Sent(TransactionKey),
    /// No provisional response yet; the CANCEL goes out with the first one
    Deferred,
    /// A final response was already received; nothing was sent
    AlreadyCompleted,
}

/// Everything the coordinator knows about one outgoing INVITE.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub handle: CallHandle,
    /// Client INVITE transaction
    pub invite_id: TransactionKey,
    pub request: Request,
    pub destination: SocketAddr,
    /// Client CANCEL transaction, once sent
    pub cancel_id: Option<TransactionKey>,
    pub provisional_seen: bool,
    /// Final response received (or synthesized) for the INVITE
    pub final_response: Option<Response>,
    /// CANCEL requested before any provisional response
    pub pending_cancel: bool,
    /// ACK sent for the 2xx, repeated on every 2xx retransmission
    pub ack: Option<Request>,
    pub invite_terminated: bool,
    pub created_at: DateTime<Utc>,
}

impl CallContext {
    pub(crate) fn new(handle: CallHandle, invite_id: TransactionKey, request: Request, destination: SocketAddr) -> Self {
        Self {
            handle,
            invite_id,
            request,
            destination,
            cancel_id: None,
            provisional_seen: false,
            final_response: None,
            pending_cancel: false,
            ack: None,
            invite_terminated: false,
            created_at: Utc::now(),
        }
    }

    pub fn final_status(&self) -> Option<StatusCode> {
        self.final_response.as_ref().map(|r| r.status)
    }

    pub fn is_answered(&self) -> bool {
        self.final_status().is_some_and(|s| s.is_success())
    }

    /// True once CANCEL was sent or is waiting for the first provisional.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_id.is_some() || self.pending_cancel
    }
}

/// Server side view of an incoming INVITE.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub invite_id: TransactionKey,
    pub request: Request,
    pub source: SocketAddr,
    /// The caller's CANCEL won against our final response
    pub cancelled: bool,
    pub received_at: DateTime<Utc>,
}

/// Call level view of transaction events
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// A 1xx for the INVITE
    Provisional { handle: CallHandle, response: Response },
    /// The INVITE's final response. `synthesized` is true for the 408/503
    /// the coordinator made up after a timeout or a transport failure.
    Final {
        handle: CallHandle,
        response: Response,
        synthesized: bool,
    },
    /// The final response to our CANCEL
    CancelAnswered { handle: CallHandle, response: Response },
    /// The INVITE client transaction is gone
    Terminated { handle: CallHandle },
}

impl CallEvent {
    pub fn handle(&self) -> CallHandle {
        match self {
            CallEvent::Provisional { handle, .. }
            | CallEvent::Final { handle, .. }
            | CallEvent::CancelAnswered { handle, .. }
            | CallEvent::Terminated { handle } => *handle,
        }
    }
}
