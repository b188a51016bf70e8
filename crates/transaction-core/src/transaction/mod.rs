//! Types shared by every transaction kind: keys, states, events, commands
//! and the generic event loop.

pub mod key;
pub mod log;
pub mod logic;
pub mod runner;
pub mod state;

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tfm_sip_core::{Message, Request, Response};

use crate::error::Result;
use crate::timer::TimerHandle;

pub use key::{TransactionId, TransactionKey};
pub use log::{Direction, LoggedMessage, MessageLog};
pub use state::{AtomicTransactionState, TransactionState};

/// The four RFC 3261 transaction state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Client INVITE transaction (RFC 3261 Section 17.1.1)
    InviteClient,
    /// Client non-INVITE transaction (RFC 3261 Section 17.1.2)
    NonInviteClient,
    /// Server INVITE transaction (RFC 3261 Section 17.2.1)
    InviteServer,
    /// Server non-INVITE transaction (RFC 3261 Section 17.2.2)
    NonInviteServer,
}

impl TransactionKind {
    pub fn is_client(&self) -> bool {
        matches!(self, TransactionKind::InviteClient | TransactionKind::NonInviteClient)
    }

    pub fn is_invite(&self) -> bool {
        matches!(self, TransactionKind::InviteClient | TransactionKind::InviteServer)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::InviteClient => "INVITE client",
            TransactionKind::NonInviteClient => "non-INVITE client",
            TransactionKind::InviteServer => "INVITE server",
            TransactionKind::NonInviteServer => "non-INVITE server",
        };
        f.write_str(name)
    }
}

/// Commands processed, one at a time, by a transaction's event loop.
#[derive(Debug, Clone)]
pub enum InternalTransactionCommand {
    /// Move to the given state
    TransitionTo(TransactionState),
    /// A message from the network that matched this transaction
    ProcessMessage(Message),
    /// A timer armed by this transaction fired
    Timer(TimerHandle),
    /// Server transactions: a response from the TU to transmit
    SendResponse(Response),
    /// Stop the transaction now
    Terminate,
}

/// Events reported to the transaction user.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// A request that created a new server transaction
    NewRequest {
        transaction_id: TransactionKey,
        request: Request,
        source: SocketAddr,
    },

    /// A 1xx received by a client transaction
    ProvisionalResponse {
        transaction_id: TransactionKey,
        response: Response,
    },

    /// A 2xx received by a client transaction. `need_ack` is set for INVITE,
    /// whose 2xx is acknowledged by the TU.
    SuccessResponse {
        transaction_id: TransactionKey,
        response: Response,
        need_ack: bool,
    },

    /// A 3xx-6xx received by a client transaction
    FailureResponse {
        transaction_id: TransactionKey,
        response: Response,
    },

    /// A retransmitted 2xx to INVITE; the TU should repeat its ACK
    SuccessRetransmission {
        transaction_id: TransactionKey,
        response: Response,
    },

    /// First ACK for a final response of an INVITE server transaction
    AckReceived {
        transaction_id: TransactionKey,
        request: Request,
    },

    /// A later ACK for a 2xx. ACKs of non-2xx finals are absorbed instead.
    AckRetransmission {
        transaction_id: TransactionKey,
        request: Request,
    },

    /// A CANCEL matched a pending INVITE server transaction and was
    /// answered with 200. `transaction_id` is the INVITE's key.
    CancelReceived {
        transaction_id: TransactionKey,
        cancel_transaction_id: TransactionKey,
        request: Request,
    },

    /// A response that matched no client transaction
    StrayResponse {
        response: Response,
        source: SocketAddr,
    },

    /// An ACK that matched no server transaction (normally the ACK for a
    /// 2xx whose transaction is gone)
    StrayAck {
        request: Request,
        source: SocketAddr,
    },

    /// Timer B, F or H expired
    TransactionTimeout {
        transaction_id: TransactionKey,
    },

    /// The transport failed to send a message of this transaction
    TransportError {
        transaction_id: TransactionKey,
        error: String,
    },

    StateChanged {
        transaction_id: TransactionKey,
        previous_state: TransactionState,
        new_state: TransactionState,
    },

    /// The transaction reached Terminated; sent exactly once
    TransactionTerminated {
        transaction_id: TransactionKey,
    },

    Error {
        transaction_id: Option<TransactionKey>,
        error: String,
    },
}

impl TransactionEvent {
    /// Key of the transaction the event belongs to, if any.
    pub fn transaction_id(&self) -> Option<&TransactionKey> {
        match self {
            TransactionEvent::NewRequest { transaction_id, .. }
            | TransactionEvent::ProvisionalResponse { transaction_id, .. }
            | TransactionEvent::SuccessResponse { transaction_id, .. }
            | TransactionEvent::FailureResponse { transaction_id, .. }
            | TransactionEvent::SuccessRetransmission { transaction_id, .. }
            | TransactionEvent::AckReceived { transaction_id, .. }
            | TransactionEvent::AckRetransmission { transaction_id, .. }
            | TransactionEvent::CancelReceived { transaction_id, .. }
            | TransactionEvent::TransactionTimeout { transaction_id }
            | TransactionEvent::TransportError { transaction_id, .. }
            | TransactionEvent::StateChanged { transaction_id, .. }
            | TransactionEvent::TransactionTerminated { transaction_id } => Some(transaction_id),
            TransactionEvent::Error { transaction_id, .. } => transaction_id.as_ref(),
            TransactionEvent::StrayResponse { .. } | TransactionEvent::StrayAck { .. } => None,
        }
    }
}

/// Behaviour common to every transaction.
#[async_trait]
pub trait Transaction: fmt::Debug + Send + Sync {
    fn id(&self) -> &TransactionKey;

    fn kind(&self) -> TransactionKind;

    fn state(&self) -> TransactionState;

    /// Where this transaction sends its messages
    fn remote_addr(&self) -> SocketAddr;

    /// The request that created the transaction
    fn original_request(&self) -> &Request;

    /// Last response received (client) or sent (server)
    fn last_response(&self) -> Option<Response>;

    fn message_log(&self) -> &MessageLog;

    /// Queues a command on the transaction's event loop.
    async fn send_command(&self, cmd: InternalTransactionCommand) -> Result<()>;

    fn is_terminated(&self) -> bool {
        self.state() == TransactionState::Terminated
    }
}
