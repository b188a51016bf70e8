//! What a user agent observes

use std::net::SocketAddr;

use tfm_sip_core::{Message, Method, Request, Response, StatusCode};
use tfm_transaction_core::TransactionKey;

/// Event returned by [`UserAgent::next_event`](crate::UserAgent::next_event)
#[derive(Debug, Clone)]
pub enum UaEvent {
    /// A new request on a server transaction
    Request {
        transaction_id: TransactionKey,
        request: Request,
        source: SocketAddr,
    },
    /// ACK for a final response we sent
    Ack { request: Request },
    /// The caller cancelled an INVITE we have not answered
    Cancelled {
        invite_id: TransactionKey,
        request: Request,
    },
    Provisional {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// Final response to one of our requests, CANCEL included
    Final {
        transaction_id: TransactionKey,
        response: Response,
    },
    Timeout { transaction_id: TransactionKey },
    TransportError {
        transaction_id: TransactionKey,
        error: String,
    },
    Terminated { transaction_id: TransactionKey },
}

impl UaEvent {
    /// The message that caused the event, if any.
    pub fn message(&self) -> Option<Message> {
        match self {
            UaEvent::Request { request, .. } | UaEvent::Ack { request } | UaEvent::Cancelled { request, .. } => {
                Some(Message::Request(request.clone()))
            }
            UaEvent::Provisional { response, .. } | UaEvent::Final { response, .. } => {
                Some(Message::Response(response.clone()))
            }
            _ => None,
        }
    }

    /// Method of the request, or the CSeq method of the response.
    pub fn method(&self) -> Option<Method> {
        match self {
            UaEvent::Request { request, .. } | UaEvent::Ack { request } | UaEvent::Cancelled { request, .. } => {
                Some(request.method.clone())
            }
            UaEvent::Provisional { response, .. } | UaEvent::Final { response, .. } => {
                Some(response.cseq.method.clone())
            }
            UaEvent::Timeout { transaction_id }
            | UaEvent::TransportError { transaction_id, .. }
            | UaEvent::Terminated { transaction_id } => Some(transaction_id.method().clone()),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UaEvent::Provisional { response, .. } | UaEvent::Final { response, .. } => Some(response.status),
            _ => None,
        }
    }

    pub fn transaction_id(&self) -> Option<&TransactionKey> {
        match self {
            UaEvent::Request { transaction_id, .. }
            | UaEvent::Provisional { transaction_id, .. }
            | UaEvent::Final { transaction_id, .. }
            | UaEvent::Timeout { transaction_id }
            | UaEvent::TransportError { transaction_id, .. }
            | UaEvent::Terminated { transaction_id } => Some(transaction_id),
            UaEvent::Cancelled { invite_id, .. } => Some(invite_id),
            UaEvent::Ack { .. } => None,
        }
    }
}
