//! Transaction user boundary
//!
//! A [`TransactionUser`] decides what a simulated endpoint does about each
//! event its transactions report. Every hook returns an [`Action`] that
//! [`UserAgent::drive`](crate::UserAgent::drive) runs in the context of the
//! triggering message. Hooks default to [`Action::NoAction`].
//!
//! ```
//! use async_trait::async_trait;
//! use tfm_client_core::{Action, TransactionUser};
//! use tfm_sip_core::{Method, Request};
//!
//! /// Rings then answers every INVITE, accepts everything else.
//! struct Answering;
//!
//! #[async_trait]
//! impl TransactionUser for Answering {
//!     async fn on_request(&self, request: &Request) -> Action {
//!         if request.method == Method::Invite {
//!             Action::Chain(vec![Action::Ring, Action::Answer])
//!         } else {
//!             Action::Ok
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;

use tfm_sip_core::{Request, Response};
use tfm_transaction_core::TransactionKey;

use crate::action::Action;

#[async_trait]
pub trait TransactionUser: Send + Sync {
    /// A new request reached a server transaction.
    async fn on_request(&self, _request: &Request) -> Action {
        Action::NoAction
    }

    async fn on_provisional(&self, _response: &Response) -> Action {
        Action::NoAction
    }

    /// Final response to a request we sent. For a non-2xx INVITE response the
    /// transaction has already sent the ACK.
    async fn on_final_response(&self, _response: &Response) -> Action {
        Action::NoAction
    }

    async fn on_timeout(&self, _transaction_id: &TransactionKey) -> Action {
        Action::NoAction
    }

    async fn on_transport_error(&self, _transaction_id: &TransactionKey, _error: &str) -> Action {
        Action::NoAction
    }

    /// The caller cancelled an INVITE we had not answered. The CANCEL itself
    /// was already answered with 200.
    async fn on_cancel(&self, _cancel: &Request) -> Action {
        Action::NoAction
    }

    async fn on_ack(&self, _ack: &Request) -> Action {
        Action::NoAction
    }
}
