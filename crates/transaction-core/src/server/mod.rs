mod data;
mod invite;
mod non_invite;

pub use data::ServerTransactionData;
pub use invite::ServerInviteTransaction;
pub use non_invite::ServerNonInviteTransaction;

use async_trait::async_trait;

use tfm_sip_core::{Request, Response};

use crate::error::Result;
use crate::method::cancel::FinalResponseGate;
use crate::transaction::Transaction;

/// Common interface for server transactions
#[async_trait]
pub trait ServerTransaction: Transaction {
    /// Moves the new transaction into Proceeding (INVITE) or Trying (non-INVITE).
    async fn start(&self) -> Result<()>;

    /// Queues a retransmitted request (or an ACK) that matched this transaction.
    async fn process_request(&self, request: Request) -> Result<()>;

    /// Queues a response from the TU for transmission.
    async fn send_response(&self, response: Response) -> Result<()>;

    /// The CANCEL arbitration gate; only INVITE server transactions have one.
    fn final_response_gate(&self) -> Option<&FinalResponseGate>;
}
