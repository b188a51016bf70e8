mod data;
mod invite;
mod non_invite;

pub use data::{ClientTransactionData, CommandSender};
pub use invite::ClientInviteTransaction;
pub use non_invite::ClientNonInviteTransaction;

use async_trait::async_trait;

use tfm_sip_core::{Request, Response};

use crate::error::Result;
use crate::transaction::Transaction;

/// Common interface for client transactions
#[async_trait]
pub trait ClientTransaction: Transaction {
    /// Sends the request and starts Timers A/B (INVITE) or E/F (non-INVITE).
    async fn initiate(&self) -> Result<()>;

    /// Queues a response that matched this transaction.
    async fn process_response(&self, response: Response) -> Result<()>;

    /// INVITE only: the ACK the transaction sent for a non-2xx final response.
    fn ack_request(&self) -> Option<Request> {
        None
    }
}
