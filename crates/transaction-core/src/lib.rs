//! # RFC 3261 transaction layer for the tfm harness
//!
//! This crate implements the four SIP transaction state machines of
//! RFC 3261 Section 17 and the manager that routes messages to them:
//!
//! - Client INVITE (Calling, Proceeding, Completed, Terminated) with Timers A, B and D
//! - Client non-INVITE (Trying, Proceeding, Completed, Terminated) with Timers E, F and K
//! - Server INVITE (Proceeding, Completed, Confirmed, Terminated) with Timers G, H and I
//! - Server non-INVITE (Trying, Proceeding, Completed, Terminated) with Timer J
//!
//! Each transaction runs as its own task and processes its inputs one at a
//! time. Timer firings, received messages and TU commands all arrive on the
//! same command channel, so a transaction never has to lock its own state.
//!
//! ## CANCEL and the final response
//!
//! Every server INVITE transaction owns a [`FinalResponseGate`]. A CANCEL and
//! a final response race for it; whichever closes it first wins. A CANCEL
//! that wins is answered 200 and reported as
//! [`TransactionEvent::CancelReceived`]; one that loses is answered 481.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tfm_sip_core::prelude::*;
//! use tfm_sip_transport::MemoryNetwork;
//! use tfm_transaction_core::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let network = MemoryNetwork::new();
//! let (transport, transport_rx) = network.bind("127.0.0.1:5060".parse()?)?;
//! let (manager, mut events) =
//!     TransactionManager::new(Arc::new(transport), transport_rx, TransactionManagerConfig::default()).await?;
//!
//! let request = SimpleRequestBuilder::new(Method::Options, "sip:bob@127.0.0.1:5070")?
//!     .from("Alice", "sip:alice@127.0.0.1", Some(&generate_tag()))
//!     .to("Bob", "sip:bob@127.0.0.1", None)
//!     .call_id(&generate_call_id("127.0.0.1"))
//!     .cseq(1)
//!     .via("127.0.0.1:5060", "UDP", Some(&generate_branch()))
//!     .build()?;
//!
//! let id = manager
//!     .create_client_transaction(request, "127.0.0.1:5070".parse()?)
//!     .await?;
//! manager.send_request(&id).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         TransactionEvent::SuccessResponse { response, .. } => {
//!             println!("got {}", response.status);
//!         }
//!         TransactionEvent::TransactionTerminated { .. } => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod manager;
pub mod method;
pub mod server;
pub mod timer;
pub mod transaction;

pub use client::{ClientInviteTransaction, ClientNonInviteTransaction, ClientTransaction};
pub use error::{Error, Result};
pub use manager::{TransactionManager, TransactionManagerConfig, DEFAULT_EVENT_CAPACITY};
pub use method::ack::{create_ack_for_2xx, create_ack_for_error_response, is_ack_for_2xx};
pub use method::cancel::{create_cancel_request, is_cancel_for_invite, FinalResponseGate, GateCancel};
pub use server::{ServerInviteTransaction, ServerNonInviteTransaction, ServerTransaction};
pub use timer::{TimerHandle, TimerManager, TimerSettings, TimerType};
pub use transaction::{
    Direction, LoggedMessage, Transaction, TransactionEvent, TransactionKey, TransactionKind, TransactionState,
};

/// Re-export of common types
pub mod prelude {
    pub use crate::manager::{TransactionManager, TransactionManagerConfig};
    pub use crate::timer::{TimerSettings, TimerType};
    pub use crate::transaction::{
        Direction, LoggedMessage, TransactionEvent, TransactionKey, TransactionKind, TransactionState,
    };
}
