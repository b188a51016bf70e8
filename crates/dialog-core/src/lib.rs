//! # Call coordination for the tfm harness
//!
//! [`CallCoordinator`] sits between a transaction user and its
//! [`TransactionManager`](tfm_transaction_core::TransactionManager). For every
//! outgoing INVITE it tracks the client transaction, the CANCEL that may
//! follow and the ACK of a 2xx, and it turns transaction failures into the
//! final responses a caller expects: 408 after a timeout, 503 after a
//! transport failure.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use tfm_dialog_core::{CallCoordinator, CallEvent, CancelOutcome};
//! # async fn example(
//! #     manager: tfm_transaction_core::TransactionManager,
//! #     mut events: tokio::sync::mpsc::Receiver<tfm_transaction_core::TransactionEvent>,
//! #     invite: tfm_sip_core::Request,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let calls = Arc::new(CallCoordinator::new(manager));
//! let handle = calls.invite(invite, "127.0.0.1:5070".parse()?).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match calls.handle_event(&event).await {
//!         Some(CallEvent::Provisional { .. }) => {
//!             let outcome = calls.cancel(handle).await?;
//!             assert!(matches!(outcome, CancelOutcome::Sent(_)));
//!         }
//!         Some(CallEvent::Final { response, .. }) => println!("final {}", response.status),
//!         Some(CallEvent::Terminated { .. }) => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod coordinator;
pub mod errors;

pub use call::{CallContext, CallEvent, CallHandle, CancelOutcome, IncomingCall};
pub use coordinator::CallCoordinator;
pub use errors::{CallError, CallResult};
