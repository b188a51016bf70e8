//! Error types for call coordination

use thiserror::Error;

use crate::call::CallHandle;

/// Result type for call coordination
pub type CallResult<T> = std::result::Result<T, CallError>;

/// Errors raised by the [`CallCoordinator`](crate::CallCoordinator)
#[derive(Error, Debug)]
pub enum CallError {
    /// The transaction layer refused the operation
    #[error("Transaction error: {0}")]
    Transaction(#[from] tfm_transaction_core::Error),

    /// Building a message failed
    #[error("Message error: {0}")]
    Message(#[from] tfm_sip_core::Error),

    /// No call is known under this handle
    #[error("Call not found: {0}")]
    CallNotFound(CallHandle),

    /// ACK requested before a 2xx was received
    #[error("Call {0} has no 2xx to acknowledge")]
    NoSuccessResponse(CallHandle),

    /// The request cannot start a call
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
