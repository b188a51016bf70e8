//! Error types for client-core

use std::time::Duration;

use thiserror::Error;

use crate::arena::MessageHandle;

/// Result type for user agent operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors a simulated user agent reports
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] tfm_transaction_core::Error),

    #[error("Call error: {0}")]
    Call(#[from] tfm_dialog_core::CallError),

    #[error("Message error: {0}")]
    Message(#[from] tfm_sip_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] tfm_sip_transport::Error),

    #[error("No call in progress")]
    NoActiveCall,

    #[error("No established dialog")]
    NoDialog,

    #[error("No incoming request to answer")]
    NoPendingRequest,

    #[error("No challenged request to retry")]
    NoChallenge,

    #[error("Unknown message handle {0}")]
    UnknownHandle(MessageHandle),

    #[error("No event within {0:?}")]
    Timeout(Duration),

    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}
