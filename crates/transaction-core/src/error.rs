use thiserror::Error;

use crate::transaction::{TransactionKey, TransactionKind, TransactionState};

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in SIP transaction handling
#[derive(Error, Debug)]
pub enum Error {
    /// Error originating from the sip-core crate (building messages, URIs)
    #[error("SIP core error: {0}")]
    SipCore(#[from] tfm_sip_core::Error),

    /// Error originating from the sip-transport crate
    #[error("SIP transport error: {0}")]
    TransportError(#[from] tfm_sip_transport::Error),

    /// Transaction not found for the given key
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionKey),

    /// Transaction with the given key already exists
    #[error("Transaction already exists: {0}")]
    TransactionExists(TransactionKey),

    /// Invalid transaction state transition attempted
    #[error("Invalid state transition for {kind:?}: {from:?} -> {to:?}")]
    InvalidStateTransition {
        kind: TransactionKind,
        from: TransactionState,
        to: TransactionState,
    },

    /// Transaction timed out (Timers B, F, H)
    #[error("Transaction timed out: {0}")]
    TransactionTimeout(TransactionKey),

    /// The message cannot start or belong to a transaction
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Internal channel error (e.g., receiver dropped)
    #[error("Internal channel closed")]
    ChannelClosed,

    /// Other miscellaneous errors
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    pub fn invalid_state_transition(kind: TransactionKind, from: TransactionState, to: TransactionState) -> Self {
        Error::InvalidStateTransition { kind, from, to }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}
