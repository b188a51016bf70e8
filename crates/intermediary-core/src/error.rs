//! Error types for the intermediary-core library

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] tfm_transaction_core::Error),

    #[error("Call error: {0}")]
    Call(#[from] tfm_dialog_core::CallError),

    #[error("Message error: {0}")]
    Message(#[from] tfm_sip_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] tfm_sip_transport::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
