//! Error types for registrar-core

use thiserror::Error;

use tfm_sip_core::StatusCode;

/// Result type for registrar operations
pub type Result<T> = std::result::Result<T, RegistrarError>;

/// Registrar error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrarError {
    #[error("No bindings for {0}")]
    AorNotFound(String),

    #[error("Contact user part is {len} bytes, limit is {limit}")]
    ContactUserTooLong { len: usize, limit: usize },

    #[error("Wildcard contact needs Expires: 0 and no other contacts")]
    InvalidWildcard,

    #[error("Invalid REGISTER: {0}")]
    InvalidRegister(String),
}

impl RegistrarError {
    /// Status a registrar answers the REGISTER with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistrarError::ContactUserTooLong { .. } => StatusCode::ServerInternalError,
            RegistrarError::AorNotFound(_) => StatusCode::NotFound,
            RegistrarError::InvalidWildcard | RegistrarError::InvalidRegister(_) => StatusCode::BadRequest,
        }
    }
}
