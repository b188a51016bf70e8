use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or inspecting SIP messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid SIP method
    #[error("Invalid SIP method: {0}")]
    InvalidMethod(String),

    /// Invalid SIP URI
    #[error("Invalid SIP URI: {0}")]
    InvalidUri(String),

    /// Invalid status code
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// A header required to build the message was not supplied
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    /// The URI host is not an IP literal; name resolution is outside this crate
    #[error("Cannot resolve host: {0}")]
    Unresolvable(String),

    /// Other error with message
    #[error("{0}")]
    Other(String),
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
