use std::net::SocketAddr;

use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by a transport. Sending fails synchronously; a packet that
/// is lost on the way is not an error.
#[derive(Error, Debug)]
pub enum Error {
    /// The local transport has been closed
    #[error("Transport closed")]
    TransportClosed,

    /// Nothing is listening at the destination
    #[error("Connection refused by {0}")]
    ConnectionRefused(SocketAddr),

    /// The destination cannot be reached at all
    #[error("Destination unreachable: {0}")]
    Unreachable(SocketAddr),

    /// The address is already bound on the network
    #[error("Address already in use: {0}")]
    AddressInUse(SocketAddr),

    /// Event channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures the caller must treat as a transport failure of the
    /// request or response it tried to send.
    pub fn is_send_failure(&self) -> bool {
        matches!(
            self,
            Error::TransportClosed | Error::ConnectionRefused(_) | Error::Unreachable(_)
        )
    }
}
