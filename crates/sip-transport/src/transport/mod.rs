//! The transport boundary used by the transaction layer.

pub mod memory;

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use tfm_sip_core::Message;

use crate::error::Result;

/// Events a transport delivers to its owner
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A SIP message arrived
    MessageReceived {
        message: Message,
        source: SocketAddr,
        destination: SocketAddr,
    },
    /// Asynchronous transport failure
    Error { error: String },
    /// The transport was closed
    Closed,
}

/// A transport able to send SIP messages to a socket address.
///
/// Received messages are reported through the `mpsc::Receiver<TransportEvent>`
/// handed out when the transport is bound.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Address this transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Sends `message` to `destination`. Returns once the message has left;
    /// delivery is not confirmed.
    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()>;

    /// Closes the transport. Further sends fail with `TransportClosed`.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Reliable transports (stream oriented) never need retransmissions.
    fn is_reliable(&self) -> bool {
        false
    }
}
