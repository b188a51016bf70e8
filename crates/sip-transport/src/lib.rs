//! SIP transport boundary for the tfm harness
//!
//! This crate defines the [`Transport`] trait the transaction layer sends
//! through and the [`TransportEvent`]s it receives, together with an
//! in-process [`MemoryNetwork`] that simulated endpoints bind to.

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::memory::{MemoryNetwork, MemoryTransport, Packet, PacketFilter};
pub use transport::{Transport, TransportEvent};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{Error, MemoryNetwork, MemoryTransport, Result, Transport, TransportEvent};
}
