//! In-process simulated network.
//!
//! Endpoints bind socket addresses on a shared [`MemoryNetwork`]. A send is
//! handed straight to the destination's event channel, so messages between a
//! given pair of endpoints arrive in the order they were sent. Sending to an
//! address nobody has bound (or whose transport was closed) fails with
//! [`Error::ConnectionRefused`], which is how the harness simulates a
//! transport failure. Packet loss is silent: the sender sees success.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use tfm_sip_core::Message;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Predicate used to select packets for fault injection
pub type PacketFilter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// A packet that crossed (or was dropped by) the network
#[derive(Debug, Clone)]
pub struct Packet {
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub message: Message,
    pub dropped: bool,
}

struct DropRule {
    filter: PacketFilter,
    remaining: usize,
}

struct Endpoint {
    events_tx: mpsc::Sender<TransportEvent>,
}

struct NetworkInner {
    endpoints: DashMap<SocketAddr, Endpoint>,
    unreachable: DashSet<SocketAddr>,
    drop_rules: Mutex<Vec<DropRule>>,
    loss_rate: Mutex<f64>,
    rng: Mutex<SmallRng>,
    capture: Mutex<Vec<Packet>>,
}

impl NetworkInner {
    /// Decides whether this packet is lost.
    fn should_drop(&self, message: &Message) -> bool {
        {
            let mut rules = self.drop_rules.lock();
            if let Some(rule) = rules.iter_mut().find(|r| r.remaining > 0 && (r.filter)(message)) {
                rule.remaining -= 1;
                rules.retain(|r| r.remaining > 0);
                return true;
            }
        }
        let rate = *self.loss_rate.lock();
        rate > 0.0 && self.rng.lock().gen_bool(rate.min(1.0))
    }
}

/// Shared in-memory network
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("endpoints", &self.inner.endpoints.len())
            .finish()
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        MemoryNetwork {
            inner: Arc::new(NetworkInner {
                endpoints: DashMap::new(),
                unreachable: DashSet::new(),
                drop_rules: Mutex::new(Vec::new()),
                loss_rate: Mutex::new(0.0),
                rng: Mutex::new(SmallRng::from_entropy()),
                capture: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Binds an unreliable (datagram-like) endpoint at `addr`.
    pub fn bind(&self, addr: SocketAddr) -> Result<(MemoryTransport, mpsc::Receiver<TransportEvent>)> {
        self.bind_with(addr, false, None)
    }

    /// Binds a reliable (stream-like) endpoint at `addr`.
    pub fn bind_reliable(&self, addr: SocketAddr) -> Result<(MemoryTransport, mpsc::Receiver<TransportEvent>)> {
        self.bind_with(addr, true, None)
    }

    pub fn bind_with(
        &self,
        addr: SocketAddr,
        reliable: bool,
        channel_capacity: Option<usize>,
    ) -> Result<(MemoryTransport, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        match self.inner.endpoints.entry(addr) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(Error::AddressInUse(addr)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Endpoint {
                    events_tx: events_tx.clone(),
                });
            }
        }
        info!("Memory transport bound to {} (reliable: {})", addr, reliable);

        let transport = MemoryTransport {
            inner: Arc::new(MemoryTransportInner {
                local_addr: addr,
                reliable,
                closed: AtomicBool::new(false),
                events_tx,
                network: self.inner.clone(),
            }),
        };
        Ok((transport, events_rx))
    }

    /// Silently drops the next `count` packets matching `filter`.
    pub fn drop_next(&self, filter: PacketFilter, count: usize) {
        if count > 0 {
            self.inner.drop_rules.lock().push(DropRule { filter, remaining: count });
        }
    }

    /// Random loss probability for every packet, in `0.0..=1.0`.
    pub fn set_loss_rate(&self, rate: f64) {
        *self.inner.loss_rate.lock() = rate.clamp(0.0, 1.0);
    }

    /// Reseeds the loss generator so lossy runs are repeatable.
    pub fn set_seed(&self, seed: u64) {
        *self.inner.rng.lock() = SmallRng::seed_from_u64(seed);
    }

    /// Makes sends to `addr` fail with [`Error::Unreachable`].
    pub fn set_unreachable(&self, addr: SocketAddr, unreachable: bool) {
        if unreachable {
            self.inner.unreachable.insert(addr);
        } else {
            self.inner.unreachable.remove(&addr);
        }
    }

    pub fn is_bound(&self, addr: &SocketAddr) -> bool {
        self.inner.endpoints.contains_key(addr)
    }

    /// Every packet sent so far, dropped ones included, in send order.
    pub fn captured(&self) -> Vec<Packet> {
        self.inner.capture.lock().clone()
    }

    pub fn clear_capture(&self) {
        self.inner.capture.lock().clear();
    }
}

struct MemoryTransportInner {
    local_addr: SocketAddr,
    reliable: bool,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    network: Arc<NetworkInner>,
}

/// One endpoint on a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryTransportInner>,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("local_addr", &self.inner.local_addr)
            .field("reliable", &self.inner.reliable)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let network = &self.inner.network;
        let source = self.inner.local_addr;

        if network.unreachable.contains(&destination) {
            debug!("{} -> {}: destination unreachable", source, destination);
            return Err(Error::Unreachable(destination));
        }

        let events_tx = match network.endpoints.get(&destination) {
            Some(endpoint) => endpoint.events_tx.clone(),
            None => {
                debug!("{} -> {}: connection refused", source, destination);
                return Err(Error::ConnectionRefused(destination));
            }
        };

        let dropped = network.should_drop(&message);
        network.capture.lock().push(Packet {
            source,
            destination,
            message: message.clone(),
            dropped,
        });

        if dropped {
            trace!("{} -> {}: dropped {}", source, destination, message.short_description());
            return Ok(());
        }

        trace!("{} -> {}: {}", source, destination, message.short_description());
        events_tx
            .send(TransportEvent::MessageReceived {
                message,
                source,
                destination,
            })
            .await
            .map_err(|_| Error::ConnectionRefused(destination))
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.network.endpoints.remove(&self.inner.local_addr);
        info!("Memory transport {} closed", self.inner.local_addr);
        self.inner
            .events_tx
            .send(TransportEvent::Closed)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn is_reliable(&self) -> bool {
        self.inner.reliable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfm_sip_core::prelude::*;
    use crate::Error;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn options(cseq: u32) -> Message {
        SimpleRequestBuilder::new(Method::Options, "sip:127.0.0.1:5071")
            .unwrap()
            .from("", "sip:a@127.0.0.1", Some("a"))
            .to("", "sip:b@127.0.0.1", None)
            .call_id("net-test")
            .cseq(cseq)
            .via("127.0.0.1:5070", "UDP", None)
            .build()
            .unwrap()
            .into()
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.bind(addr(5070)).unwrap();
        let (_b, mut b_rx) = net.bind(addr(5071)).unwrap();

        for seq in 1..=5 {
            a.send_message(options(seq), addr(5071)).await.unwrap();
        }
        for seq in 1..=5 {
            match b_rx.recv().await.unwrap() {
                TransportEvent::MessageReceived { message, source, .. } => {
                    assert_eq!(source, addr(5070));
                    assert_eq!(message.as_request().unwrap().cseq.seq, seq);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn unbound_or_closed_destination_is_refused() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.bind(addr(5070)).unwrap();
        assert!(matches!(
            a.send_message(options(1), addr(5099)).await,
            Err(Error::ConnectionRefused(_))
        ));

        let (b, mut b_rx) = net.bind(addr(5071)).unwrap();
        b.close().await.unwrap();
        assert!(matches!(b_rx.recv().await, Some(TransportEvent::Closed)));
        assert!(matches!(
            a.send_message(options(1), addr(5071)).await,
            Err(Error::ConnectionRefused(_))
        ));
        assert!(matches!(
            b.send_message(options(1), addr(5070)).await,
            Err(Error::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn drop_next_is_silent() {
        let net = MemoryNetwork::new();
        let (a, _a_rx) = net.bind(addr(5070)).unwrap();
        let (_b, mut b_rx) = net.bind(addr(5071)).unwrap();

        net.drop_next(Arc::new(|m: &Message| m.is_request()), 2);
        for seq in 1..=3 {
            a.send_message(options(seq), addr(5071)).await.unwrap();
        }
        match b_rx.recv().await.unwrap() {
            TransportEvent::MessageReceived { message, .. } => {
                assert_eq!(message.as_request().unwrap().cseq.seq, 3)
            }
            other => panic!("unexpected event {:?}", other),
        }
        let captured = net.captured();
        assert_eq!(captured.len(), 3);
        assert_eq!(captured.iter().filter(|p| p.dropped).count(), 2);
    }

    #[tokio::test]
    async fn full_loss_rate_drops_everything() {
        let net = MemoryNetwork::new();
        net.set_seed(7);
        net.set_loss_rate(1.0);
        let (a, _a_rx) = net.bind(addr(5070)).unwrap();
        let (_b, mut b_rx) = net.bind(addr(5071)).unwrap();
        a.send_message(options(1), addr(5071)).await.unwrap();
        assert!(b_rx.try_recv().is_err());
    }

    #[test]
    fn double_bind_fails() {
        let net = MemoryNetwork::new();
        let _first = net.bind(addr(5070)).unwrap();
        assert!(matches!(net.bind(addr(5070)), Err(Error::AddressInUse(_))));
    }
}
