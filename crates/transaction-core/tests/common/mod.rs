//! Helpers shared by the transaction-core integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use tfm_sip_core::prelude::*;
use tfm_sip_transport::{MemoryNetwork, MemoryTransport, Packet, TransportEvent};
use tfm_transaction_core::{TransactionEvent, TransactionManager, TransactionManagerConfig};

pub const CLIENT_ADDR: &str = "127.0.0.1:5060";
pub const SERVER_ADDR: &str = "127.0.0.1:5070";

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// A transaction manager bound on a memory network.
pub struct Endpoint {
    pub manager: TransactionManager,
    pub events: mpsc::Receiver<TransactionEvent>,
    pub addr: SocketAddr,
}

/// Installs a test writer subscriber once; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn endpoint(network: &MemoryNetwork, address: &str, config: TransactionManagerConfig) -> Endpoint {
    init_tracing();
    let addr = addr(address);
    let (transport, rx) = network.bind(addr).unwrap();
    let (manager, events) = TransactionManager::new(Arc::new(transport), rx, config)
        .await
        .unwrap();
    Endpoint { manager, events, addr }
}

/// A bare transport used to play the remote side by hand.
pub struct RawPeer {
    pub transport: MemoryTransport,
    pub rx: mpsc::Receiver<TransportEvent>,
    pub addr: SocketAddr,
}

pub fn raw_peer(network: &MemoryNetwork, address: &str) -> RawPeer {
    let addr = addr(address);
    let (transport, rx) = network.bind(addr).unwrap();
    RawPeer { transport, rx, addr }
}

impl RawPeer {
    pub async fn send(&self, message: Message, destination: SocketAddr) {
        use tfm_sip_transport::Transport;
        self.transport.send_message(message, destination).await.unwrap();
    }

    pub async fn recv(&mut self) -> Message {
        match timeout(Duration::from_secs(60), self.rx.recv()).await {
            Ok(Some(TransportEvent::MessageReceived { message, .. })) => message,
            other => panic!("expected a message, got {:?}", other),
        }
    }

    pub async fn recv_response(&mut self) -> Response {
        match self.recv().await {
            Message::Response(r) => r,
            other => panic!("expected a response, got {}", other.short_description()),
        }
    }

    pub async fn recv_request(&mut self) -> Request {
        match self.recv().await {
            Message::Request(r) => r,
            other => panic!("expected a request, got {}", other.short_description()),
        }
    }

    /// Next request with `method`, skipping anything else (retransmissions).
    pub async fn recv_request_of(&mut self, method: Method) -> Request {
        loop {
            if let Message::Request(r) = self.recv().await {
                if r.method == method {
                    return r;
                }
            }
        }
    }

    /// Next response with `status`, skipping anything else.
    pub async fn recv_response_of(&mut self, status: StatusCode) -> Response {
        loop {
            if let Message::Response(r) = self.recv().await {
                if r.status == status {
                    return r;
                }
            }
        }
    }
}

pub fn request(method: Method, from_addr: &str, to_addr: &str) -> Request {
    SimpleRequestBuilder::new(method, &format!("sip:bob@{}", to_addr))
        .unwrap()
        .from("Alice", "sip:alice@127.0.0.1", Some(&generate_tag()))
        .to("Bob", "sip:bob@127.0.0.1", None)
        .call_id(&generate_call_id("127.0.0.1"))
        .cseq(1)
        .via(from_addr, "UDP", Some(&generate_branch()))
        .build()
        .unwrap()
}

pub fn response(req: &Request, status: StatusCode) -> Response {
    SimpleResponseBuilder::response_from_request(req, status, None).build()
}

/// Waits for the first event matching `pred`, skipping others.
pub async fn wait_for<F>(events: &mut mpsc::Receiver<TransactionEvent>, mut pred: F) -> TransactionEvent
where
    F: FnMut(&TransactionEvent) -> bool,
{
    let deadline = Duration::from_secs(300);
    timeout(deadline, async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Drains every event currently queued or arriving within `window`.
pub async fn drain(events: &mut mpsc::Receiver<TransactionEvent>, window: Duration) -> Vec<TransactionEvent> {
    let mut out = Vec::new();
    while let Ok(Some(event)) = timeout(window, events.recv()).await {
        out.push(event);
    }
    out
}

/// Packets sent from `from` carrying a request with `method`.
pub fn sent_requests(packets: &[Packet], from: SocketAddr, method: Method) -> usize {
    packets
        .iter()
        .filter(|p| p.source == from)
        .filter(|p| matches!(&p.message, Message::Request(r) if r.method == method))
        .count()
}

/// Packets sent from `from` carrying a response with `status`.
pub fn sent_responses(packets: &[Packet], from: SocketAddr, status: StatusCode) -> usize {
    packets
        .iter()
        .filter(|p| p.source == from)
        .filter(|p| matches!(&p.message, Message::Response(r) if r.status == status))
        .count()
}
