//! Call coordinator against a hand-driven peer on the memory network.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use tfm_dialog_core::{CallCoordinator, CallError, CallEvent, CancelOutcome};
use tfm_sip_core::prelude::*;
use tfm_sip_transport::{MemoryNetwork, MemoryTransport, Transport, TransportEvent};
use tfm_transaction_core::{TransactionEvent, TransactionManager, TransactionManagerConfig};

const CALLER: &str = "127.0.0.1:5060";
const CALLEE: &str = "127.0.0.1:5070";

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

struct Caller {
    calls: Arc<CallCoordinator>,
    events: mpsc::Receiver<TransactionEvent>,
}

impl Caller {
    async fn new(network: &MemoryNetwork) -> Self {
        let (transport, rx) = network.bind(addr(CALLER)).unwrap();
        let (manager, events) = TransactionManager::new(Arc::new(transport), rx, TransactionManagerConfig::default())
            .await
            .unwrap();
        Self {
            calls: Arc::new(CallCoordinator::new(manager)),
            events,
        }
    }

    /// Feeds transaction events to the coordinator until `pred` matches.
    async fn next_call_event<F>(&mut self, mut pred: F) -> CallEvent
    where
        F: FnMut(&CallEvent) -> bool,
    {
        timeout(Duration::from_secs(120), async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if let Some(call_event) = self.calls.handle_event(&event).await {
                    if pred(&call_event) {
                        return call_event;
                    }
                }
            }
        })
        .await
        .expect("no matching call event")
    }
}

struct Callee {
    transport: MemoryTransport,
    rx: mpsc::Receiver<TransportEvent>,
}

impl Callee {
    fn new(network: &MemoryNetwork) -> Self {
        let (transport, rx) = network.bind(addr(CALLEE)).unwrap();
        Self { transport, rx }
    }

    async fn recv_request(&mut self, method: Method) -> Request {
        loop {
            match timeout(Duration::from_secs(120), self.rx.recv()).await {
                Ok(Some(TransportEvent::MessageReceived {
                    message: Message::Request(r),
                    ..
                })) if r.method == method => return r,
                Ok(Some(_)) => continue,
                other => panic!("no {} received: {:?}", method, other),
            }
        }
    }

    async fn respond(&self, request: &Request, status: StatusCode, to_tag: &str) -> Response {
        let response = SimpleResponseBuilder::response_from_request(request, status, None)
            .to_tag(to_tag)
            .build();
        self.transport
            .send_message(response.clone().into(), addr(CALLER))
            .await
            .unwrap();
        response
    }
}

fn invite() -> Request {
    SimpleRequestBuilder::new(Method::Invite, &format!("sip:bob@{}", CALLEE))
        .unwrap()
        .from("Alice", "sip:alice@127.0.0.1", Some(&generate_tag()))
        .to("Bob", "sip:bob@127.0.0.1", None)
        .call_id(&generate_call_id("127.0.0.1"))
        .cseq(1)
        .via(CALLER, "UDP", None)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn cancel_after_ringing_gets_487() {
    let network = MemoryNetwork::new();
    let mut caller = Caller::new(&network).await;
    let mut callee = Callee::new(&network);

    let handle = caller.calls.invite(invite(), addr(CALLEE)).await.unwrap();
    let received = callee.recv_request(Method::Invite).await;
    callee.respond(&received, StatusCode::Ringing, "bob-tag").await;
    caller
        .next_call_event(|e| matches!(e, CallEvent::Provisional { .. }))
        .await;

    let outcome = caller.calls.cancel(handle).await.unwrap();
    let cancel_id = match outcome {
        CancelOutcome::Sent(id) => id,
        other => panic!("expected Sent, got {:?}", other),
    };
    // Asking again reports the same CANCEL
    assert_eq!(caller.calls.cancel(handle).await.unwrap(), CancelOutcome::Sent(cancel_id));

    let cancel = callee.recv_request(Method::Cancel).await;
    assert_ne!(cancel.branch(), received.branch());
    assert_eq!(cancel.uri, received.uri);
    assert_eq!(cancel.route, received.route);
    assert_eq!(cancel.cseq.seq, received.cseq.seq);

    callee.respond(&cancel, StatusCode::Ok, "bob-tag").await;
    callee.respond(&received, StatusCode::RequestTerminated, "bob-tag").await;

    let answered = caller
        .next_call_event(|e| matches!(e, CallEvent::CancelAnswered { .. }))
        .await;
    match answered {
        CallEvent::CancelAnswered { response, .. } => assert_eq!(response.status, StatusCode::Ok),
        _ => unreachable!(),
    }
    match caller.next_call_event(|e| matches!(e, CallEvent::Final { .. })).await {
        CallEvent::Final {
            response, synthesized, ..
        } => {
            assert_eq!(response.status, StatusCode::RequestTerminated);
            assert!(!synthesized);
        }
        _ => unreachable!(),
    }

    // The INVITE transaction ACKs the 487 itself
    let ack = callee.recv_request(Method::Ack).await;
    assert_eq!(ack.branch(), received.branch());

    caller
        .next_call_event(|e| matches!(e, CallEvent::Terminated { .. }))
        .await;
    assert!(caller.calls.call(handle).unwrap().invite_terminated);
}

#[tokio::test(start_paused = true)]
async fn cancel_before_provisional_is_deferred() {
    let network = MemoryNetwork::new();
    let mut caller = Caller::new(&network).await;
    let mut callee = Callee::new(&network);

    let handle = caller.calls.invite(invite(), addr(CALLEE)).await.unwrap();
    let received = callee.recv_request(Method::Invite).await;

    assert_eq!(caller.calls.cancel(handle).await.unwrap(), CancelOutcome::Deferred);
    assert!(caller.calls.call(handle).unwrap().pending_cancel);

    callee.respond(&received, StatusCode::Trying, "bob-tag").await;
    caller
        .next_call_event(|e| matches!(e, CallEvent::Provisional { .. }))
        .await;

    let cancel = callee.recv_request(Method::Cancel).await;
    assert_eq!(cancel.call_id, received.call_id);
    let call = caller.calls.call(handle).unwrap();
    assert!(call.cancel_id.is_some());
    assert!(!call.pending_cancel);
}

#[tokio::test(start_paused = true)]
async fn late_cancel_sends_nothing_and_ack_is_repeated() {
    let network = MemoryNetwork::new();
    let mut caller = Caller::new(&network).await;
    let mut callee = Callee::new(&network);

    let handle = caller.calls.invite(invite(), addr(CALLEE)).await.unwrap();
    let received = callee.recv_request(Method::Invite).await;

    // No 2xx yet: nothing to acknowledge
    assert!(matches!(
        caller.calls.ack(handle).await,
        Err(CallError::NoSuccessResponse(_))
    ));

    let ok = callee.respond(&received, StatusCode::Ok, "bob-tag").await;
    caller
        .next_call_event(|e| matches!(e, CallEvent::Final { .. }))
        .await;

    assert_eq!(
        caller.calls.cancel(handle).await.unwrap(),
        CancelOutcome::AlreadyCompleted
    );

    let ack = caller.calls.ack(handle).await.unwrap();
    let delivered = callee.recv_request(Method::Ack).await;
    assert_eq!(delivered, ack);

    // A retransmitted 200 gets the same ACK again
    callee
        .transport
        .send_message(ok.into(), addr(CALLER))
        .await
        .unwrap();
    loop {
        let event = caller.events.recv().await.unwrap();
        caller.calls.handle_event(&event).await;
        if matches!(event, TransactionEvent::SuccessRetransmission { .. }) {
            break;
        }
    }
    let repeated = callee.recv_request(Method::Ack).await;
    assert_eq!(repeated, ack);

    let cancels = network
        .captured()
        .iter()
        .filter(|p| matches!(&p.message, Message::Request(r) if r.method == Method::Cancel))
        .count();
    assert_eq!(cancels, 0);
}

#[tokio::test(start_paused = true)]
async fn unreachable_callee_yields_synthesized_503() {
    let network = MemoryNetwork::new();
    let mut caller = Caller::new(&network).await;

    let handle = caller.calls.invite(invite(), addr(CALLEE)).await.unwrap();
    match caller.next_call_event(|e| matches!(e, CallEvent::Final { .. })).await {
        CallEvent::Final {
            handle: h,
            response,
            synthesized,
        } => {
            assert_eq!(h, handle);
            assert_eq!(response.status, StatusCode::ServiceUnavailable);
            assert!(synthesized);
        }
        _ => unreachable!(),
    }
    caller
        .next_call_event(|e| matches!(e, CallEvent::Terminated { .. }))
        .await;
}

#[tokio::test(start_paused = true)]
async fn silent_callee_yields_synthesized_408() {
    let network = MemoryNetwork::new();
    let mut caller = Caller::new(&network).await;
    let _callee = Callee::new(&network);

    caller.calls.invite(invite(), addr(CALLEE)).await.unwrap();
    match caller.next_call_event(|e| matches!(e, CallEvent::Final { .. })).await {
        CallEvent::Final {
            response, synthesized, ..
        } => {
            assert_eq!(response.status, StatusCode::RequestTimeout);
            assert!(synthesized);
        }
        _ => unreachable!(),
    }
}

#[tokio::test(start_paused = true)]
async fn incoming_invite_records_winning_cancel() {
    let network = MemoryNetwork::new();
    let (transport, rx) = network.bind(addr(CALLEE)).unwrap();
    let (manager, mut events) = TransactionManager::new(Arc::new(transport), rx, TransactionManagerConfig::default())
        .await
        .unwrap();
    let calls = CallCoordinator::new(manager.clone());
    let (peer, _peer_rx) = network.bind(addr(CALLER)).unwrap();

    let request = invite();
    peer.send_message(request.clone().into(), addr(CALLEE)).await.unwrap();

    let invite_id = loop {
        let event = events.recv().await.unwrap();
        assert!(calls.handle_event(&event).await.is_none());
        if let TransactionEvent::NewRequest { transaction_id, .. } = event {
            break transaction_id;
        }
    };
    assert!(calls.incoming_call(&invite_id).is_some());
    assert!(!calls.pending_cancel(&invite_id));

    let cancel = tfm_transaction_core::create_cancel_request(&request, &addr(CALLER)).unwrap();
    peer.send_message(cancel.into(), addr(CALLEE)).await.unwrap();
    loop {
        let event = events.recv().await.unwrap();
        calls.handle_event(&event).await;
        if matches!(event, TransactionEvent::CancelReceived { .. }) {
            break;
        }
    }
    assert!(calls.pending_cancel(&invite_id));
}
