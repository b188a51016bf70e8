//! Client INVITE transaction flows against a hand-driven remote peer.

mod common;

use std::time::Duration;

use common::*;
use tfm_sip_core::{Method, StatusCode};
use tfm_sip_transport::MemoryNetwork;
use tfm_transaction_core::{
    Error, TimerSettings, TransactionEvent, TransactionManagerConfig, TransactionState,
};

#[tokio::test(start_paused = true)]
async fn non_2xx_final_is_acknowledged_by_the_transaction() {
    let network = MemoryNetwork::new();
    let mut client = endpoint(&network, CLIENT_ADDR, TransactionManagerConfig::default()).await;
    let mut callee = raw_peer(&network, SERVER_ADDR);

    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    let id = client
        .manager
        .create_client_transaction(invite, addr(SERVER_ADDR))
        .await
        .unwrap();
    client.manager.send_request(&id).await.unwrap();

    let received = callee.recv_request_of(Method::Invite).await;
    let busy = response(&received, StatusCode::BusyHere);
    callee.send(busy.clone().into(), client.addr).await;

    let event = wait_for(&mut client.events, |e| matches!(e, TransactionEvent::FailureResponse { .. })).await;
    match event {
        TransactionEvent::FailureResponse { response, .. } => assert_eq!(response.status, StatusCode::BusyHere),
        _ => unreachable!(),
    }

    let ack = callee.recv_request_of(Method::Ack).await;
    assert_eq!(ack.branch(), received.branch());
    assert_eq!(ack.cseq.seq, received.cseq.seq);
    assert_eq!(ack.to_tag(), busy.to_tag());

    // A retransmitted 486 is answered from the stored ACK
    callee.send(busy.into(), client.addr).await;
    let again = callee.recv_request_of(Method::Ack).await;
    assert_eq!(again, ack);

    // Timer D (32s over an unreliable transport)
    wait_for(&mut client.events, |e| matches!(e, TransactionEvent::TransactionTerminated { .. })).await;
    assert!(!client.manager.transaction_exists(&id));
}

#[tokio::test(start_paused = true)]
async fn success_needs_tu_ack_and_retransmissions_are_reported() {
    let network = MemoryNetwork::new();
    let mut client = endpoint(&network, CLIENT_ADDR, TransactionManagerConfig::default()).await;
    let mut callee = raw_peer(&network, SERVER_ADDR);

    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    let id = client
        .manager
        .create_client_transaction(invite, addr(SERVER_ADDR))
        .await
        .unwrap();
    client.manager.send_request(&id).await.unwrap();

    let received = callee.recv_request_of(Method::Invite).await;
    let ok = response(&received, StatusCode::Ok);
    callee.send(ok.clone().into(), client.addr).await;

    let event = wait_for(&mut client.events, |e| matches!(e, TransactionEvent::SuccessResponse { .. })).await;
    match &event {
        TransactionEvent::SuccessResponse { need_ack, .. } => assert!(*need_ack),
        _ => unreachable!(),
    }

    let ack = client.manager.send_ack_for_2xx(&id, &ok).await.unwrap();
    let delivered = callee.recv_request_of(Method::Ack).await;
    assert_eq!(delivered, ack);
    assert_ne!(ack.branch(), received.branch());
    assert_eq!(ack.uri, received.uri);

    callee.send(ok.into(), client.addr).await;
    wait_for(&mut client.events, |e| matches!(e, TransactionEvent::SuccessRetransmission { .. })).await;
    assert_eq!(client.manager.transaction_state(&id).unwrap(), TransactionState::Completed);
}

#[tokio::test(start_paused = true)]
async fn unanswered_invite_times_out_on_timer_b() {
    let network = MemoryNetwork::new();
    let mut client = endpoint(&network, CLIENT_ADDR, TransactionManagerConfig::default()).await;
    let _silent = raw_peer(&network, SERVER_ADDR);

    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    let id = client
        .manager
        .create_client_transaction(invite, addr(SERVER_ADDR))
        .await
        .unwrap();
    client.manager.send_request(&id).await.unwrap();

    let timeout = wait_for(&mut client.events, |e| matches!(e, TransactionEvent::TransactionTimeout { .. })).await;
    assert_eq!(timeout.transaction_id(), Some(&id));
    wait_for(&mut client.events, |e| matches!(e, TransactionEvent::TransactionTerminated { .. })).await;

    // Timer A: 0.5, 1.5, 3.5, 7.5, then every T2 until 31.5
    assert_eq!(sent_requests(&network.captured(), client.addr, Method::Invite), 11);
}

#[tokio::test(start_paused = true)]
async fn provisional_response_keeps_invite_alive_past_timer_b() {
    let network = MemoryNetwork::new();
    let timers = TimerSettings::default().with_invite_retransmission_in_proceeding(false);
    let mut client = endpoint(&network, CLIENT_ADDR, TransactionManagerConfig::default().with_timers(timers)).await;
    let mut callee = raw_peer(&network, SERVER_ADDR);

    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    let id = client
        .manager
        .create_client_transaction(invite, addr(SERVER_ADDR))
        .await
        .unwrap();
    client.manager.send_request(&id).await.unwrap();

    let received = callee.recv_request_of(Method::Invite).await;
    callee
        .send(response(&received, StatusCode::Ringing).into(), client.addr)
        .await;
    wait_for(&mut client.events, |e| matches!(e, TransactionEvent::ProvisionalResponse { .. })).await;

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(client.manager.transaction_state(&id).unwrap(), TransactionState::Proceeding);
    assert_eq!(sent_requests(&network.captured(), client.addr, Method::Invite), 1);

    let events = drain(&mut client.events, Duration::from_millis(10)).await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, TransactionEvent::TransactionTimeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn transport_failure_is_reported_once() {
    let network = MemoryNetwork::new();
    let mut client = endpoint(&network, CLIENT_ADDR, TransactionManagerConfig::default()).await;

    // Nobody is bound at the destination
    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    let id = client
        .manager
        .create_client_transaction(invite, addr(SERVER_ADDR))
        .await
        .unwrap();
    client.manager.send_request(&id).await.unwrap();

    wait_for(&mut client.events, |e| matches!(e, TransactionEvent::TransportError { .. })).await;
    wait_for(&mut client.events, |e| matches!(e, TransactionEvent::TransactionTerminated { .. })).await;

    let rest = drain(&mut client.events, Duration::from_secs(40)).await;
    assert!(!rest.iter().any(|e| matches!(
        e,
        TransactionEvent::TransportError { .. } | TransactionEvent::TransactionTimeout { .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn cancel_follows_the_invite_on_its_own_transaction() {
    let network = MemoryNetwork::new();
    let mut client = endpoint(&network, CLIENT_ADDR, TransactionManagerConfig::default()).await;
    let mut callee = raw_peer(&network, SERVER_ADDR);

    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    let id = client
        .manager
        .create_client_transaction(invite, addr(SERVER_ADDR))
        .await
        .unwrap();

    // Not yet sent: nothing to cancel
    assert!(matches!(client.manager.create_cancel(&id).await, Err(Error::Other(_))));

    client.manager.send_request(&id).await.unwrap();
    let received = callee.recv_request_of(Method::Invite).await;
    let ringing = response(&received, StatusCode::Ringing);
    callee.send(ringing.clone().into(), client.addr).await;
    wait_for(&mut client.events, |e| matches!(e, TransactionEvent::ProvisionalResponse { .. })).await;

    let cancel_id = client.manager.create_cancel(&id).await.unwrap();
    let cancel = callee.recv_request_of(Method::Cancel).await;
    assert_ne!(cancel.branch(), received.branch());
    assert_eq!(cancel.cseq.seq, received.cseq.seq);
    assert_eq!(cancel.uri, received.uri);
    assert_eq!(cancel.call_id, received.call_id);

    callee.send(response(&cancel, StatusCode::Ok).into(), client.addr).await;
    let terminated = tfm_sip_core::SimpleResponseBuilder::response_from_request(&received, StatusCode::RequestTerminated, None)
        .to_tag(ringing.to_tag().unwrap())
        .build();
    callee.send(terminated.into(), client.addr).await;

    let cancel_answer = wait_for(&mut client.events, |e| {
        matches!(e, TransactionEvent::SuccessResponse { transaction_id, .. } if *transaction_id == cancel_id)
    })
    .await;
    assert!(matches!(cancel_answer, TransactionEvent::SuccessResponse { need_ack: false, .. }));

    let invite_final = wait_for(&mut client.events, |e| {
        matches!(e, TransactionEvent::FailureResponse { transaction_id, .. } if *transaction_id == id)
    })
    .await;
    match invite_final {
        TransactionEvent::FailureResponse { response, .. } => {
            assert_eq!(response.status, StatusCode::RequestTerminated)
        }
        _ => unreachable!(),
    }
    let ack = callee.recv_request_of(Method::Ack).await;
    assert_eq!(ack.branch(), received.branch());
}

#[tokio::test(start_paused = true)]
async fn duplicate_and_ack_requests_are_refused() {
    let network = MemoryNetwork::new();
    let client = endpoint(&network, CLIENT_ADDR, TransactionManagerConfig::default()).await;

    let options = request(Method::Options, CLIENT_ADDR, SERVER_ADDR);
    client
        .manager
        .create_client_transaction(options.clone(), addr(SERVER_ADDR))
        .await
        .unwrap();
    assert!(matches!(
        client
            .manager
            .create_client_transaction(options, addr(SERVER_ADDR))
            .await,
        Err(Error::TransactionExists(_))
    ));

    let ack = request(Method::Ack, CLIENT_ADDR, SERVER_ADDR);
    assert!(matches!(
        client.manager.create_client_transaction(ack, addr(SERVER_ADDR)).await,
        Err(Error::InvalidMessage(_))
    ));
}
