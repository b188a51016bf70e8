//! Server transactions: ACK handling and duplicate suppression.

mod common;

use std::time::Duration;

use common::*;
use tfm_sip_core::{Message, Method, StatusCode};
use tfm_sip_transport::MemoryNetwork;
use tfm_transaction_core::{
    create_ack_for_2xx, create_ack_for_error_response, TransactionEvent, TransactionManagerConfig, TransactionState,
};

fn is_state(event: &TransactionEvent, state: TransactionState) -> bool {
    matches!(event, TransactionEvent::StateChanged { new_state, .. } if *new_state == state)
}

#[tokio::test(start_paused = true)]
async fn ack_confirms_after_final_response_retransmissions() {
    let network = MemoryNetwork::new();
    let mut server = endpoint(&network, SERVER_ADDR, TransactionManagerConfig::default()).await;
    let mut caller = raw_peer(&network, CLIENT_ADDR);

    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    caller.send(invite.clone().into(), server.addr).await;

    let id = match wait_for(&mut server.events, |e| matches!(e, TransactionEvent::NewRequest { .. })).await {
        TransactionEvent::NewRequest { transaction_id, request, source } => {
            assert_eq!(request.method, Method::Invite);
            assert_eq!(source, caller.addr);
            transaction_id
        }
        _ => unreachable!(),
    };

    server
        .manager
        .send_response(&id, response(&invite, StatusCode::BusyHere))
        .await
        .unwrap();
    wait_for(&mut server.events, |e| is_state(e, TransactionState::Completed)).await;

    // First transmission, then Timer G retransmits at T1 and 2*T1
    let first = caller.recv_response().await;
    assert_eq!(first.status, StatusCode::BusyHere);
    for _ in 0..2 {
        let again = caller.recv_response().await;
        assert_eq!(again.status, StatusCode::BusyHere);
    }
    assert_eq!(server.manager.transaction_state(&id).unwrap(), TransactionState::Completed);

    let ack = create_ack_for_error_response(&invite, &first).unwrap();
    caller.send(ack.clone().into(), server.addr).await;

    let event = wait_for(&mut server.events, |e| matches!(e, TransactionEvent::AckReceived { .. })).await;
    match event {
        TransactionEvent::AckReceived { transaction_id, .. } => assert_eq!(transaction_id, id),
        _ => unreachable!(),
    }
    wait_for(&mut server.events, |e| is_state(e, TransactionState::Confirmed)).await;

    // A repeated ACK is absorbed
    caller.send(ack.into(), server.addr).await;
    let rest = drain(&mut server.events, Duration::from_secs(1)).await;
    assert!(!rest.iter().any(|e| matches!(
        e,
        TransactionEvent::AckReceived { .. } | TransactionEvent::AckRetransmission { .. }
    )));

    // Timer I (T4) ends the transaction
    wait_for(&mut server.events, |e| matches!(e, TransactionEvent::TransactionTerminated { .. })).await;
    assert!(!server.manager.transaction_exists(&id));
}

#[tokio::test(start_paused = true)]
async fn every_ack_for_2xx_reaches_the_tu() {
    let network = MemoryNetwork::new();
    let mut server = endpoint(&network, SERVER_ADDR, TransactionManagerConfig::default()).await;
    let mut caller = raw_peer(&network, CLIENT_ADDR);

    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    caller.send(invite.clone().into(), server.addr).await;
    let id = wait_for(&mut server.events, |e| matches!(e, TransactionEvent::NewRequest { .. }))
        .await
        .transaction_id()
        .cloned()
        .unwrap();

    server
        .manager
        .send_response(&id, response(&invite, StatusCode::Ok))
        .await
        .unwrap();
    let ok = caller.recv_response_of(StatusCode::Ok).await;

    let ack = create_ack_for_2xx(&invite, &ok, &caller.addr).unwrap();
    caller.send(ack.clone().into(), server.addr).await;
    wait_for(&mut server.events, |e| matches!(e, TransactionEvent::AckReceived { .. })).await;
    wait_for(&mut server.events, |e| is_state(e, TransactionState::Confirmed)).await;

    for _ in 0..2 {
        caller.send(ack.clone().into(), server.addr).await;
    }
    let rest = drain(&mut server.events, Duration::from_secs(1)).await;
    let repeats: Vec<_> = rest
        .iter()
        .filter_map(|e| match e {
            TransactionEvent::AckRetransmission { transaction_id, request } => Some((transaction_id, request)),
            _ => None,
        })
        .collect();
    assert_eq!(repeats.len(), 2);
    assert!(repeats.iter().all(|(tx, request)| **tx == id && **request == ack));
    assert!(!rest.iter().any(|e| matches!(e, TransactionEvent::AckReceived { .. })));
}

#[tokio::test(start_paused = true)]
async fn missing_ack_times_out_on_timer_h() {
    let network = MemoryNetwork::new();
    let mut server = endpoint(&network, SERVER_ADDR, TransactionManagerConfig::default()).await;
    let caller = raw_peer(&network, CLIENT_ADDR);

    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    caller.send(invite.clone().into(), server.addr).await;
    let id = wait_for(&mut server.events, |e| matches!(e, TransactionEvent::NewRequest { .. }))
        .await
        .transaction_id()
        .cloned()
        .unwrap();

    server
        .manager
        .send_response(&id, response(&invite, StatusCode::Decline))
        .await
        .unwrap();

    wait_for(&mut server.events, |e| matches!(e, TransactionEvent::TransactionTimeout { .. })).await;
    wait_for(&mut server.events, |e| matches!(e, TransactionEvent::TransactionTerminated { .. })).await;

    // 1 + retransmissions at 0.5, 1.5, 3.5, 7.5, 11.5, ... below 32s
    let sent = sent_responses(&network.captured(), server.addr, StatusCode::Decline);
    assert_eq!(sent, 11);
}

#[tokio::test(start_paused = true)]
async fn duplicate_non_invite_requests_are_absorbed_then_answered_from_cache() {
    let network = MemoryNetwork::new();
    let mut server = endpoint(&network, SERVER_ADDR, TransactionManagerConfig::default()).await;
    let mut caller = raw_peer(&network, CLIENT_ADDR);

    let options = request(Method::Options, CLIENT_ADDR, SERVER_ADDR);
    caller.send(options.clone().into(), server.addr).await;
    let id = wait_for(&mut server.events, |e| matches!(e, TransactionEvent::NewRequest { .. }))
        .await
        .transaction_id()
        .cloned()
        .unwrap();

    // Retransmission while Trying: no new request, no response
    caller.send(options.clone().into(), server.addr).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sent_responses(&network.captured(), server.addr, StatusCode::Ok), 0);

    server
        .manager
        .send_response(&id, response(&options, StatusCode::Ok))
        .await
        .unwrap();
    assert_eq!(caller.recv_response().await.status, StatusCode::Ok);

    // Retransmission while Completed: the cached 200 is resent
    caller.send(options.into(), server.addr).await;
    assert_eq!(caller.recv_response().await.status, StatusCode::Ok);

    let events = drain(&mut server.events, Duration::from_secs(1)).await;
    assert!(!events.iter().any(|e| matches!(e, TransactionEvent::NewRequest { .. })));
    assert_eq!(sent_responses(&network.captured(), server.addr, StatusCode::Ok), 2);
}

#[tokio::test(start_paused = true)]
async fn duplicate_invite_in_proceeding_resends_provisional() {
    let network = MemoryNetwork::new();
    let mut server = endpoint(&network, SERVER_ADDR, TransactionManagerConfig::default()).await;
    let mut caller = raw_peer(&network, CLIENT_ADDR);

    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    caller.send(invite.clone().into(), server.addr).await;
    let id = wait_for(&mut server.events, |e| matches!(e, TransactionEvent::NewRequest { .. }))
        .await
        .transaction_id()
        .cloned()
        .unwrap();

    server
        .manager
        .send_response(&id, response(&invite, StatusCode::Ringing))
        .await
        .unwrap();
    assert_eq!(caller.recv_response().await.status, StatusCode::Ringing);

    caller.send(invite.clone().into(), server.addr).await;
    assert_eq!(caller.recv_response().await.status, StatusCode::Ringing);
    assert_eq!(server.manager.transaction_state(&id).unwrap(), TransactionState::Proceeding);

    let events = drain(&mut server.events, Duration::from_millis(100)).await;
    assert!(!events.iter().any(|e| matches!(e, TransactionEvent::NewRequest { .. })));

    let log = server.manager.message_log(&id).unwrap();
    let received_invites = log
        .iter()
        .filter(|entry| matches!(&entry.message, Message::Request(r) if r.method == Method::Invite))
        .filter(|entry| entry.direction == tfm_transaction_core::Direction::Received)
        .count();
    assert_eq!(received_invites, 2);
}

#[tokio::test(start_paused = true)]
async fn response_in_wrong_state_is_rejected() {
    let network = MemoryNetwork::new();
    let mut server = endpoint(&network, SERVER_ADDR, TransactionManagerConfig::default()).await;
    let caller = raw_peer(&network, CLIENT_ADDR);

    let options = request(Method::Options, CLIENT_ADDR, SERVER_ADDR);
    caller.send(options.clone().into(), server.addr).await;
    let id = wait_for(&mut server.events, |e| matches!(e, TransactionEvent::NewRequest { .. }))
        .await
        .transaction_id()
        .cloned()
        .unwrap();

    server
        .manager
        .send_response(&id, response(&options, StatusCode::Ok))
        .await
        .unwrap();
    wait_for(&mut server.events, |e| is_state(e, TransactionState::Completed)).await;

    server
        .manager
        .send_response(&id, response(&options, StatusCode::NotFound))
        .await
        .unwrap();
    let event = wait_for(&mut server.events, |e| matches!(e, TransactionEvent::Error { .. })).await;
    assert_eq!(event.transaction_id(), Some(&id));
    assert_eq!(sent_responses(&network.captured(), server.addr, StatusCode::NotFound), 0);
}
