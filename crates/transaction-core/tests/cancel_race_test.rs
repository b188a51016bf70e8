//! CANCEL against the final response of an INVITE: whichever is committed
//! first wins, in both orders.

mod common;

use std::time::Duration;

use common::*;
use tfm_sip_core::{Method, StatusCode};
use tfm_sip_transport::MemoryNetwork;
use tfm_transaction_core::{
    create_ack_for_error_response, create_cancel_request, TransactionEvent, TransactionKey, TransactionManagerConfig,
    TransactionState,
};

async fn incoming_invite(server: &mut Endpoint, caller: &RawPeer) -> (tfm_sip_core::Request, TransactionKey) {
    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    caller.send(invite.clone().into(), server.addr).await;
    let id = wait_for(&mut server.events, |e| matches!(e, TransactionEvent::NewRequest { .. }))
        .await
        .transaction_id()
        .cloned()
        .unwrap();
    (invite, id)
}

#[tokio::test(start_paused = true)]
async fn cancel_before_final_wins() {
    let network = MemoryNetwork::new();
    let mut server = endpoint(&network, SERVER_ADDR, TransactionManagerConfig::default()).await;
    let mut caller = raw_peer(&network, CLIENT_ADDR);

    let (invite, invite_id) = incoming_invite(&mut server, &caller).await;
    server
        .manager
        .send_response(&invite_id, response(&invite, StatusCode::Ringing))
        .await
        .unwrap();
    let ringing = caller.recv_response_of(StatusCode::Ringing).await;

    let cancel = create_cancel_request(&invite, &caller.addr).unwrap();
    caller.send(cancel.clone().into(), server.addr).await;

    let event = wait_for(&mut server.events, |e| matches!(e, TransactionEvent::CancelReceived { .. })).await;
    match event {
        TransactionEvent::CancelReceived {
            transaction_id,
            cancel_transaction_id,
            request,
        } => {
            assert_eq!(transaction_id, invite_id);
            assert_eq!(request.method, Method::Cancel);
            assert_eq!(*cancel_transaction_id.method(), Method::Cancel);
        }
        _ => unreachable!(),
    }
    let cancel_ok = caller.recv_response_of(StatusCode::Ok).await;
    assert_eq!(cancel_ok.cseq.method, Method::Cancel);

    // The TU answers the cancelled INVITE with 487
    let terminated = tfm_sip_core::SimpleResponseBuilder::response_from_request(&invite, StatusCode::RequestTerminated, None)
        .to_tag(ringing.to_tag().unwrap())
        .build();
    server.manager.send_response(&invite_id, terminated).await.unwrap();
    let final_response = caller.recv_response_of(StatusCode::RequestTerminated).await;

    let ack = create_ack_for_error_response(&invite, &final_response).unwrap();
    caller.send(ack.into(), server.addr).await;
    wait_for(&mut server.events, |e| matches!(e, TransactionEvent::AckReceived { .. })).await;

    // A second CANCEL is answered 200 but not reported again
    caller.send(cancel.into(), server.addr).await;
    let rest = drain(&mut server.events, Duration::from_secs(1)).await;
    assert!(!rest.iter().any(|e| matches!(e, TransactionEvent::CancelReceived { .. })));
}

#[tokio::test(start_paused = true)]
async fn final_before_cancel_wins() {
    let network = MemoryNetwork::new();
    let mut server = endpoint(&network, SERVER_ADDR, TransactionManagerConfig::default()).await;
    let mut caller = raw_peer(&network, CLIENT_ADDR);

    let (invite, invite_id) = incoming_invite(&mut server, &caller).await;
    server
        .manager
        .send_response(&invite_id, response(&invite, StatusCode::Ok))
        .await
        .unwrap();
    caller.recv_response_of(StatusCode::Ok).await;

    let cancel = create_cancel_request(&invite, &caller.addr).unwrap();
    caller.send(cancel.into(), server.addr).await;

    let answer = caller.recv_response_of(StatusCode::CallOrTransactionDoesNotExist).await;
    assert_eq!(answer.cseq.method, Method::Cancel);

    let events = drain(&mut server.events, Duration::from_millis(200)).await;
    assert!(!events.iter().any(|e| matches!(e, TransactionEvent::CancelReceived { .. })));
    assert_eq!(
        server.manager.transaction_state(&invite_id).unwrap(),
        TransactionState::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_without_matching_invite_gets_481() {
    let network = MemoryNetwork::new();
    let mut server = endpoint(&network, SERVER_ADDR, TransactionManagerConfig::default()).await;
    let mut caller = raw_peer(&network, CLIENT_ADDR);

    let invite = request(Method::Invite, CLIENT_ADDR, SERVER_ADDR);
    let cancel = create_cancel_request(&invite, &caller.addr).unwrap();
    caller.send(cancel.into(), server.addr).await;

    let answer = caller.recv_response().await;
    assert_eq!(answer.status, StatusCode::CallOrTransactionDoesNotExist);
    let events = drain(&mut server.events, Duration::from_millis(200)).await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, TransactionEvent::CancelReceived { .. } | TransactionEvent::NewRequest { .. })));
}

/// Final response and CANCEL submitted together: exactly one wins and the
/// answers agree with each other.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_cancel_and_final_have_one_winner() {
    for _ in 0..20 {
        let network = MemoryNetwork::new();
        let mut server = endpoint(&network, SERVER_ADDR, TransactionManagerConfig::default()).await;
        let mut caller = raw_peer(&network, CLIENT_ADDR);

        let (invite, invite_id) = incoming_invite(&mut server, &caller).await;
        let cancel = create_cancel_request(&invite, &caller.addr).unwrap();

        let manager = server.manager.clone();
        let ok = response(&invite, StatusCode::Ok);
        let answer = tokio::spawn(async move { manager.send_response(&invite_id, ok).await });
        caller.send(cancel.into(), server.addr).await;
        answer.await.unwrap().unwrap();

        let cancel_answer = loop {
            let r = caller.recv_response().await;
            if r.cseq.method == Method::Cancel {
                break r;
            }
        };
        let events = drain(&mut server.events, Duration::from_millis(200)).await;
        let cancel_reported = events
            .iter()
            .any(|e| matches!(e, TransactionEvent::CancelReceived { .. }));

        match cancel_answer.status {
            StatusCode::Ok => assert!(cancel_reported),
            StatusCode::CallOrTransactionDoesNotExist => assert!(!cancel_reported),
            other => panic!("unexpected CANCEL answer {}", other),
        }
        server.manager.shutdown().await;
    }
}
