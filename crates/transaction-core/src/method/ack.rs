//! ACK method utilities for SIP transactions
//!
//! RFC 3261 distinguishes two kinds of ACK:
//!
//! - The ACK for a non-2xx final response is part of the INVITE transaction.
//!   The client transaction builds it (Section 17.1.1.3) and it reuses the
//!   INVITE's branch.
//! - The ACK for a 2xx is sent by the TU as a request of its own with a new
//!   branch (Section 13.2.2.4). A server matches it to the INVITE by Call-ID,
//!   CSeq number and From tag.

use std::net::SocketAddr;

use tfm_sip_core::{generate_branch, CSeq, Method, Request, Response, Via};

use crate::error::{Error, Result};

fn ack_from_invite(invite_request: &Request, response: &Response, via: Via) -> Result<Request> {
    if invite_request.method != Method::Invite {
        return Err(Error::Other("Cannot create ACK for non-INVITE request".to_string()));
    }
    Ok(Request {
        method: Method::Ack,
        uri: invite_request.uri.clone(),
        via: vec![via],
        from: invite_request.from.clone(),
        to: response.to.clone(),
        call_id: invite_request.call_id.clone(),
        cseq: CSeq::new(invite_request.cseq.seq, Method::Ack),
        max_forwards: invite_request.max_forwards,
        contacts: Vec::new(),
        route: invite_request.route.clone(),
        expires: None,
        authorization: invite_request.authorization.clone(),
        headers: Vec::new(),
        body: Default::default(),
    })
}

/// Builds the ACK the INVITE client transaction sends for a 3xx-6xx response:
/// the INVITE's top Via (same branch), the response's To (with its tag) and
/// CSeq method ACK.
pub fn create_ack_for_error_response(invite_request: &Request, response: &Response) -> Result<Request> {
    if response.status.is_success() || !response.status.is_final() {
        return Err(Error::Other(format!(
            "ACK of a non-2xx final response requested for {}",
            response.status
        )));
    }
    let via = invite_request
        .top_via()
        .cloned()
        .ok_or_else(|| Error::InvalidMessage("INVITE request has no Via".to_string()))?;
    ack_from_invite(invite_request, response, via)
}

/// Builds the ACK the TU sends for a 2xx: a new branch on a Via for `local_addr`.
pub fn create_ack_for_2xx(invite_request: &Request, response: &Response, local_addr: &SocketAddr) -> Result<Request> {
    if !response.status.is_success() {
        return Err(Error::Other(format!("ACK of a 2xx requested for {}", response.status)));
    }
    let transport = invite_request
        .top_via()
        .map(|via| via.transport.clone())
        .unwrap_or_else(|| "UDP".to_string());
    let via = Via::new(transport, local_addr.to_string(), generate_branch());
    ack_from_invite(invite_request, response, via)
}

/// True when `ack` acknowledges a 2xx to `invite`: same Call-ID, CSeq number
/// and From tag.
pub fn is_ack_for_2xx(ack: &Request, invite: &Request) -> bool {
    ack.method == Method::Ack
        && invite.method == Method::Invite
        && ack.call_id == invite.call_id
        && ack.cseq.seq == invite.cseq.seq
        && ack.from_tag() == invite.from_tag()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfm_sip_core::{SimpleRequestBuilder, SimpleResponseBuilder, StatusCode};

    fn invite() -> Request {
        SimpleRequestBuilder::new(Method::Invite, "sip:bob@127.0.0.1:5070")
            .unwrap()
            .from("Alice", "sip:alice@127.0.0.1", Some("alice-tag"))
            .to("Bob", "sip:bob@127.0.0.1", None)
            .call_id("ack-test-call")
            .cseq(3)
            .via("127.0.0.1:5060", "UDP", Some("z9hG4bKack"))
            .build()
            .unwrap()
    }

    #[test]
    fn error_ack_reuses_branch_and_response_to_tag() {
        let invite = invite();
        let response = SimpleResponseBuilder::response_from_request(&invite, StatusCode::BusyHere, None)
            .to_tag("bob-tag")
            .build();

        let ack = create_ack_for_error_response(&invite, &response).unwrap();
        assert_eq!(ack.method, Method::Ack);
        assert_eq!(ack.branch(), Some("z9hG4bKack"));
        assert_eq!(ack.to_tag(), Some("bob-tag"));
        assert_eq!(ack.cseq, CSeq::new(3, Method::Ack));
        assert_eq!(ack.uri, invite.uri);
    }

    #[test]
    fn error_ack_refuses_success() {
        let invite = invite();
        let ok = SimpleResponseBuilder::response_from_request(&invite, StatusCode::Ok, None).build();
        assert!(create_ack_for_error_response(&invite, &ok).is_err());
    }

    #[test]
    fn success_ack_uses_new_branch_and_matches() {
        let invite = invite();
        let ok = SimpleResponseBuilder::response_from_request(&invite, StatusCode::Ok, None).build();
        let local: SocketAddr = "127.0.0.1:5060".parse().unwrap();

        let ack = create_ack_for_2xx(&invite, &ok, &local).unwrap();
        assert_ne!(ack.branch(), invite.branch());
        assert_eq!(ack.to_tag(), ok.to_tag());
        assert!(is_ack_for_2xx(&ack, &invite));

        let mut other = ack.clone();
        other.call_id = "another-call".to_string();
        assert!(!is_ack_for_2xx(&other, &invite));
    }
}
