use std::fmt;

use tfm_sip_core::{Method, Request, Response};

/// Uniquely identifies a SIP transaction.
///
/// RFC 3261 (Section 17) identifies a transaction by the `branch` of the
/// top-most Via plus the method. The `is_server` flag keeps a client and a
/// server transaction apart when an endpoint sees its own branch come back
/// (e.g. a looped request).
///
/// An ACK for a non-2xx final response carries the INVITE's branch and is
/// matched to the INVITE server transaction by [`with_method`](Self::with_method);
/// a CANCEL is its own transaction.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    /// Branch parameter of the top-most Via
    pub branch: String,

    /// Method of the request that created the transaction
    pub method: Method,

    /// `true` for server transactions
    pub is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: String, method: Method, is_server: bool) -> Self {
        Self {
            branch,
            method,
            is_server,
        }
    }

    /// Server transaction key of an incoming request. `None` when the request
    /// has no top Via or an empty branch.
    pub fn from_request(request: &Request) -> Option<Self> {
        let branch = request.branch().filter(|b| !b.is_empty())?;
        Some(Self::new(branch.to_string(), request.method(), true))
    }

    /// Client transaction key of an outgoing request.
    pub fn for_client_request(request: &Request) -> Option<Self> {
        let branch = request.branch().filter(|b| !b.is_empty())?;
        Some(Self::new(branch.to_string(), request.method(), false))
    }

    /// Client transaction key an incoming response belongs to: its top Via
    /// branch and its CSeq method.
    pub fn from_response(response: &Response) -> Option<Self> {
        let branch = response.branch().filter(|b| !b.is_empty())?;
        Some(Self::new(branch.to_string(), response.cseq.method.clone(), false))
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// The same key with a different method (ACK -> INVITE lookups)
    pub fn with_method(&self, method: Method) -> Self {
        Self {
            branch: self.branch.clone(),
            method,
            is_server: self.is_server,
        }
    }
}

/// Format: "branch:METHOD:side:CLASS"
impl fmt::Debug for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_server { "server" } else { "client" };
        let class = if self.method.is_invite_class() {
            "INVITE_LIKE"
        } else {
            "NON_INVITE_LIKE"
        };
        write!(f, "{}:{}:{}:{}", self.branch, self.method, side, class)
    }
}

/// Format: "Key(branch:METHOD:side)"
impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_server { "server" } else { "client" };
        write!(f, "Key({}:{}:{})", self.branch, self.method, side)
    }
}

/// Alias used where "identifier" reads better than "key".
pub type TransactionId = TransactionKey;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tfm_sip_core::{SimpleRequestBuilder, SimpleResponseBuilder, StatusCode};

    fn request(method: Method, branch: &str) -> Request {
        SimpleRequestBuilder::new(method, "sip:bob@127.0.0.1")
            .unwrap()
            .from("", "sip:alice@127.0.0.1", Some("a"))
            .to("", "sip:bob@127.0.0.1", None)
            .call_id("callid-test-key")
            .cseq(1)
            .via("127.0.0.1:5060", "UDP", Some(branch))
            .build()
            .unwrap()
    }

    #[test]
    fn from_request_and_response_agree_on_branch_and_method() {
        let req = request(Method::Invite, "z9hG4bKbranch2");
        let server = TransactionKey::from_request(&req).unwrap();
        assert_eq!(server.branch(), "z9hG4bKbranch2");
        assert!(server.is_server());

        let resp = SimpleResponseBuilder::response_from_request(&req, StatusCode::Ok, None).build();
        let client = TransactionKey::from_response(&resp).unwrap();
        assert_eq!(client, TransactionKey::for_client_request(&req).unwrap());
        assert_ne!(client, server);
    }

    #[test]
    fn empty_branch_has_no_key() {
        let req = request(Method::Options, "");
        assert!(TransactionKey::from_request(&req).is_none());
    }

    #[test]
    fn equality_and_hashing() {
        let key1 = TransactionKey::new("b1".to_string(), Method::Invite, true);
        let key2 = TransactionKey::new("b1".to_string(), Method::Invite, true);
        let key3 = TransactionKey::new("b1".to_string(), Method::Register, true);
        let key4 = TransactionKey::new("b1".to_string(), Method::Invite, false);
        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert_ne!(key1, key4);

        let mut set = HashSet::new();
        assert!(set.insert(key1));
        assert!(!set.insert(key2));
        assert!(set.insert(key3));
    }

    #[test]
    fn display_and_debug_format() {
        let key = TransactionKey::new("z9hG4bKalpha".to_string(), Method::Invite, true);
        assert_eq!(format!("{}", key), "Key(z9hG4bKalpha:INVITE:server)");
        assert_eq!(format!("{:?}", key), "z9hG4bKalpha:INVITE:server:INVITE_LIKE");

        let ack = key.with_method(Method::Cancel);
        assert_eq!(format!("{:?}", ack), "z9hG4bKalpha:CANCEL:server:NON_INVITE_LIKE");
    }
}
