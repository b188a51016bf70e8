//! Fluent builders for requests and responses.
//!
//! # Examples
//!
//! ```
//! use tfm_sip_core::prelude::*;
//!
//! let invite = SimpleRequestBuilder::new(Method::Invite, "sip:bob@127.0.0.1:5070")
//!     .unwrap()
//!     .from("Alice", "sip:alice@127.0.0.1", Some("a-tag"))
//!     .to("Bob", "sip:bob@127.0.0.1", None)
//!     .call_id("call-1")
//!     .cseq(1)
//!     .via("127.0.0.1:5060", "UDP", None)
//!     .build()
//!     .unwrap();
//!
//! let ringing = SimpleResponseBuilder::response_from_request(&invite, StatusCode::Ringing, None)
//!     .to_tag("b-tag")
//!     .build();
//! assert_eq!(ringing.to_tag(), Some("b-tag"));
//! assert_eq!(ringing.branch(), invite.branch());
//! ```

use std::str::FromStr;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::headers::{CSeq, Contact, Credentials, NameAddr, Via};
use crate::ids::{generate_branch, generate_tag};
use crate::message::{Request, Response};
use crate::method::Method;
use crate::status::StatusCode;
use crate::uri::Uri;

const DEFAULT_MAX_FORWARDS: u8 = 70;

/// Builder for [`Request`].
///
/// Header values given as strings are parsed lazily; the first parse error
/// is reported by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct SimpleRequestBuilder {
    method: Method,
    uri: Uri,
    via: Vec<Via>,
    from: Option<NameAddr>,
    to: Option<NameAddr>,
    call_id: Option<String>,
    cseq: Option<u32>,
    max_forwards: u8,
    contacts: Vec<Contact>,
    route: Vec<Uri>,
    expires: Option<u32>,
    authorization: Option<Credentials>,
    headers: Vec<(String, String)>,
    body: Bytes,
    error: Option<Error>,
}

impl SimpleRequestBuilder {
    /// Starts a request for `method` targeting `uri`.
    pub fn new(method: Method, uri: &str) -> Result<Self> {
        Ok(Self::with_uri(method, Uri::from_str(uri)?))
    }

    /// Starts a request for an already parsed Request-URI.
    pub fn with_uri(method: Method, uri: Uri) -> Self {
        SimpleRequestBuilder {
            method,
            uri,
            via: Vec::new(),
            from: None,
            to: None,
            call_id: None,
            cseq: None,
            max_forwards: DEFAULT_MAX_FORWARDS,
            contacts: Vec::new(),
            route: Vec::new(),
            expires: None,
            authorization: None,
            headers: Vec::new(),
            body: Bytes::new(),
            error: None,
        }
    }

    fn name_addr(&mut self, display: &str, uri: &str, tag: Option<&str>) -> Option<NameAddr> {
        match Uri::from_str(uri) {
            Ok(uri) => {
                let mut addr = NameAddr::new(uri);
                if !display.is_empty() {
                    addr = addr.with_display_name(display);
                }
                if let Some(tag) = tag {
                    addr = addr.with_tag(tag);
                }
                Some(addr)
            }
            Err(e) => {
                self.error.get_or_insert(e);
                None
            }
        }
    }

    pub fn from(mut self, display: &str, uri: &str, tag: Option<&str>) -> Self {
        self.from = self.name_addr(display, uri, tag);
        self
    }

    pub fn to(mut self, display: &str, uri: &str, tag: Option<&str>) -> Self {
        self.to = self.name_addr(display, uri, tag);
        self
    }

    /// Sets From from an existing name-addr.
    pub fn from_name_addr(mut self, addr: NameAddr) -> Self {
        self.from = Some(addr);
        self
    }

    pub fn to_name_addr(mut self, addr: NameAddr) -> Self {
        self.to = Some(addr);
        self
    }

    pub fn call_id(mut self, call_id: &str) -> Self {
        self.call_id = Some(call_id.to_string());
        self
    }

    /// CSeq number; the CSeq method is always the request method.
    pub fn cseq(mut self, seq: u32) -> Self {
        self.cseq = Some(seq);
        self
    }

    /// Pushes a Via below any already added. A missing branch is generated.
    pub fn via(mut self, sent_by: &str, transport: &str, branch: Option<&str>) -> Self {
        let branch = branch.map(str::to_string).unwrap_or_else(generate_branch);
        self.via.push(Via::new(transport, sent_by, branch));
        self
    }

    pub fn max_forwards(mut self, max_forwards: u8) -> Self {
        self.max_forwards = max_forwards;
        self
    }

    pub fn contact(mut self, contact: Contact) -> Self {
        self.contacts.push(contact);
        self
    }

    pub fn route(mut self, uri: Uri) -> Self {
        self.route.push(uri);
        self
    }

    pub fn expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn authorization(mut self, credentials: Credentials) -> Self {
        self.authorization = Some(credentials);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Result<Request> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.via.is_empty() {
            return Err(Error::MissingHeader("Via"));
        }
        let from = self.from.ok_or(Error::MissingHeader("From"))?;
        let to = self.to.ok_or(Error::MissingHeader("To"))?;
        let call_id = self.call_id.ok_or(Error::MissingHeader("Call-ID"))?;
        let seq = self.cseq.ok_or(Error::MissingHeader("CSeq"))?;

        Ok(Request {
            cseq: CSeq::new(seq, self.method.clone()),
            method: self.method,
            uri: self.uri,
            via: self.via,
            from,
            to,
            call_id,
            max_forwards: self.max_forwards,
            contacts: self.contacts,
            route: self.route,
            expires: self.expires,
            authorization: self.authorization,
            headers: self.headers,
            body: self.body,
        })
    }
}

/// Builder for [`Response`].
#[derive(Debug, Clone)]
pub struct SimpleResponseBuilder {
    response: Response,
}

impl SimpleResponseBuilder {
    /// Starts a response to `request`: copies Via, From, To, Call-ID and CSeq.
    ///
    /// Any response other than 100 gets a fresh To tag when the request has
    /// none; call [`to_tag`](Self::to_tag) to pin the tag of an existing dialog.
    pub fn response_from_request(request: &Request, status: StatusCode, reason: Option<&str>) -> Self {
        let mut to = request.to.clone();
        if status != StatusCode::Trying && to.tag.is_none() {
            to.tag = Some(generate_tag());
        }
        SimpleResponseBuilder {
            response: Response {
                status,
                reason: reason.map(str::to_string),
                via: request.via.clone(),
                from: request.from.clone(),
                to,
                call_id: request.call_id.clone(),
                cseq: request.cseq.clone(),
                contacts: Vec::new(),
                proxy_authenticate: None,
                headers: Vec::new(),
                body: Bytes::new(),
            },
        }
    }

    /// Copies a downstream response onto the upstream request it answers, as
    /// a proxy does when relaying.
    pub fn relay(upstream: &Request, downstream: &Response) -> Self {
        let mut to = upstream.to.clone();
        to.tag = downstream.to.tag.clone();
        SimpleResponseBuilder {
            response: Response {
                status: downstream.status,
                reason: downstream.reason.clone(),
                via: upstream.via.clone(),
                from: upstream.from.clone(),
                to,
                call_id: upstream.call_id.clone(),
                cseq: upstream.cseq.clone(),
                contacts: downstream.contacts.clone(),
                proxy_authenticate: downstream.proxy_authenticate.clone(),
                headers: downstream.headers.clone(),
                body: downstream.body.clone(),
            },
        }
    }

    pub fn to_tag(mut self, tag: &str) -> Self {
        self.response.to.tag = Some(tag.to_string());
        self
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.response.reason = Some(reason.to_string());
        self
    }

    pub fn contact(mut self, contact: Contact) -> Self {
        self.response.contacts.push(contact);
        self
    }

    pub fn contacts(mut self, contacts: impl IntoIterator<Item = Contact>) -> Self {
        self.response.contacts.extend(contacts);
        self
    }

    pub fn proxy_authenticate(mut self, challenge: &str) -> Self {
        self.response.proxy_authenticate = Some(challenge.to_string());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.response.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.response.body = body.into();
        self
    }

    pub fn build(self) -> Response {
        self.response
    }
}
