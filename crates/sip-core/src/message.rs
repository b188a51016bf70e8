use std::fmt;
use std::fmt::Write as _;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::headers::{CSeq, Contact, Credentials, NameAddr, Via};
use crate::method::{Method, MethodClass};
use crate::status::StatusCode;
use crate::uri::Uri;

/// A SIP request message.
///
/// Once a request has been handed to a transaction it is treated as frozen:
/// the transaction keeps its own copy and retransmits exactly that value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    /// Via stack, top-most first
    pub via: Vec<Via>,
    pub from: NameAddr,
    pub to: NameAddr,
    pub call_id: String,
    pub cseq: CSeq,
    pub max_forwards: u8,
    pub contacts: Vec<Contact>,
    /// Route set, in order
    pub route: Vec<Uri>,
    pub expires: Option<u32>,
    /// Opaque digest credentials; computing them is not our job
    pub authorization: Option<Credentials>,
    /// Extension headers as name/value pairs
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Request {
    pub fn method(&self) -> Method {
        self.method.clone()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn cseq(&self) -> &CSeq {
        &self.cseq
    }

    pub fn top_via(&self) -> Option<&Via> {
        self.via.first()
    }

    /// Branch parameter of the top-most Via, if any.
    pub fn branch(&self) -> Option<&str> {
        self.top_via().and_then(Via::branch)
    }

    pub fn method_class(&self) -> MethodClass {
        self.method.class()
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.from.tag()
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.to.tag()
    }

    /// Looks up an extension header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes the request in RFC 3261 text form.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0\r\n", self.method, self.uri)?;
        for via in &self.via {
            write!(f, "Via: {}\r\n", via)?;
        }
        write!(f, "Max-Forwards: {}\r\n", self.max_forwards)?;
        for route in &self.route {
            write!(f, "Route: <{}>\r\n", route)?;
        }
        write!(f, "From: {}\r\n", self.from)?;
        write!(f, "To: {}\r\n", self.to)?;
        write!(f, "Call-ID: {}\r\n", self.call_id)?;
        write!(f, "CSeq: {}\r\n", self.cseq)?;
        for contact in &self.contacts {
            write!(f, "Contact: {}\r\n", contact)?;
        }
        if let Some(expires) = self.expires {
            write!(f, "Expires: {}\r\n", expires)?;
        }
        if let Some(auth) = &self.authorization {
            write!(f, "{}: {}\r\n", auth.header_name(), auth.value())?;
        }
        write_tail(f, &self.headers, &self.body)
    }
}

/// A SIP response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: StatusCode,
    /// Custom reason phrase (overrides the default for the status code)
    pub reason: Option<String>,
    pub via: Vec<Via>,
    pub from: NameAddr,
    pub to: NameAddr,
    pub call_id: String,
    pub cseq: CSeq,
    pub contacts: Vec<Contact>,
    /// Challenge carried by a 407
    pub proxy_authenticate: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn reason_phrase(&self) -> &str {
        self.reason.as_deref().unwrap_or_else(|| self.status.reason_phrase())
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn cseq(&self) -> &CSeq {
        &self.cseq
    }

    pub fn top_via(&self) -> Option<&Via> {
        self.via.first()
    }

    pub fn branch(&self) -> Option<&str> {
        self.top_via().and_then(Via::branch)
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.from.tag()
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.to.tag()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0 {} {}\r\n", self.status.as_u16(), self.reason_phrase())?;
        for via in &self.via {
            write!(f, "Via: {}\r\n", via)?;
        }
        write!(f, "From: {}\r\n", self.from)?;
        write!(f, "To: {}\r\n", self.to)?;
        write!(f, "Call-ID: {}\r\n", self.call_id)?;
        write!(f, "CSeq: {}\r\n", self.cseq)?;
        for contact in &self.contacts {
            write!(f, "Contact: {}\r\n", contact)?;
        }
        if let Some(challenge) = &self.proxy_authenticate {
            write!(f, "Proxy-Authenticate: {}\r\n", challenge)?;
        }
        write_tail(f, &self.headers, &self.body)
    }
}

fn write_tail(f: &mut fmt::Formatter<'_>, headers: &[(String, String)], body: &Bytes) -> fmt::Result {
    for (name, value) in headers {
        write!(f, "{}: {}\r\n", name, value)?;
    }
    write!(f, "Content-Length: {}\r\n\r\n", body.len())?;
    if !body.is_empty() {
        f.write_str(&String::from_utf8_lossy(body))?;
    }
    Ok(())
}

/// A SIP message, either a request or a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(req) => Some(req),
            Message::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Request(_) => None,
            Message::Response(resp) => Some(resp),
        }
    }

    /// Request method, or `None` for responses.
    pub fn method(&self) -> Option<Method> {
        self.as_request().map(Request::method)
    }

    /// Method the message belongs to: the request method, or the CSeq method of a response.
    pub fn cseq_method(&self) -> &Method {
        match self {
            Message::Request(req) => &req.cseq.method,
            Message::Response(resp) => &resp.cseq.method,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.as_response().map(Response::status)
    }

    pub fn call_id(&self) -> &str {
        match self {
            Message::Request(req) => req.call_id(),
            Message::Response(resp) => resp.call_id(),
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            Message::Request(req) => req.branch(),
            Message::Response(resp) => resp.branch(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(req) => req.to_bytes(),
            Message::Response(resp) => resp.to_bytes(),
        }
    }

    /// One-line description for logs, e.g. `INVITE/180` or `REGISTER`.
    pub fn short_description(&self) -> String {
        let mut out = String::new();
        match self {
            Message::Request(req) => {
                let _ = write!(out, "{}", req.method);
            }
            Message::Response(resp) => {
                let _ = write!(out, "{}/{}", resp.cseq.method, resp.status.as_u16());
            }
        }
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(req) => req.fmt(f),
            Message::Response(resp) => resp.fmt(f),
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Message::Response(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{SimpleRequestBuilder, SimpleResponseBuilder};

    fn options() -> Request {
        SimpleRequestBuilder::new(Method::Options, "sip:bob@127.0.0.1:5070")
            .unwrap()
            .from("", "sip:alice@127.0.0.1", Some("1234"))
            .to("", "sip:bob@127.0.0.1", None)
            .call_id("abc@127.0.0.1")
            .cseq(3)
            .via("127.0.0.1:5060", "UDP", Some("z9hG4bKfixed"))
            .build()
            .unwrap()
    }

    #[test]
    fn serialization_is_stable() {
        let msg = Message::from(options());
        assert_eq!(msg.to_bytes(), msg.clone().to_bytes());

        let text = String::from_utf8(msg.to_bytes().to_vec()).unwrap();
        assert!(text.starts_with("OPTIONS sip:bob@127.0.0.1:5070 SIP/2.0\r\n"));
        assert!(text.contains("Via: SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bKfixed\r\n"));
        assert!(text.contains("CSeq: 3 OPTIONS\r\n"));
        assert!(text.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn response_accessors() {
        let req = options();
        let resp = SimpleResponseBuilder::response_from_request(&req, StatusCode::Ok, Some("Fine"))
            .to_tag("5678")
            .build();
        let msg = Message::from(resp);
        assert_eq!(msg.branch(), Some("z9hG4bKfixed"));
        assert_eq!(msg.status(), Some(StatusCode::Ok));
        assert_eq!(msg.cseq_method(), &Method::Options);
        assert_eq!(msg.short_description(), "OPTIONS/200");
        assert!(msg.to_string().starts_with("SIP/2.0 200 Fine\r\n"));
    }
}
