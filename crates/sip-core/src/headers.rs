//! Typed headers carried by [`Request`](crate::Request) and
//! [`Response`](crate::Response).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::method::Method;
use crate::uri::Uri;

/// RFC 3261 magic cookie that prefixes every compliant branch parameter.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// Credentials answering a digest challenge, by the header that carries them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credentials {
    /// `Authorization`, answering a 401 from the UAS or registrar
    Origin(String),
    /// `Proxy-Authorization`, answering a 407; the proxy consumes it
    Proxy(String),
}

impl Credentials {
    pub fn header_name(&self) -> &'static str {
        match self {
            Credentials::Origin(_) => "Authorization",
            Credentials::Proxy(_) => "Proxy-Authorization",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Credentials::Origin(value) | Credentials::Proxy(value) => value,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Credentials::Proxy(_))
    }
}

/// A single Via header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    /// Transport token, e.g. `UDP`
    pub transport: String,
    /// `host[:port]` of the element that added the Via
    pub sent_by: String,
    /// Transaction branch parameter
    pub branch: Option<String>,
    /// `received` parameter added by the next hop
    pub received: Option<String>,
}

impl Via {
    pub fn new(transport: impl Into<String>, sent_by: impl Into<String>, branch: impl Into<String>) -> Self {
        Via {
            transport: transport.into(),
            sent_by: sent_by.into(),
            branch: Some(branch.into()),
            received: None,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by)?;
        if let Some(branch) = &self.branch {
            write!(f, ";branch={}", branch)?;
        }
        if let Some(received) = &self.received {
            write!(f, ";received={}", received)?;
        }
        Ok(())
    }
}

/// A name-addr as used by From and To.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub tag: Option<String>,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        NameAddr {
            display_name: None,
            uri,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        Ok(())
    }
}

/// CSeq header: sequence number plus method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        CSeq { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

/// Contact header value. `*` is only meaningful in REGISTER with `Expires: 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Contact {
    Wildcard,
    Address { uri: Uri, expires: Option<u32> },
}

impl Contact {
    pub fn new(uri: Uri) -> Self {
        Contact::Address { uri, expires: None }
    }

    pub fn with_expires(uri: Uri, expires: u32) -> Self {
        Contact::Address {
            uri,
            expires: Some(expires),
        }
    }

    pub fn uri(&self) -> Option<&Uri> {
        match self {
            Contact::Wildcard => None,
            Contact::Address { uri, .. } => Some(uri),
        }
    }

    pub fn expires(&self) -> Option<u32> {
        match self {
            Contact::Wildcard => None,
            Contact::Address { expires, .. } => *expires,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Contact::Wildcard)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contact::Wildcard => f.write_str("*"),
            Contact::Address { uri, expires } => {
                write!(f, "<{}>", uri)?;
                if let Some(expires) = expires {
                    write!(f, ";expires={}", expires)?;
                }
                Ok(())
            }
        }
    }
}
