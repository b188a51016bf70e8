use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SIP request methods used by the harness.
///
/// Anything else is carried as [`Method::Extension`] so that a request with an
/// unknown method still flows through the non-INVITE transaction machinery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// INVITE: initiate a session
    Invite,
    /// ACK: confirm a final response to INVITE
    Ack,
    /// BYE: terminate a session
    Bye,
    /// CANCEL: cancel a pending INVITE
    Cancel,
    /// REGISTER: bind contacts to an address-of-record
    Register,
    /// OPTIONS: query capabilities
    Options,
    /// INFO: mid-session information
    Info,
    /// MESSAGE: instant message
    Message,
    /// Extension method
    Extension(String),
}

impl Method {
    /// Returns the canonical upper-case token for this method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Info => "INFO",
            Method::Message => "MESSAGE",
            Method::Extension(name) => name.as_str(),
        }
    }

    /// INVITE and ACK share the INVITE transaction state machine; every other
    /// method uses the non-INVITE one.
    pub fn is_invite_class(&self) -> bool {
        matches!(self, Method::Invite | Method::Ack)
    }

    pub fn class(&self) -> MethodClass {
        if self.is_invite_class() {
            MethodClass::Invite
        } else {
            MethodClass::NonInvite
        }
    }
}

/// Which transaction state machine a method runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodClass {
    Invite,
    NonInvite,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(Error::InvalidMethod(s.to_string()));
        }
        Ok(match s {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            "INFO" => Method::Info,
            "MESSAGE" => Method::Message,
            other => Method::Extension(other.to_string()),
        })
    }
}
