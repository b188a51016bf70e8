use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// SIP status codes seen by the harness, with a `Custom` escape hatch.
///
/// Always build from a number through [`StatusCode::from_u16`] so that a
/// well-known code never ends up as `Custom`; equality relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    // 1xx: Provisional
    /// 100 Trying
    Trying,
    /// 180 Ringing
    Ringing,
    /// 183 Session Progress
    SessionProgress,

    // 2xx: Success
    /// 200 OK
    Ok,

    // 3xx: Redirection
    /// 302 Moved Temporarily
    MovedTemporarily,

    // 4xx: Client Error
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 407 Proxy Authentication Required
    ProxyAuthenticationRequired,
    /// 408 Request Timeout
    RequestTimeout,
    /// 480 Temporarily Unavailable
    TemporarilyUnavailable,
    /// 481 Call/Transaction Does Not Exist
    CallOrTransactionDoesNotExist,
    /// 486 Busy Here
    BusyHere,
    /// 487 Request Terminated
    RequestTerminated,

    // 5xx: Server Error
    /// 500 Server Internal Error
    ServerInternalError,
    /// 501 Not Implemented
    NotImplemented,
    /// 503 Service Unavailable
    ServiceUnavailable,
    /// 504 Server Time-out
    ServerTimeout,

    // 6xx: Global Failure
    /// 603 Decline
    Decline,

    /// Any other code in 100..=699
    Custom(u16),
}

impl StatusCode {
    /// Creates a status code from a raw u16 value
    pub fn from_u16(code: u16) -> Result<Self> {
        Ok(match code {
            100 => StatusCode::Trying,
            180 => StatusCode::Ringing,
            183 => StatusCode::SessionProgress,
            200 => StatusCode::Ok,
            302 => StatusCode::MovedTemporarily,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            407 => StatusCode::ProxyAuthenticationRequired,
            408 => StatusCode::RequestTimeout,
            480 => StatusCode::TemporarilyUnavailable,
            481 => StatusCode::CallOrTransactionDoesNotExist,
            486 => StatusCode::BusyHere,
            487 => StatusCode::RequestTerminated,
            500 => StatusCode::ServerInternalError,
            501 => StatusCode::NotImplemented,
            503 => StatusCode::ServiceUnavailable,
            504 => StatusCode::ServerTimeout,
            603 => StatusCode::Decline,
            100..=699 => StatusCode::Custom(code),
            _ => return Err(Error::InvalidStatusCode(code)),
        })
    }

    /// Returns the numeric value of this status code
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Trying => 100,
            StatusCode::Ringing => 180,
            StatusCode::SessionProgress => 183,
            StatusCode::Ok => 200,
            StatusCode::MovedTemporarily => 302,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::ProxyAuthenticationRequired => 407,
            StatusCode::RequestTimeout => 408,
            StatusCode::TemporarilyUnavailable => 480,
            StatusCode::CallOrTransactionDoesNotExist => 481,
            StatusCode::BusyHere => 486,
            StatusCode::RequestTerminated => 487,
            StatusCode::ServerInternalError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::ServerTimeout => 504,
            StatusCode::Decline => 603,
            StatusCode::Custom(code) => *code,
        }
    }

    /// Default reason phrase
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Trying => "Trying",
            StatusCode::Ringing => "Ringing",
            StatusCode::SessionProgress => "Session Progress",
            StatusCode::Ok => "OK",
            StatusCode::MovedTemporarily => "Moved Temporarily",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::ProxyAuthenticationRequired => "Proxy Authentication Required",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::TemporarilyUnavailable => "Temporarily Unavailable",
            StatusCode::CallOrTransactionDoesNotExist => "Call/Transaction Does Not Exist",
            StatusCode::BusyHere => "Busy Here",
            StatusCode::RequestTerminated => "Request Terminated",
            StatusCode::ServerInternalError => "Server Internal Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::ServerTimeout => "Server Time-out",
            StatusCode::Decline => "Decline",
            StatusCode::Custom(code) => match code / 100 {
                1 => "Provisional",
                2 => "Success",
                3 => "Redirection",
                4 => "Client Error",
                5 => "Server Error",
                _ => "Global Failure",
            },
        }
    }

    /// 1xx
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.as_u16())
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// Anything that ends a transaction (2xx-6xx)
    pub fn is_final(&self) -> bool {
        self.as_u16() >= 200
    }

    /// 3xx-6xx
    pub fn is_error(&self) -> bool {
        self.as_u16() >= 300
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

impl FromStr for StatusCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code = s.trim().parse::<u16>().map_err(|_| Error::InvalidStatusCode(0))?;
        StatusCode::from_u16(code)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        StatusCode::from_u16(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(100, true, false, false)]
    #[case(180, true, false, false)]
    #[case(200, false, true, true)]
    #[case(487, false, false, true)]
    #[case(503, false, false, true)]
    fn classifies(#[case] code: u16, #[case] provisional: bool, #[case] success: bool, #[case] final_: bool) {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(status.as_u16(), code);
        assert_eq!(status.is_provisional(), provisional);
        assert_eq!(status.is_success(), success);
        assert_eq!(status.is_final(), final_);
    }

    #[test]
    fn well_known_codes_never_become_custom() {
        assert_eq!(StatusCode::from_u16(486).unwrap(), StatusCode::BusyHere);
        assert_eq!(StatusCode::from_u16(499).unwrap(), StatusCode::Custom(499));
        assert!(StatusCode::from_u16(99).is_err());
        assert!(StatusCode::from_u16(700).is_err());
    }

    #[test]
    fn display_includes_reason() {
        assert_eq!(StatusCode::RequestTerminated.to_string(), "487 Request Terminated");
    }
}
