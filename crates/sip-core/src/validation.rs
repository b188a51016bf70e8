//! Size checks applied by servers before a request reaches application logic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Request;
use crate::status::StatusCode;

/// Upper bounds on identifier sizes a server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLimits {
    /// Longest accepted Call-ID
    pub max_call_id_len: usize,
    /// Longest accepted user part in the Request-URI, From and To
    pub max_uri_user_len: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        MessageLimits {
            max_call_id_len: 1024,
            max_uri_user_len: 1024,
        }
    }
}

/// Reason a request was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Call-ID is {len} bytes, limit is {limit}")]
    CallIdTooLong { len: usize, limit: usize },

    #[error("{field} user part is {len} bytes, limit is {limit}")]
    UserTooLong { field: &'static str, len: usize, limit: usize },

    #[error("Max-Forwards exhausted")]
    TooManyHops,
}

impl ValidationError {
    /// Final response status a server answers with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ValidationError::CallIdTooLong { .. } | ValidationError::UserTooLong { .. } => StatusCode::BadRequest,
            ValidationError::TooManyHops => StatusCode::Custom(483),
        }
    }
}

/// Checks `request` against `limits`.
pub fn validate_request(request: &Request, limits: &MessageLimits) -> Result<(), ValidationError> {
    if request.call_id.len() > limits.max_call_id_len {
        return Err(ValidationError::CallIdTooLong {
            len: request.call_id.len(),
            limit: limits.max_call_id_len,
        });
    }

    let users = [
        ("Request-URI", request.uri.user.as_deref()),
        ("From", request.from.uri.user.as_deref()),
        ("To", request.to.uri.user.as_deref()),
    ];
    for (field, user) in users {
        if let Some(user) = user {
            if user.len() > limits.max_uri_user_len {
                return Err(ValidationError::UserTooLong {
                    field,
                    len: user.len(),
                    limit: limits.max_uri_user_len,
                });
            }
        }
    }

    if request.max_forwards == 0 {
        return Err(ValidationError::TooManyHops);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SimpleRequestBuilder;
    use crate::method::Method;

    fn register(call_id: &str) -> Request {
        SimpleRequestBuilder::new(Method::Register, "sip:127.0.0.1")
            .unwrap()
            .from("", "sip:jason@127.0.0.1", Some("t"))
            .to("", "sip:jason@127.0.0.1", None)
            .call_id(call_id)
            .cseq(1)
            .via("127.0.0.1:5060", "UDP", None)
            .build()
            .unwrap()
    }

    #[test]
    fn oversize_call_id_is_bad_request() {
        let limits = MessageLimits::default();
        assert!(validate_request(&register("short"), &limits).is_ok());

        let err = validate_request(&register(&"a".repeat(2048)), &limits).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BadRequest);
    }

    #[test]
    fn oversize_from_user_is_bad_request() {
        let mut req = register("short");
        req.from.uri.user = Some("x".repeat(2048));
        let err = validate_request(&req, &MessageLimits::default()).unwrap_err();
        assert!(matches!(err, ValidationError::UserTooLong { field: "From", .. }));
    }

    #[test]
    fn exhausted_max_forwards() {
        let mut req = register("short");
        req.max_forwards = 0;
        assert_eq!(
            validate_request(&req, &MessageLimits::default()).unwrap_err().status_code().as_u16(),
            483
        );
    }
}
