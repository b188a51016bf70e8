//! Admission policy for requests reaching the proxy

use async_trait::async_trait;
use tracing::debug;

use tfm_sip_core::{validate_request, Credentials, Method, MessageLimits, Request, StatusCode};

/// What to do with an incoming request before routing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyAction {
    Allow,
    /// 407 with a Proxy-Authenticate challenge
    Challenge,
    Reject(StatusCode),
}

/// Trait for implementing policy logic
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn evaluate(&self, request: &Request) -> PolicyAction;
}

/// Size validation, then a digest challenge for requests without credentials.
#[derive(Debug, Clone)]
pub struct BasicPolicyEngine {
    limits: MessageLimits,
    challenge_requests: bool,
}

impl BasicPolicyEngine {
    pub fn new(limits: MessageLimits, challenge_requests: bool) -> Self {
        Self {
            limits,
            challenge_requests,
        }
    }
}

/// True when the request answers a proxy challenge.
pub fn has_credentials(request: &Request) -> bool {
    request.authorization.as_ref().is_some_and(Credentials::is_proxy)
}

#[async_trait]
impl PolicyEngine for BasicPolicyEngine {
    async fn evaluate(&self, request: &Request) -> PolicyAction {
        if let Err(e) = validate_request(request, &self.limits) {
            debug!(method = %request.method, error = %e, "Request failed validation");
            return PolicyAction::Reject(e.status_code());
        }
        // ACK and CANCEL cannot be challenged
        if matches!(request.method, Method::Ack | Method::Cancel) {
            return PolicyAction::Allow;
        }
        if self.challenge_requests && !has_credentials(request) {
            return PolicyAction::Challenge;
        }
        PolicyAction::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfm_sip_core::SimpleRequestBuilder;

    fn request(call_id: &str) -> Request {
        SimpleRequestBuilder::new(Method::Info, "sip:jason@127.0.0.1")
            .unwrap()
            .from("Derek", "sip:derek@127.0.0.1", Some("d1"))
            .to("Jason", "sip:jason@127.0.0.1", None)
            .call_id(call_id)
            .cseq(1)
            .via("127.0.0.1:5072", "UDP", None)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn validation_comes_before_the_challenge() {
        let policy = BasicPolicyEngine::new(
            MessageLimits {
                max_call_id_len: 8,
                ..MessageLimits::default()
            },
            true,
        );
        assert_eq!(
            policy.evaluate(&request("far-too-long-call-id")).await,
            PolicyAction::Reject(StatusCode::BadRequest)
        );
        assert_eq!(policy.evaluate(&request("short")).await, PolicyAction::Challenge);
    }

    #[tokio::test]
    async fn credentials_pass_the_challenge() {
        let policy = BasicPolicyEngine::new(MessageLimits::default(), true);
        let mut authorized = request("abc");
        authorized.authorization = Some(Credentials::Proxy("Digest username=\"derek\"".to_string()));
        assert_eq!(policy.evaluate(&authorized).await, PolicyAction::Allow);

        // Credentials for the far end do not answer our challenge
        let mut origin_only = request("abc");
        origin_only.authorization = Some(Credentials::Origin("Digest username=\"derek\"".to_string()));
        assert_eq!(policy.evaluate(&origin_only).await, PolicyAction::Challenge);

        let open = BasicPolicyEngine::new(MessageLimits::default(), false);
        assert_eq!(open.evaluate(&request("abc")).await, PolicyAction::Allow);
    }

    #[tokio::test]
    async fn exhausted_max_forwards_is_483() {
        let policy = BasicPolicyEngine::new(MessageLimits::default(), false);
        let mut looped = request("abc");
        looped.max_forwards = 0;
        assert_eq!(
            policy.evaluate(&looped).await,
            PolicyAction::Reject(StatusCode::Custom(483))
        );
    }
}
