//! # tfm-intermediary-core
//!
//! Transaction-stateful test proxy for the tfm SIP harness.
//!
//! [`TestProxy`] fronts a [`Registrar`](tfm_registrar_core::Registrar),
//! challenges unauthenticated requests, and forwards INVITE and non-INVITE
//! requests to the first live binding of the target AOR, relaying responses
//! back upstream. An upstream CANCEL cancels the downstream leg.

pub mod config;
pub mod error;
pub mod policy;
pub mod proxy;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use policy::{BasicPolicyEngine, PolicyAction, PolicyEngine};
pub use proxy::TestProxy;
