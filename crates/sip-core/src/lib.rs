//! SIP message model for the tfm transaction harness
//!
//! This crate provides the typed requests and responses exchanged by the
//! harness, the builders used to create them, identifier generation and the
//! size validation servers apply before handing a request to application
//! logic. Parsing wire text is not provided; messages travel between
//! simulated endpoints as values and [`Message::to_bytes`] gives their
//! canonical text form.

pub mod builder;
pub mod error;
pub mod headers;
pub mod ids;
pub mod message;
pub mod method;
pub mod status;
pub mod uri;
pub mod validation;

pub use builder::{SimpleRequestBuilder, SimpleResponseBuilder};
pub use error::{Error, Result};
pub use headers::{CSeq, Contact, Credentials, NameAddr, Via, BRANCH_MAGIC_COOKIE};
pub use ids::{generate_branch, generate_call_id, generate_tag};
pub use message::{Message, Request, Response};
pub use method::{Method, MethodClass};
pub use status::StatusCode;
pub use uri::{Scheme, Uri, DEFAULT_SIP_PORT};
pub use validation::{validate_request, MessageLimits, ValidationError};

/// Re-export of common types and functions
pub mod prelude {
    pub use crate::builder::{SimpleRequestBuilder, SimpleResponseBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::headers::{CSeq, Contact, Credentials, NameAddr, Via};
    pub use crate::ids::{generate_branch, generate_call_id, generate_tag};
    pub use crate::message::{Message, Request, Response};
    pub use crate::method::{Method, MethodClass};
    pub use crate::status::StatusCode;
    pub use crate::uri::{Scheme, Uri};
}
