//! Generators for branch parameters, tags and Call-IDs.

use uuid::Uuid;

use crate::headers::BRANCH_MAGIC_COOKIE;

/// New RFC 3261 branch: the magic cookie followed by a random token.
pub fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, Uuid::new_v4().simple())
}

/// New From/To tag.
pub fn generate_tag() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..10].to_string()
}

/// New Call-ID, scoped to `host`.
pub fn generate_call_id(host: &str) -> String {
    format!("{}@{}", Uuid::new_v4().simple(), host)
}
