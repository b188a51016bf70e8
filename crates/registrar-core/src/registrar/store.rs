//! Binding storage

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use tfm_sip_core::Uri;

use crate::types::Binding;

/// In-memory binding store, one entry per address-of-record.
///
/// Every mutation of an AOR happens under that AOR's map entry lock, so two
/// writers never interleave on the same contact list.
#[derive(Debug, Clone, Default)]
pub struct BindingStore {
    bindings: Arc<DashMap<String, Vec<Binding>>>,
}

impl BindingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `contact` or refreshes its expiration. `expires == 0` removes it.
    pub fn register(&self, aor: &str, contact: Uri, expires: u32) {
        if expires == 0 {
            self.unregister(aor, &contact);
            return;
        }

        debug!("Binding {} -> {} for {}s", aor, contact, expires);
        let binding = Binding::new(contact, expires);
        self.bindings
            .entry(aor.to_string())
            .and_modify(|list| {
                match list.iter_mut().find(|b| b.contact == binding.contact) {
                    Some(existing) => {
                        existing.expires = binding.expires;
                        existing.expires_at = binding.expires_at;
                    }
                    None => list.push(binding.clone()),
                }
            })
            .or_insert_with(|| vec![binding.clone()]);
    }

    /// Removes one contact. Returns whether it was bound.
    pub fn unregister(&self, aor: &str, contact: &Uri) -> bool {
        let removed = match self.bindings.get_mut(aor) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|b| &b.contact != contact);
                before != list.len()
            }
            None => false,
        };
        self.bindings.remove_if(aor, |_, list| list.is_empty());
        if removed {
            debug!("Unbound {} from {}", contact, aor);
        }
        removed
    }

    /// Drops every binding of `aor`, returning how many there were.
    pub fn unregister_all(&self, aor: &str) -> usize {
        let count = self.bindings.remove(aor).map(|(_, list)| list.len()).unwrap_or(0);
        debug!("Removed {} bindings for {}", count, aor);
        count
    }

    /// Live bindings of `aor`, in registration order.
    pub fn fetch(&self, aor: &str) -> Vec<Binding> {
        self.bindings
            .get(aor)
            .map(|list| list.iter().filter(|b| !b.is_expired()).cloned().collect())
            .unwrap_or_default()
    }

    /// Removes expired bindings everywhere, returning how many went.
    pub fn purge_expired(&self) -> usize {
        let mut purged = 0;
        self.bindings.retain(|_, list| {
            let before = list.len();
            list.retain(|b| !b.is_expired());
            purged += before - list.len();
            !list.is_empty()
        });
        purged
    }

    /// AORs with at least one stored binding, expired or not.
    pub fn aors(&self) -> Vec<String> {
        self.bindings.iter().map(|entry| entry.key().clone()).collect()
    }
}
