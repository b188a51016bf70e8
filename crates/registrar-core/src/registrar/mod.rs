//! Registrar: binding set plus REGISTER processing

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tfm_sip_core::{Contact, Method, Request, Response, SimpleResponseBuilder, StatusCode, Uri};

use crate::error::{RegistrarError, Result};
use crate::types::{Binding, RegistrarConfig};

pub mod store;

pub use store::BindingStore;

/// Contact registration set keyed by address-of-record.
#[derive(Debug, Default)]
pub struct Registrar {
    config: RegistrarConfig,
    store: BindingStore,
    /// Serializes REGISTER processing per AOR
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Registrar {
    pub fn new(config: RegistrarConfig) -> Self {
        Self {
            config,
            store: BindingStore::new(),
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    /// Binds `contact` to `aor`, refreshing an existing binding of the same URI.
    pub fn register(&self, aor: &str, contact: Uri, expires: u32) -> Result<()> {
        self.check_contact(&contact)?;
        self.store.register(aor, contact, expires);
        Ok(())
    }

    pub fn unregister(&self, aor: &str, contact: &Uri) -> bool {
        self.store.unregister(aor, contact)
    }

    pub fn unregister_all(&self, aor: &str) -> usize {
        let removed = self.store.unregister_all(aor);
        self.release_lock(aor);
        removed
    }

    /// Live bindings; expired ones are never returned.
    pub fn fetch(&self, aor: &str) -> Vec<Binding> {
        self.store.fetch(aor)
    }

    pub fn purge_expired(&self) -> usize {
        let purged = self.store.purge_expired();
        if purged > 0 {
            info!("Purged {} expired bindings", purged);
        }
        purged
    }

    /// Applies a REGISTER and builds the final response for it.
    ///
    /// A 200 lists the bindings left after the update. Failures map to the
    /// status of [`RegistrarError::status_code`].
    pub async fn process_register(&self, request: &Request) -> Response {
        match self.apply_register(request).await {
            Ok(bindings) => SimpleResponseBuilder::response_from_request(request, StatusCode::Ok, None)
                .contacts(
                    bindings
                        .into_iter()
                        .map(|b| Contact::with_expires(b.contact.clone(), b.remaining())),
                )
                .build(),
            Err(e) => {
                warn!("REGISTER for {} refused: {}", request.to.uri, e);
                SimpleResponseBuilder::response_from_request(request, e.status_code(), None).build()
            }
        }
    }

    async fn apply_register(&self, request: &Request) -> Result<Vec<Binding>> {
        if request.method != Method::Register {
            return Err(RegistrarError::InvalidRegister(format!("{} is not REGISTER", request.method)));
        }

        let aor = request.to.uri.aor();
        let lock = self.lock_for(&aor);
        let result = {
            let _guard = lock.lock().await;
            self.apply_locked(&aor, request)
        };
        drop(lock);
        self.release_lock(&aor);
        result
    }

    fn apply_locked(&self, aor: &str, request: &Request) -> Result<Vec<Binding>> {
        if request.contacts.iter().any(Contact::is_wildcard) {
            if request.contacts.len() != 1 || request.expires != Some(0) {
                return Err(RegistrarError::InvalidWildcard);
            }
            self.store.unregister_all(aor);
            return Ok(Vec::new());
        }

        // Refuse the whole request before touching any binding
        for uri in request.contacts.iter().filter_map(Contact::uri) {
            self.check_contact(uri)?;
        }

        for contact in &request.contacts {
            let Some(uri) = contact.uri() else { continue };
            let expires = contact
                .expires()
                .or(request.expires)
                .unwrap_or(self.config.default_expires);
            self.store.register(aor, uri.clone(), expires);
        }

        let bindings = self.store.fetch(aor);
        debug!("{} now has {} bindings", aor, bindings.len());
        Ok(bindings)
    }

    fn check_contact(&self, contact: &Uri) -> Result<()> {
        let len = contact.user.as_ref().map_or(0, String::len);
        if len > self.config.max_contact_user_len {
            return Err(RegistrarError::ContactUserTooLong {
                len,
                limit: self.config.max_contact_user_len,
            });
        }
        Ok(())
    }

    fn lock_for(&self, aor: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(aor.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the AOR's lock once nothing is bound and no REGISTER holds or awaits it.
    fn release_lock(&self, aor: &str) {
        self.locks
            .remove_if(aor, |_, lock| Arc::strong_count(lock) == 1 && self.store.fetch(aor).is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tfm_sip_core::{generate_call_id, generate_tag, SimpleRequestBuilder};

    fn register(contacts: Vec<Contact>, expires: Option<u32>) -> Request {
        let mut builder = SimpleRequestBuilder::new(Method::Register, "sip:example.com")
            .unwrap()
            .from("Bob", "sip:bob@example.com", Some(&generate_tag()))
            .to("Bob", "sip:bob@example.com", None)
            .call_id(&generate_call_id("10.0.0.1"))
            .cseq(1)
            .via("10.0.0.1:5070", "UDP", None);
        for contact in contacts {
            builder = builder.contact(contact);
        }
        if let Some(expires) = expires {
            builder = builder.expires(expires);
        }
        builder.build().unwrap()
    }

    fn bob_at(host: &str) -> Uri {
        Uri::sip(host).with_user("bob").with_port(5070)
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_register_keeps_one_binding() {
        let registrar = Registrar::default();
        let request = register(vec![Contact::new(bob_at("10.0.0.1"))], None);

        for _ in 0..3 {
            let response = registrar.process_register(&request).await;
            assert_eq!(response.status, StatusCode::Ok);
            assert_eq!(response.contacts, vec![Contact::with_expires(bob_at("10.0.0.1"), 3600)]);
        }
        assert_eq!(registrar.fetch("sip:bob@example.com").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn contact_param_beats_expires_header() {
        let registrar = Registrar::default();
        let request = register(
            vec![
                Contact::with_expires(bob_at("10.0.0.1"), 120),
                Contact::new(bob_at("10.0.0.2")),
            ],
            Some(600),
        );

        let response = registrar.process_register(&request).await;
        assert_eq!(
            response.contacts,
            vec![
                Contact::with_expires(bob_at("10.0.0.1"), 120),
                Contact::with_expires(bob_at("10.0.0.2"), 600),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wildcard_with_zero_expires_clears_every_binding() {
        let registrar = Registrar::default();
        registrar.register("sip:bob@example.com", bob_at("10.0.0.1"), 3600).unwrap();
        registrar.register("sip:bob@example.com", bob_at("10.0.0.2"), 3600).unwrap();

        let response = registrar
            .process_register(&register(vec![Contact::Wildcard], Some(0)))
            .await;
        assert_eq!(response.status, StatusCode::Ok);
        assert!(response.contacts.is_empty());
        assert!(registrar.fetch("sip:bob@example.com").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wildcard_without_zero_expires_is_a_bad_request() {
        let registrar = Registrar::default();
        registrar.register("sip:bob@example.com", bob_at("10.0.0.1"), 3600).unwrap();

        let response = registrar
            .process_register(&register(vec![Contact::Wildcard], Some(60)))
            .await;
        assert_eq!(response.status, StatusCode::BadRequest);
        assert_eq!(registrar.fetch("sip:bob@example.com").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_expires_removes_only_that_contact() {
        let registrar = Registrar::default();
        registrar.register("sip:bob@example.com", bob_at("10.0.0.1"), 3600).unwrap();
        registrar.register("sip:bob@example.com", bob_at("10.0.0.2"), 3600).unwrap();

        let response = registrar
            .process_register(&register(vec![Contact::with_expires(bob_at("10.0.0.1"), 0)], None))
            .await;
        assert_eq!(response.contacts, vec![Contact::with_expires(bob_at("10.0.0.2"), 3600)]);
    }

    #[tokio::test(start_paused = true)]
    async fn oversize_contact_user_gets_500_and_binds_nothing() {
        let registrar = Registrar::new(RegistrarConfig {
            max_contact_user_len: 16,
            ..RegistrarConfig::default()
        });
        let huge = Uri::sip("10.0.0.9").with_user("x".repeat(17));
        let request = register(vec![Contact::new(bob_at("10.0.0.1")), Contact::new(huge.clone())], None);

        let response = registrar.process_register(&request).await;
        assert_eq!(response.status, StatusCode::ServerInternalError);
        assert!(registrar.fetch("sip:bob@example.com").is_empty());
        assert!(matches!(
            registrar.register("sip:bob@example.com", huge, 60),
            Err(RegistrarError::ContactUserTooLong { len: 17, limit: 16 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_registers_for_one_aor_do_not_duplicate() {
        let registrar = Arc::new(Registrar::default());
        let request = register(vec![Contact::new(bob_at("10.0.0.1"))], None);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registrar = registrar.clone();
                let request = request.clone();
                tokio::spawn(async move { registrar.process_register(&request).await.status })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), StatusCode::Ok);
        }
        assert_eq!(registrar.fetch("sip:bob@example.com").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aor_lock_is_dropped_once_nothing_is_bound() {
        let registrar = Registrar::default();
        registrar
            .process_register(&register(vec![Contact::new(bob_at("10.0.0.1"))], None))
            .await;
        assert_eq!(registrar.locks.len(), 1);

        let response = registrar
            .process_register(&register(vec![Contact::Wildcard], Some(0)))
            .await;
        assert_eq!(response.status, StatusCode::Ok);
        assert!(registrar.locks.is_empty());

        registrar
            .process_register(&register(vec![Contact::new(bob_at("10.0.0.1"))], None))
            .await;
        registrar.unregister_all("sip:bob@example.com");
        assert!(registrar.locks.is_empty());
    }

    #[tokio::test]
    async fn non_register_is_refused() {
        let registrar = Registrar::default();
        let mut request = register(vec![Contact::new(bob_at("10.0.0.1"))], None);
        request.method = Method::Options;
        let response = registrar.process_register(&request).await;
        assert_eq!(response.status, StatusCode::BadRequest);
    }
}
