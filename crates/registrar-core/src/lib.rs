//! # tfm-registrar-core
//!
//! Contact registration set for the tfm SIP harness.
//!
//! A [`Registrar`] maps addresses-of-record to the contacts currently bound to
//! them and turns REGISTER requests into the matching binding updates:
//!
//! ```
//! use tfm_registrar_core::{Registrar, RegistrarConfig};
//! use tfm_sip_core::Uri;
//!
//! let registrar = Registrar::new(RegistrarConfig::default());
//! let contact = Uri::sip("10.0.0.1").with_user("bob");
//! registrar.register("sip:bob@example.com", contact.clone(), 3600).unwrap();
//! registrar.register("sip:bob@example.com", contact, 3600).unwrap();
//! assert_eq!(registrar.fetch("sip:bob@example.com").len(), 1);
//! ```

pub mod error;
pub mod registrar;
pub mod types;

pub use error::{RegistrarError, Result};
pub use registrar::{BindingStore, Registrar};
pub use types::{Binding, RegistrarConfig, DEFAULT_EXPIRES};
