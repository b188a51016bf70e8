//! # tfm-client-core
//!
//! Simulated SIP user agents for the tfm harness.
//!
//! A [`UserAgent`] sits on one transport and drives the transaction layer the
//! way a phone would: it registers, places and cancels calls, answers
//! challenges, rings and answers incoming INVITEs. Behaviour can be scripted
//! with [`Action`]s, either directly or through a [`TransactionUser`].
//!
//! ```no_run
//! use std::time::Duration;
//! use tfm_client_core::{UaEvent, UserAgent, UserAgentConfig};
//! use tfm_sip_transport::MemoryNetwork;
//!
//! # async fn example() -> tfm_client_core::ClientResult<()> {
//! let network = MemoryNetwork::new();
//! let config = UserAgentConfig::new(
//!     "sip:jason@127.0.0.1".parse()?,
//!     "127.0.0.1:5060".parse().unwrap(),
//! )
//! .with_auto_digest_retry(true);
//! let jason = UserAgent::bind(&network, "127.0.0.1:5071".parse().unwrap(), config).await?;
//!
//! jason.register(3600, jason.default_contacts()).await?;
//! match jason.next_event(Duration::from_secs(5)).await? {
//!     UaEvent::Final { response, .. } => println!("REGISTER answered with {}", response.status),
//!     other => println!("unexpected {:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod arena;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod tu;
pub mod user_agent;

pub use action::{Action, ActionInterpreter};
pub use arena::{MessageArena, MessageHandle};
pub use config::UserAgentConfig;
pub use error::{ClientError, ClientResult};
pub use events::UaEvent;
pub use logging::{setup_logging, LoggingConfig};
pub use tu::TransactionUser;
pub use user_agent::UserAgent;
