//! Transaction-stateful test proxy
//!
//! ```text
//!  upstream UA ──► server tx ──► policy ──► REGISTER ──► registrar ──► 200/500
//!                                   │
//!                                   ├──► INVITE ──► CallCoordinator ──► client tx ──► callee
//!                                   │       ▲ CANCEL from upstream cancels the downstream leg
//!                                   └──► other ──► client tx ──► callee
//!  responses flow back on the same legs and are relayed upstream
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tfm_dialog_core::{CallCoordinator, CallHandle};
use tfm_registrar_core::Registrar;
use tfm_sip_core::{Request, Uri};
use tfm_sip_transport::{MemoryNetwork, Transport, TransportEvent};
use tfm_transaction_core::{TransactionEvent, TransactionKey, TransactionManager};

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::policy::{BasicPolicyEngine, PolicyEngine};

mod forward;

/// Upstream side of a forwarded request
#[derive(Debug, Clone)]
pub(crate) struct Leg {
    pub upstream_id: TransactionKey,
    pub upstream_request: Request,
}

pub(crate) struct ProxyInner {
    pub config: ProxyConfig,
    pub manager: TransactionManager,
    pub registrar: Registrar,
    /// Downstream INVITE legs
    pub calls: CallCoordinator,
    pub policy: Arc<dyn PolicyEngine>,
    /// Downstream INVITE call -> upstream INVITE
    pub invite_legs: DashMap<CallHandle, Leg>,
    /// Upstream INVITE server tx -> downstream call
    pub upstream_calls: DashMap<TransactionKey, CallHandle>,
    /// Downstream non-INVITE client tx -> upstream request
    pub legs: DashMap<TransactionKey, Leg>,
    /// Upstream INVITE server tx -> downstream Request-URI and next hop, for
    /// the end-to-end ACK of a 2xx
    pub ack_routes: DashMap<TransactionKey, (Uri, SocketAddr)>,
}

/// A proxy with a built-in registrar, run on its own task.
#[derive(Clone)]
pub struct TestProxy {
    inner: Arc<ProxyInner>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TestProxy {
    pub async fn new(
        config: ProxyConfig,
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
    ) -> Result<Self> {
        let policy = Arc::new(BasicPolicyEngine::new(config.message_limits, config.challenge_requests));
        Self::with_policy(config, transport, transport_rx, policy).await
    }

    /// Like [`TestProxy::new`] with a custom admission policy.
    pub async fn with_policy(
        config: ProxyConfig,
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        policy: Arc<dyn PolicyEngine>,
    ) -> Result<Self> {
        let (manager, mut events) = TransactionManager::new(transport, transport_rx, config.transaction.clone()).await?;
        let inner = Arc::new(ProxyInner {
            registrar: Registrar::new(config.registrar),
            calls: CallCoordinator::new(manager.clone()),
            manager,
            policy,
            invite_legs: DashMap::new(),
            upstream_calls: DashMap::new(),
            legs: DashMap::new(),
            ack_routes: DashMap::new(),
            config,
        });

        let loop_inner = inner.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = loop_inner.handle_event(event).await {
                    warn!(error = %e, "Proxy failed to handle event");
                }
            }
            info!("Proxy event loop finished");
        });
        info!(addr = %inner.manager.local_addr(), realm = %inner.config.realm, "Proxy started");

        Ok(Self {
            inner,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Binds a proxy to `addr` on an in-memory network.
    pub async fn bind(network: &MemoryNetwork, addr: SocketAddr, config: ProxyConfig) -> Result<Self> {
        let (transport, rx) = network.bind(addr)?;
        Self::new(config, Arc::new(transport), rx).await
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    pub fn registrar(&self) -> &Registrar {
        &self.inner.registrar
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.inner.manager
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.manager.local_addr()
    }

    /// Requests currently forwarded and not yet finished.
    pub fn active_legs(&self) -> usize {
        self.inner.invite_legs.len() + self.inner.legs.len()
    }

    pub async fn shutdown(&self) {
        self.inner.manager.shutdown().await;
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for TestProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestProxy")
            .field("local_addr", &self.local_addr())
            .field("realm", &self.inner.config.realm)
            .finish()
    }
}
