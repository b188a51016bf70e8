//! The transaction manager: creates transactions, routes incoming messages
//! to them and delivers their events to the transaction user.
//!
//! # Architecture
//!
//! ```text
//!   Transport ──TransportEvent──► receive loop ──► client/server transactions
//!                                      │                     │
//!                                      │ NewRequest,         │ TransactionEvent
//!                                      │ Stray*, Cancel      ▼
//!                                      └──────────────► dispatcher ──► TU channel
//!                                                                  └─► subscribers
//! ```
//!
//! Every transaction runs its own event loop task. The dispatcher forgets a
//! transaction when it reports `TransactionTerminated`, before the event is
//! delivered, so a TU that sees the event can no longer find the transaction.

mod handlers;
mod types;

pub use types::{TransactionManagerConfig, DEFAULT_EVENT_CAPACITY};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use tfm_sip_core::{Message, Method, Request, Response};
use tfm_sip_transport::{Transport, TransportEvent};

use crate::client::{ClientInviteTransaction, ClientNonInviteTransaction, ClientTransaction};
use crate::error::{Error, Result};
use crate::method::{ack, cancel};
use crate::server::ServerTransaction;
use crate::timer::{TimerManager, TimerSettings};
use crate::transaction::{
    InternalTransactionCommand, LoggedMessage, Transaction, TransactionEvent, TransactionKey, TransactionKind,
    TransactionState,
};

struct ManagerInner {
    transport: Arc<dyn Transport>,
    local_addr: SocketAddr,
    config: TransactionManagerConfig,
    /// Timer settings in effect (reliable transports get zero drain timers)
    timer_settings: TimerSettings,
    reliable: bool,
    client_transactions: DashMap<TransactionKey, Arc<dyn ClientTransaction>>,
    server_transactions: DashMap<TransactionKey, Arc<dyn ServerTransaction>>,
    timer_manager: Arc<TimerManager>,
    /// Sender shared by all transactions; read by the dispatcher
    events_tx: mpsc::Sender<TransactionEvent>,
    event_subscribers: Mutex<Vec<mpsc::Sender<TransactionEvent>>>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// RFC 3261 transaction layer of one endpoint.
///
/// Cloning is cheap; clones share the same transactions.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("local_addr", &self.inner.local_addr)
            .field("reliable", &self.inner.reliable)
            .field("client_transactions", &self.inner.client_transactions.len())
            .field("server_transactions", &self.inner.server_transactions.len())
            .finish()
    }
}

impl TransactionManager {
    /// Creates a manager on top of `transport` and starts its receive loop.
    ///
    /// Returns the manager and the receiver of every [`TransactionEvent`].
    ///
    /// # Example
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use tfm_sip_transport::MemoryNetwork;
    /// # use tfm_transaction_core::{TransactionManager, TransactionManagerConfig};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let network = MemoryNetwork::new();
    /// let (transport, transport_rx) = network.bind("127.0.0.1:5060".parse()?)?;
    ///
    /// let (manager, mut events) = TransactionManager::new(
    ///     Arc::new(transport),
    ///     transport_rx,
    ///     TransactionManagerConfig::default(),
    /// ).await?;
    ///
    /// while let Some(event) = events.recv().await {
    ///     println!("{:?}", event);
    /// }
    /// # manager.shutdown().await;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        config: TransactionManagerConfig,
    ) -> Result<(Self, mpsc::Receiver<TransactionEvent>)> {
        let local_addr = transport.local_addr()?;
        let reliable = config.reliable_transport || transport.is_reliable();
        let timer_settings = if reliable {
            config.timers.for_reliable()
        } else {
            config.timers
        };

        let capacity = config.event_capacity.max(1);
        let (events_tx, internal_rx) = mpsc::channel(capacity);
        let (tu_tx, tu_rx) = mpsc::channel(capacity);

        let manager = Self {
            inner: Arc::new(ManagerInner {
                transport,
                local_addr,
                config,
                timer_settings,
                reliable,
                client_transactions: DashMap::new(),
                server_transactions: DashMap::new(),
                timer_manager: Arc::new(TimerManager::new()),
                events_tx,
                event_subscribers: Mutex::new(Vec::new()),
                running: AtomicBool::new(true),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        let dispatcher = tokio::spawn(handlers::dispatch_events(manager.clone(), internal_rx, tu_tx));
        let receiver = tokio::spawn(handlers::run_receive_loop(manager.clone(), transport_rx));
        manager.inner.tasks.lock().extend([dispatcher, receiver]);

        info!(%local_addr, reliable, "Transaction manager started");
        Ok((manager, tu_rx))
    }

    pub fn config(&self) -> &TransactionManagerConfig {
        &self.inner.config
    }

    /// Timer settings in effect for new transactions.
    pub fn timer_settings(&self) -> &TimerSettings {
        &self.inner.timer_settings
    }

    pub fn is_reliable(&self) -> bool {
        self.inner.reliable
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.clone()
    }

    /// Creates a client transaction for `request` towards `destination`.
    ///
    /// The request is not sent until [`send_request`](Self::send_request).
    /// ACK never creates a transaction; use [`send_ack_for_2xx`](Self::send_ack_for_2xx).
    pub async fn create_client_transaction(&self, request: Request, destination: SocketAddr) -> Result<TransactionKey> {
        if request.method == Method::Ack {
            return Err(Error::InvalidMessage("ACK does not create a client transaction".to_string()));
        }
        let key = TransactionKey::for_client_request(&request)
            .ok_or_else(|| Error::InvalidMessage("request has no Via branch".to_string()))?;
        if self.inner.client_transactions.contains_key(&key) {
            return Err(Error::TransactionExists(key));
        }

        let inner = &self.inner;
        let transaction: Arc<dyn ClientTransaction> = if request.method == Method::Invite {
            Arc::new(ClientInviteTransaction::new(
                key.clone(),
                request,
                destination,
                inner.transport.clone(),
                inner.reliable,
                inner.events_tx.clone(),
                inner.timer_manager.clone(),
                inner.timer_settings,
            )?)
        } else {
            Arc::new(ClientNonInviteTransaction::new(
                key.clone(),
                request,
                destination,
                inner.transport.clone(),
                inner.reliable,
                inner.events_tx.clone(),
                inner.timer_manager.clone(),
                inner.timer_settings,
            )?)
        };

        debug!(id=%key, %destination, "Created client transaction");
        inner.client_transactions.insert(key.clone(), transaction);
        Ok(key)
    }

    /// Sends the request of a client transaction created by
    /// [`create_client_transaction`](Self::create_client_transaction).
    pub async fn send_request(&self, transaction_id: &TransactionKey) -> Result<()> {
        let transaction = self.client_transaction(transaction_id)?;
        transaction.initiate().await
    }

    /// Sends `response` on a server transaction.
    ///
    /// A final response to an INVITE closes the transaction's CANCEL gate
    /// before it is queued: a CANCEL processed after this call gets 481.
    pub async fn send_response(&self, transaction_id: &TransactionKey, response: Response) -> Result<()> {
        let transaction = self.server_transaction(transaction_id)?;
        if response.status.is_final() {
            if let Some(gate) = transaction.final_response_gate() {
                gate.commit_final();
            }
        }
        transaction.send_response(response).await
    }

    /// Cancels a client INVITE transaction that has received a provisional
    /// response. Sends the CANCEL on a transaction of its own, to the same
    /// destination, and returns that transaction's key.
    pub async fn create_cancel(&self, invite_id: &TransactionKey) -> Result<TransactionKey> {
        let invite = self.client_transaction(invite_id)?;
        if invite.kind() != TransactionKind::InviteClient {
            return Err(Error::Other(format!("{} is not a client INVITE transaction", invite_id)));
        }
        // The 1xx is stored before the transaction leaves Calling
        let state = invite.state();
        let provisional_received = invite.last_response().is_some_and(|r| r.status.is_provisional());
        if !matches!(state, TransactionState::Calling | TransactionState::Proceeding) || !provisional_received {
            return Err(Error::Other(format!(
                "CANCEL requires a provisional response; {} is {:?}",
                invite_id, state
            )));
        }

        let cancel_request = cancel::create_cancel_request(invite.original_request(), &self.inner.local_addr)?;
        let key = self
            .create_client_transaction(cancel_request, invite.remote_addr())
            .await?;
        self.send_request(&key).await?;
        debug!(invite=%invite_id, cancel=%key, "CANCEL sent");
        Ok(key)
    }

    /// Builds and sends the ACK for a 2xx received on `invite_id`.
    ///
    /// The ACK is not part of any transaction: it has a new branch and is
    /// sent once per call; repeat it on `SuccessRetransmission`.
    pub async fn send_ack_for_2xx(&self, invite_id: &TransactionKey, response: &Response) -> Result<Request> {
        let invite = self.client_transaction(invite_id)?;
        let ack_request = ack::create_ack_for_2xx(invite.original_request(), response, &self.inner.local_addr)?;
        self.send_stateless(Message::Request(ack_request.clone()), invite.remote_addr())
            .await?;
        Ok(ack_request)
    }

    /// Sends a message outside any transaction.
    pub async fn send_stateless(&self, message: Message, destination: SocketAddr) -> Result<()> {
        trace!(message=%message.short_description(), %destination, "Sending stateless message");
        self.inner.transport.send_message(message, destination).await?;
        Ok(())
    }

    pub fn transaction_exists(&self, transaction_id: &TransactionKey) -> bool {
        self.find_transaction(transaction_id).is_some()
    }

    pub fn transaction_state(&self, transaction_id: &TransactionKey) -> Result<TransactionState> {
        self.with_transaction(transaction_id, |tx| tx.state())
    }

    pub fn transaction_kind(&self, transaction_id: &TransactionKey) -> Result<TransactionKind> {
        self.with_transaction(transaction_id, |tx| tx.kind())
    }

    /// The request that created the transaction.
    pub fn original_request(&self, transaction_id: &TransactionKey) -> Result<Request> {
        self.with_transaction(transaction_id, |tx| tx.original_request().clone())
    }

    /// Last response received (client) or sent (server).
    pub fn last_response(&self, transaction_id: &TransactionKey) -> Result<Option<Response>> {
        self.with_transaction(transaction_id, |tx| tx.last_response())
    }

    /// Messages the transaction sent and received so far.
    pub fn message_log(&self, transaction_id: &TransactionKey) -> Result<Vec<LoggedMessage>> {
        self.with_transaction(transaction_id, |tx| tx.message_log().entries())
    }

    /// Keys of the live client and server transactions.
    pub fn active_transactions(&self) -> (Vec<TransactionKey>, Vec<TransactionKey>) {
        let clients = self
            .inner
            .client_transactions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let servers = self
            .inner
            .server_transactions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        (clients, servers)
    }

    /// Receives every event from now on, in addition to the main channel.
    pub fn subscribe(&self) -> mpsc::Receiver<TransactionEvent> {
        let (tx, rx) = mpsc::channel(self.inner.config.event_capacity.max(1));
        self.inner.event_subscribers.lock().push(tx);
        rx
    }

    /// Terminates every transaction and stops the receive loop.
    pub async fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(local_addr=%self.inner.local_addr, "Shutting down transaction manager");

        let clients: Vec<Arc<dyn ClientTransaction>> = self
            .inner
            .client_transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for tx in clients {
            let _ = tx.send_command(InternalTransactionCommand::Terminate).await;
        }
        let servers: Vec<Arc<dyn ServerTransaction>> = self
            .inner
            .server_transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for tx in servers {
            let _ = tx.send_command(InternalTransactionCommand::Terminate).await;
        }

        // The dispatcher stays up so the TerminatedEvents still reach the TU
        let receiver = self.inner.tasks.lock().pop();
        if let Some(handle) = receiver {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn client_transaction(&self, transaction_id: &TransactionKey) -> Result<Arc<dyn ClientTransaction>> {
        self.inner
            .client_transactions
            .get(transaction_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.clone()))
    }

    fn server_transaction(&self, transaction_id: &TransactionKey) -> Result<Arc<dyn ServerTransaction>> {
        self.inner
            .server_transactions
            .get(transaction_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.clone()))
    }

    fn find_transaction(&self, transaction_id: &TransactionKey) -> Option<Arc<dyn Transaction>> {
        if transaction_id.is_server() {
            self.inner
                .server_transactions
                .get(transaction_id)
                .map(|entry| entry.value().clone() as Arc<dyn Transaction>)
        } else {
            self.inner
                .client_transactions
                .get(transaction_id)
                .map(|entry| entry.value().clone() as Arc<dyn Transaction>)
        }
    }

    fn with_transaction<T>(&self, transaction_id: &TransactionKey, f: impl FnOnce(&dyn Transaction) -> T) -> Result<T> {
        self.find_transaction(transaction_id)
            .map(|tx| f(tx.as_ref()))
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.clone()))
    }
}
