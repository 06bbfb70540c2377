//! ShoalEngine - the entry point applications talk to
//!
//! The engine owns every table the send path and recovery need: transport
//! stubs, the delivery cache, the security evaluator, deferred messages,
//! persisted ports and the access list. Nothing is process-wide, so several
//! engines can run side by side in one process.
//!
//! # Example
//!
//! ```ignore
//! use shoal_core::{EngineConfig, Interest, PeerIdentity, ShoalEngine};
//!
//! let engine = ShoalEngine::new("~/.shoal/data", EngineConfig::default())?;
//! engine.register_transport(TransportKind::Tcp, tcp_factory).await;
//! engine.start_all().await;
//!
//! let bob = PeerIdentity::new("Bob", "urn:bob").with_address("tcp://bob:7070");
//! engine.send_or_defer_interest(&Interest::topic("urn:fish"), &bob).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::access::AccessList;
use crate::config::EngineConfig;
use crate::dedup::DeliveryCache;
use crate::deferred::{DeferredMessage, DeferredStore, ReplayReport};
use crate::dispatch::{Delivery, Dispatcher};
use crate::error::ShoalError;
use crate::message::InboundMessage;
use crate::recovery::{Port, PortFactory, RecoveryStore};
use crate::security::{SecurityEvaluator, SecurityPolicy, TrustStore};
use crate::storage::{MemoryPropertyStore, PropertyStore, Storage};
use crate::transport::{Connection, TransportFactory, TransportRegistry};
use crate::types::{
    Interest, Knowledge, MessageId, Payload, PeerAddress, PeerIdentity, ReceiverCoordinates,
    TransportKind,
};

/// File name of the property database inside the data directory
pub const DATABASE_FILE: &str = "shoal.redb";

/// Result of [`ShoalEngine::send_or_defer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message went out, or its content had already been delivered
    Delivered(Delivery),
    /// No address worked; the message was parked for replay
    Deferred(MessageId),
}

/// Main entry point
pub struct ShoalEngine {
    config: EngineConfig,
    data_dir: Option<PathBuf>,
    properties: Option<Arc<dyn PropertyStore>>,
    registry: Arc<TransportRegistry>,
    dispatcher: Dispatcher,
    deferred: DeferredStore,
    ports: RecoveryStore,
    access: AccessList,
    connection_timeout_ms: AtomicU64,
}

impl ShoalEngine {
    /// Create an engine persisting to `data_dir`.
    ///
    /// Creates the directory and the redb property database if needed.
    pub fn new(data_dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self, ShoalError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        info!(?data_dir, instance = %config.instance, "Initializing ShoalEngine");

        std::fs::create_dir_all(&data_dir)?;
        let storage = Storage::new(data_dir.join(DATABASE_FILE))?;

        let mut engine = Self::with_store(config, Some(Arc::new(storage)))?;
        engine.data_dir = Some(data_dir);
        Ok(engine)
    }

    /// Engine whose properties live in memory only
    pub fn in_memory(config: EngineConfig) -> Result<Self, ShoalError> {
        Self::with_store(config, Some(Arc::new(MemoryPropertyStore::new())))
    }

    /// Engine over any property store. Without one, deferring messages and
    /// persisting ports fail with [`ShoalError::StorageUnavailable`].
    pub fn with_store(
        config: EngineConfig,
        properties: Option<Arc<dyn PropertyStore>>,
    ) -> Result<Self, ShoalError> {
        config.validate()?;

        let registry = Arc::new(TransportRegistry::new());
        let cache = Arc::new(DeliveryCache::new(&config.dedup));
        let dispatcher = Dispatcher::new(registry.clone(), cache, config.connect_timeout());

        Ok(Self {
            deferred: DeferredStore::new(properties.clone()),
            ports: RecoveryStore::new(properties.clone())?,
            access: AccessList::new(properties.clone())?,
            connection_timeout_ms: AtomicU64::new(config.connection_timeout_ms),
            data_dir: None,
            config,
            properties,
            registry,
            dispatcher,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Data directory, for engines created with [`ShoalEngine::new`]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn property_store(&self) -> Option<&Arc<dyn PropertyStore>> {
        self.properties.as_ref()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transports
    // ═══════════════════════════════════════════════════════════════════════

    pub fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    /// Register (or replace) the transport serving `kind`
    pub async fn register_transport(&self, kind: TransportKind, factory: TransportFactory) {
        self.registry.register_factory(kind, factory).await;
    }

    pub async fn start_transport(&self, kind: TransportKind) -> Result<(), ShoalError> {
        self.registry.start(kind).await
    }

    pub async fn stop_transport(&self, kind: TransportKind) -> Result<(), ShoalError> {
        self.registry.stop(kind).await
    }

    pub async fn is_started(&self, kind: TransportKind) -> bool {
        self.registry.is_started(kind).await
    }

    pub async fn any_started(&self) -> bool {
        self.registry.any_started().await
    }

    /// Start every registered transport, best effort. Returns the running kinds.
    pub async fn start_all(&self) -> Vec<TransportKind> {
        self.registry.start_all().await
    }

    pub async fn stop_all(&self) {
        self.registry.stop_all().await
    }

    /// Idle timeout for inbound sessions.
    ///
    /// The engine itself only dials out; inbound transports started through
    /// the registry read this value to close sessions that stay silent.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms.load(Ordering::Relaxed))
    }

    /// Change the idle timeout; sessions opened afterwards pick it up
    pub fn set_connection_timeout(&self, timeout: Duration) {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.connection_timeout_ms.store(millis, Ordering::Relaxed);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Security
    // ═══════════════════════════════════════════════════════════════════════

    /// Configure how outgoing messages are encrypted and signed.
    ///
    /// `owner` is sent as the sender of every message and must carry the
    /// subject identifiers peers look our certificate up by. The owner's
    /// private keys come from `trust`. Combinations that cannot satisfy a
    /// `Must` level are rejected and the previous configuration stays.
    pub fn init_security(
        &self,
        policy: SecurityPolicy,
        trust: Option<Arc<dyn TrustStore>>,
        owner: Option<PeerIdentity>,
    ) -> Result<(), ShoalError> {
        let evaluator = SecurityEvaluator::new(policy, trust, owner)?;
        self.dispatcher.set_security(evaluator);
        info!(
            encryption = ?policy.encryption_level,
            signature = ?policy.signature_level,
            reply = ?policy.reply_policy,
            "Security initialized"
        );
        Ok(())
    }

    pub fn security_policy(&self) -> SecurityPolicy {
        *self.dispatcher.security().policy()
    }

    /// Identity messages are sent as
    pub fn owner(&self) -> Option<PeerIdentity> {
        self.dispatcher.security().owner().cloned()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sending
    // ═══════════════════════════════════════════════════════════════════════

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Send `payload` to the first reachable of `addresses`
    pub async fn send(
        &self,
        payload: &Payload,
        addresses: &[PeerAddress],
        receiver: &ReceiverCoordinates,
    ) -> Result<Delivery, ShoalError> {
        self.dispatcher
            .send(payload, addresses, receiver, self.config.default_ttl)
            .await
    }

    /// Expose an interest to a peer
    pub async fn send_interest(
        &self,
        interest: &Interest,
        recipient: &PeerIdentity,
    ) -> Result<Delivery, ShoalError> {
        self.send_payload(&Payload::Interest(interest.clone()), recipient)
            .await
    }

    /// Insert knowledge at a peer. Fragments already delivered to the
    /// chosen address are left out.
    pub async fn send_knowledge(
        &self,
        knowledge: &Knowledge,
        recipient: &PeerIdentity,
    ) -> Result<Delivery, ShoalError> {
        self.send_payload(&Payload::Knowledge(knowledge.clone()), recipient)
            .await
    }

    /// Send opaque bytes to a peer
    pub async fn send_raw(
        &self,
        bytes: &[u8],
        recipient: &PeerIdentity,
    ) -> Result<Delivery, ShoalError> {
        self.send_payload(&Payload::Raw(bytes.to_vec()), recipient)
            .await
    }

    async fn send_payload(
        &self,
        payload: &Payload,
        recipient: &PeerIdentity,
    ) -> Result<Delivery, ShoalError> {
        self.dispatcher
            .send_to_peer(payload, recipient, self.config.default_ttl)
            .await
    }

    /// Send to a peer, deferring the message when none of its addresses works.
    ///
    /// Only exhaustion defers; a security policy violation is returned as is.
    pub async fn send_or_defer(
        &self,
        payload: &Payload,
        recipient: &PeerIdentity,
    ) -> Result<SendOutcome, ShoalError> {
        match self.send_payload(payload, recipient).await {
            Ok(delivery) => Ok(SendOutcome::Delivered(delivery)),
            Err(ShoalError::DispatchExhausted { attempted }) => {
                warn!(recipient = %recipient, attempted, "Peer unreachable, deferring message");
                Ok(SendOutcome::Deferred(self.deferred.defer(payload, recipient)?))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn send_or_defer_interest(
        &self,
        interest: &Interest,
        recipient: &PeerIdentity,
    ) -> Result<SendOutcome, ShoalError> {
        self.send_or_defer(&Payload::Interest(interest.clone()), recipient)
            .await
    }

    pub async fn send_or_defer_knowledge(
        &self,
        knowledge: &Knowledge,
        recipient: &PeerIdentity,
    ) -> Result<SendOutcome, ShoalError> {
        self.send_or_defer(&Payload::Knowledge(knowledge.clone()), recipient)
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inbound and replies
    // ═══════════════════════════════════════════════════════════════════════

    /// Open a received envelope.
    ///
    /// Decrypts and verifies it, then checks the sender against the access
    /// list.
    pub fn open_inbound(&self, bytes: &[u8]) -> Result<InboundMessage, ShoalError> {
        let message = self.dispatcher.security().open_inbound(bytes)?;

        match sender_of(&message) {
            Some(sender) if !self.access.is_accepted(&sender) => {
                warn!(sender = %sender, "Refusing message from peer");
                Err(ShoalError::PeerRefused(sender.to_string()))
            }
            None if !self.access.accepts_anonymous() => {
                warn!("Refusing message without sender");
                Err(ShoalError::PeerRefused("anonymous".to_string()))
            }
            _ => Ok(message),
        }
    }

    /// Answer `request` by regular dispatch to `addresses`
    pub async fn reply(
        &self,
        request: &InboundMessage,
        payload: &Payload,
        addresses: &[PeerAddress],
    ) -> Result<Delivery, ShoalError> {
        self.dispatcher
            .reply(request, payload, addresses, self.config.default_ttl)
            .await
    }

    /// Answer `request` on the connection it arrived on
    pub async fn reply_on(
        &self,
        connection: &mut Connection,
        request: &InboundMessage,
        payload: &Payload,
    ) -> Result<(), ShoalError> {
        self.dispatcher
            .reply_on(connection, request, payload, self.config.default_ttl)
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Delivery history
    // ═══════════════════════════════════════════════════════════════════════

    pub fn delivery_cache(&self) -> &Arc<DeliveryCache> {
        self.dispatcher.cache()
    }

    /// Forget which fragments went where; everything is sent again
    pub fn clear_delivery_history(&self) {
        self.dispatcher.cache().clear();
        info!("Delivery history cleared");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Deferred messages
    // ═══════════════════════════════════════════════════════════════════════

    /// Park a message for later replay
    pub fn defer(&self, payload: &Payload, recipient: &PeerIdentity) -> Result<MessageId, ShoalError> {
        self.deferred.defer(payload, recipient)
    }

    pub fn pending_messages(&self) -> Result<Vec<DeferredMessage>, ShoalError> {
        self.deferred.pending()
    }

    pub fn purge_deferred(&self) -> Result<usize, ShoalError> {
        self.deferred.purge_all()
    }

    /// Resend every parked message
    pub async fn replay_deferred(&self) -> Result<ReplayReport, ShoalError> {
        self.deferred
            .replay_all(&self.dispatcher, self.config.default_ttl)
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Ports
    // ═══════════════════════════════════════════════════════════════════════

    /// Register how ports of `endpoint_type` are rebuilt at startup
    pub fn register_port_factory(&self, endpoint_type: impl Into<String>, factory: PortFactory) {
        self.ports.register_factory(endpoint_type, factory);
    }

    pub fn persist_port(&self, port: &dyn Port) -> Result<(), ShoalError> {
        self.ports.persist(port)
    }

    pub fn remove_port(&self, port: &dyn Port) -> Result<(), ShoalError> {
        self.ports.remove(port)
    }

    /// Rebuild every persisted port. Call after registering port factories.
    pub fn recover_ports(&self) -> Result<Vec<Arc<dyn Port>>, ShoalError> {
        self.ports.recover_all(self)
    }

    pub fn recovery_store(&self) -> &RecoveryStore {
        &self.ports
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Access list
    // ═══════════════════════════════════════════════════════════════════════

    pub fn accept_peer(&self, peer: &PeerIdentity, accept: bool) -> Result<(), ShoalError> {
        self.access.accept_peer(peer, accept)
    }

    pub fn use_white_list(&self, white_list: bool) -> Result<(), ShoalError> {
        self.access.use_white_list(white_list)
    }

    pub fn use_black_white_list(&self, enabled: bool) -> Result<(), ShoalError> {
        self.access.use_black_white_list(enabled)
    }

    pub fn is_accepted(&self, peer: &PeerIdentity) -> bool {
        self.access.is_accepted(peer)
    }

    pub fn access_list(&self) -> &AccessList {
        &self.access
    }

    /// Stop every transport
    pub async fn shutdown(&self) {
        info!(instance = %self.config.instance, "Shutting down ShoalEngine");
        self.registry.stop_all().await;
    }
}

impl std::fmt::Debug for ShoalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShoalEngine")
            .field("instance", &self.config.instance)
            .field("data_dir", &self.data_dir)
            .field("dispatcher", &self.dispatcher)
            .field("ports", &self.ports)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}

/// The peer an inbound message comes from: the header sender, extended with
/// the identifiers it signed with
fn sender_of(message: &InboundMessage) -> Option<PeerIdentity> {
    let mut sender = message.header.sender.clone();
    if let Some(signer) = &message.signer {
        let peer = sender.get_or_insert_with(|| PeerIdentity {
            name: String::new(),
            sis: Vec::new(),
            addresses: Vec::new(),
        });
        for si in signer {
            if !peer.sis.contains(si) {
                peer.sis.push(si.clone());
            }
        }
    }
    sender
}
