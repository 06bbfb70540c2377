//! Shoal Core Library
//!
//! Secure multi-transport dispatch and session recovery for peer-to-peer
//! knowledge exchange.
//!
//! ## Overview
//!
//! An application hands the engine interests and knowledge for a peer. The
//! engine picks one of the peer's addresses (stream transports first), opens
//! it through the transport registered for its kind, seals the message as
//! the security policy demands and stops at the first address that took it.
//! Knowledge fragments already delivered to an address are not sent there
//! again. Messages that could not go out at all can be deferred and
//! replayed, and long-lived ports are persisted and rebuilt on restart.
//!
//! ## Modules
//!
//! - [`transport`]: transport traits, stub registry, address ordering
//! - [`security`]: policy evaluation, envelopes, inbound verification
//! - [`dispatch`]: the send path
//! - [`dedup`]: delivery history per fragment
//! - [`deferred`]: unsent messages
//! - [`recovery`]: port persistence
//! - [`access`]: peer white and black lists
//! - [`engine`]: the [`ShoalEngine`] facade owning all of the above
//!
//! ## Quick Start
//!
//! ```ignore
//! use shoal_core::{EngineConfig, Interest, PeerIdentity, ShoalEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ShoalEngine::new("~/.shoal/data", EngineConfig::default())?;
//!     engine.register_transport(TransportKind::Tcp, tcp_factory).await;
//!     engine.start_all().await;
//!
//!     let bob = PeerIdentity::new("Bob", "urn:bob").with_address("tcp://bob:7070");
//!     engine.send_interest(&Interest::topic("urn:fish"), &bob).await?;
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod config;
pub mod crypto;
pub mod dedup;
pub mod deferred;
pub mod dispatch;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod identity;
pub mod logging;
pub mod message;
pub mod recovery;
pub mod security;
pub mod storage;
pub mod transport;
pub mod types;

// Re-exports
pub use access::AccessList;
pub use config::{DedupConfig, EngineConfig};
pub use dedup::DeliveryCache;
pub use deferred::{DeferredMessage, DeferredStore, ReplayReport};
pub use dispatch::{Delivery, Dispatcher};
pub use engine::{SendOutcome, ShoalEngine};
pub use error::{ShoalError, ShoalResult};
pub use identity::{OwnerKeypair, PeerCertificate, PeerPublicKey};
pub use message::{InboundMessage, MessageHeader, OutgoingMessage};
pub use recovery::{Port, PortFactory, PortMemento, RecoveryStore};
pub use security::{
    Direction, MemoryTrustStore, ReplyPolicy, SecurityContext, SecurityEvaluator, SecurityLevel,
    SecurityPolicy, TrustStore, WireEnvelope,
};
pub use storage::{MemoryPropertyStore, PropertyStore, Storage};
pub use transport::{
    Connection, MessageTransport, StreamTransport, Transport, TransportFactory, TransportRegistry,
    TransportStub,
};
pub use types::*;
