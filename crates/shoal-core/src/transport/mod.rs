//! Transports and their lifecycle
//!
//! ## Overview
//!
//! A transport kind (TCP, mail, Bluetooth, ...) is served by one
//! [`TransportStub`], either stream-based (opens a [`Connection`] per
//! message) or message-based (sends one datagram per message). Concrete
//! socket code lives outside this crate; it plugs in through
//! [`StreamTransport`] / [`MessageTransport`] and a [`TransportFactory`]
//! registered with the [`TransportRegistry`].
//!
//! - [`registry`]: lazy stub construction, start/stop, lookup
//! - [`priority`]: ordering candidate addresses, streams first
//! - [`loopback`]: in-memory transports that record what they are given

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::error::ShoalError;
use crate::types::{PeerAddress, TransportKind};

pub mod loopback;
pub mod priority;
pub mod registry;

pub use priority::prioritize;
pub use registry::TransportRegistry;

/// Writable end of a stream connection
pub type Connection = Box<dyn AsyncWrite + Send + Unpin>;

/// Lifecycle shared by every transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Kind served by this transport
    fn kind(&self) -> TransportKind;

    /// Start accepting inbound traffic
    async fn start(&self) -> Result<(), ShoalError>;

    /// Stop and release resources. A stopped transport is not restarted.
    async fn stop(&self) -> Result<(), ShoalError>;

    /// Whether the transport is running
    fn started(&self) -> bool;
}

/// Transport that opens a connection per outgoing message
#[async_trait]
pub trait StreamTransport: Transport {
    /// Open a connection to `address`
    async fn connect(&self, address: &PeerAddress) -> Result<Connection, ShoalError>;
}

/// Transport that sends self-contained datagrams
#[async_trait]
pub trait MessageTransport: Transport {
    /// Send one datagram to `address`
    async fn send(&self, address: &PeerAddress, bytes: &[u8]) -> Result<(), ShoalError>;
}

/// A live transport, stream- or message-based
#[derive(Clone)]
pub enum TransportStub {
    /// Connection-oriented transport
    Stream(Arc<dyn StreamTransport>),
    /// Datagram transport
    Message(Arc<dyn MessageTransport>),
}

impl TransportStub {
    /// Kind served by the stub
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportStub::Stream(t) => t.kind(),
            TransportStub::Message(t) => t.kind(),
        }
    }

    /// Whether the stub is connection-oriented
    pub fn is_stream(&self) -> bool {
        matches!(self, TransportStub::Stream(_))
    }

    /// Start the transport
    pub async fn start(&self) -> Result<(), ShoalError> {
        match self {
            TransportStub::Stream(t) => t.start().await,
            TransportStub::Message(t) => t.start().await,
        }
    }

    /// Stop the transport
    pub async fn stop(&self) -> Result<(), ShoalError> {
        match self {
            TransportStub::Stream(t) => t.stop().await,
            TransportStub::Message(t) => t.stop().await,
        }
    }

    /// Whether the transport is running
    pub fn started(&self) -> bool {
        match self {
            TransportStub::Stream(t) => t.started(),
            TransportStub::Message(t) => t.started(),
        }
    }
}

impl std::fmt::Debug for TransportStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = if self.is_stream() { "Stream" } else { "Message" };
        f.debug_struct("TransportStub")
            .field("variant", &variant)
            .field("kind", &self.kind())
            .field("started", &self.started())
            .finish()
    }
}

/// Builds a fresh stub for one transport kind
pub type TransportFactory = Arc<dyn Fn() -> Result<TransportStub, ShoalError> + Send + Sync>;
