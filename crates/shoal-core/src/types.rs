//! Core types for Shoal

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub mod address;
pub mod knowledge;
pub mod peer;

pub use address::{PeerAddress, TransportKind};
pub use knowledge::{ContextPoint, Fragment, Fingerprint, Interest, Knowledge};
pub use peer::PeerIdentity;

/// Default number of hops an outgoing message may travel
pub const DEFAULT_TTL: u32 = 10;

/// Unique identifier for a deferred message
///
/// Uses ULID so that identifiers sort in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub Ulid);

impl MessageId {
    /// Create a new MessageId with current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an outgoing message asks the receiver to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Announce an interest
    Expose,
    /// Deliver knowledge
    Insert,
    /// Opaque application bytes
    Raw,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Expose => write!(f, "EXPOSE"),
            Command::Insert => write!(f, "INSERT"),
            Command::Raw => write!(f, "RAW"),
        }
    }
}

/// Payload handed to the dispatch engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// An interest to expose
    Interest(Interest),
    /// Knowledge to insert
    Knowledge(Knowledge),
    /// Raw bytes
    Raw(Vec<u8>),
}

impl Payload {
    /// The command this payload is sent with
    pub fn command(&self) -> Command {
        match self {
            Payload::Interest(_) => Command::Expose,
            Payload::Knowledge(_) => Command::Insert,
            Payload::Raw(_) => Command::Raw,
        }
    }
}

/// Spatial and temporal coordinates a message is addressed to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverCoordinates {
    /// Receiving peer's subject identifiers
    pub peer: Option<Vec<String>>,
    /// Location identifier
    pub spatial: Option<String>,
    /// Time span identifier
    pub time: Option<String>,
}

impl ReceiverCoordinates {
    /// Coordinates that only name a receiving peer
    pub fn for_peer(peer: &PeerIdentity) -> Self {
        Self {
            peer: Some(peer.sis.clone()),
            spatial: None,
            time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_sort_by_creation() {
        let a = MessageId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = MessageId::new();
        assert!(a < b);
    }

    #[test]
    fn test_payload_command() {
        assert_eq!(Payload::Interest(Interest::default()).command(), Command::Expose);
        assert_eq!(Payload::Knowledge(Knowledge::default()).command(), Command::Insert);
        assert_eq!(Payload::Raw(vec![1]).command(), Command::Raw);
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::Expose.to_string(), "EXPOSE");
        assert_eq!(Command::Insert.to_string(), "INSERT");
        assert_eq!(Command::Raw.to_string(), "RAW");
    }
}
