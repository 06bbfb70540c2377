//! Peer identities
//!
//! A `PeerIdentity` names a peer by its subject identifiers (SIs) and lists the
//! addresses it can be reached at. SIs double as lookup keys for certificates
//! in the trust store.

use serde::{Deserialize, Serialize};

use super::address::PeerAddress;

/// Semantic identifier of a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Human-readable name
    pub name: String,
    /// Subject identifiers
    pub sis: Vec<String>,
    /// Addresses the peer can be reached at
    pub addresses: Vec<PeerAddress>,
}

impl PeerIdentity {
    /// Create a peer with a single subject identifier and no addresses
    pub fn new(name: impl Into<String>, si: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sis: vec![si.into()],
            addresses: Vec::new(),
        }
    }

    /// Add an address
    pub fn with_address(mut self, address: impl Into<PeerAddress>) -> Self {
        self.addresses.push(address.into());
        self
    }

    /// Add another subject identifier
    pub fn with_si(mut self, si: impl Into<String>) -> Self {
        self.sis.push(si.into());
        self
    }

    /// First subject identifier, used in logs and as storage key
    pub fn primary_si(&self) -> Option<&str> {
        self.sis.first().map(String::as_str)
    }

    /// Whether this peer shares at least one subject identifier with `sis`
    pub fn matches_any(&self, sis: &[String]) -> bool {
        self.sis.iter().any(|own| sis.iter().any(|si| si == own))
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.primary_si() {
            Some(si) => write!(f, "{} <{}>", self.name, si),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let bob = PeerIdentity::new("Bob", "http://example.org/bob")
            .with_si("urn:bob")
            .with_address("tcp://bob:7070")
            .with_address("mail://bob");

        assert_eq!(bob.primary_si(), Some("http://example.org/bob"));
        assert_eq!(bob.sis.len(), 2);
        assert_eq!(bob.addresses.len(), 2);
        assert_eq!(bob.to_string(), "Bob <http://example.org/bob>");
    }

    #[test]
    fn test_matches_any() {
        let bob = PeerIdentity::new("Bob", "urn:bob");
        assert!(bob.matches_any(&["urn:alice".into(), "urn:bob".into()]));
        assert!(!bob.matches_any(&["urn:alice".into()]));
        assert!(!bob.matches_any(&[]));
    }
}
