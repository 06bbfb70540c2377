//! Interests and knowledge as seen by the dispatch layer
//!
//! The semantic data model lives outside this crate. These types carry just
//! enough structure to route, fingerprint and serialize payloads: an
//! interest is a set of coordinate dimensions, knowledge is a list of context
//! points, each holding information fragments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ShoalError;

/// Query-like descriptor of the knowledge a peer wants
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interest {
    /// Topic subject identifiers
    pub topics: Vec<String>,
    /// Peer subject identifiers
    pub peers: Vec<String>,
    /// Location identifiers
    pub locations: Vec<String>,
    /// Time span identifiers
    pub times: Vec<String>,
}

impl Interest {
    /// Interest in a single topic
    pub fn topic(si: impl Into<String>) -> Self {
        Self {
            topics: vec![si.into()],
            ..Default::default()
        }
    }

    /// Serialize for transmission or deferral
    pub fn to_bytes(&self) -> Result<Vec<u8>, ShoalError> {
        serde_json::to_vec(self).map_err(|e| ShoalError::Serialization(e.to_string()))
    }

    /// Parse from serialized bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShoalError> {
        serde_json::from_slice(bytes).map_err(|e| ShoalError::Serialization(e.to_string()))
    }
}

/// BLAKE3 fingerprint of one information fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// One discrete piece of information attached to a context point
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fragment {
    /// MIME-like content type
    pub content_type: String,
    /// Content bytes
    pub content: Vec<u8>,
}

impl Fragment {
    /// Create a fragment
    pub fn new(content_type: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    /// Plain text fragment
    pub fn text(text: &str) -> Self {
        Self::new("text/plain", text.as_bytes())
    }

    /// Fingerprint over content type and content
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.content_type.len() as u64).to_le_bytes());
        hasher.update(self.content_type.as_bytes());
        hasher.update(&self.content);
        Fingerprint(*hasher.finalize().as_bytes())
    }
}

/// Fragments filed under one set of coordinates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPoint {
    /// Coordinates of this point
    pub coordinates: Interest,
    /// Free-form properties of the point itself
    pub properties: BTreeMap<String, String>,
    /// Information fragments
    pub fragments: Vec<Fragment>,
}

impl ContextPoint {
    /// Empty context point at the given coordinates
    pub fn new(coordinates: Interest) -> Self {
        Self {
            coordinates,
            properties: BTreeMap::new(),
            fragments: Vec::new(),
        }
    }

    /// Add a fragment
    pub fn with_fragment(mut self, fragment: Fragment) -> Self {
        self.fragments.push(fragment);
        self
    }

    /// Set a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Same coordinates and properties, no fragments
    pub fn empty_copy(&self) -> Self {
        Self {
            coordinates: self.coordinates.clone(),
            properties: self.properties.clone(),
            fragments: Vec::new(),
        }
    }
}

/// A collection of context points
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Knowledge {
    /// Context points
    pub context_points: Vec<ContextPoint>,
}

impl Knowledge {
    /// Knowledge from a list of context points
    pub fn new(context_points: Vec<ContextPoint>) -> Self {
        Self { context_points }
    }

    /// Whether there is nothing to send
    pub fn is_empty(&self) -> bool {
        self.context_points.is_empty()
    }

    /// All fragments of all context points
    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.context_points.iter().flat_map(|cp| cp.fragments.iter())
    }

    /// Serialize for transmission or deferral
    pub fn to_bytes(&self) -> Result<Vec<u8>, ShoalError> {
        serde_json::to_vec(self).map_err(|e| ShoalError::Serialization(e.to_string()))
    }

    /// Parse from serialized bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShoalError> {
        serde_json::from_slice(bytes).map_err(|e| ShoalError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_depends_on_type_and_content() {
        let a = Fragment::new("text/plain", b"hello".to_vec());
        let b = Fragment::new("text/plain", b"hello".to_vec());
        let c = Fragment::new("text/html", b"hello".to_vec());
        let d = Fragment::new("text/plain", b"hello!".to_vec());

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), d.fingerprint());
    }

    #[test]
    fn test_fingerprint_has_no_boundary_ambiguity() {
        let a = Fragment::new("ab", b"c".to_vec());
        let b = Fragment::new("a", b"bc".to_vec());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_knowledge_serialization() {
        let k = Knowledge::new(vec![ContextPoint::new(Interest::topic("urn:shark"))
            .with_property("origin", "test")
            .with_fragment(Fragment::text("sharks are fish"))]);

        let bytes = k.to_bytes().unwrap();
        assert_eq!(Knowledge::from_bytes(&bytes).unwrap(), k);
        assert_eq!(k.fragments().count(), 1);
    }

    #[test]
    fn test_empty_copy_keeps_metadata() {
        let cp = ContextPoint::new(Interest::topic("urn:t"))
            .with_property("k", "v")
            .with_fragment(Fragment::text("x"));
        let copy = cp.empty_copy();
        assert!(copy.fragments.is_empty());
        assert_eq!(copy.properties.get("k").map(String::as_str), Some("v"));
        assert_eq!(copy.coordinates, cp.coordinates);
    }
}
