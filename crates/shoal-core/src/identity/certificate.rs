//! Certificates binding subject identifiers to public keys

use serde::{Deserialize, Serialize};

use super::keypair::PeerPublicKey;

/// A peer's public key, filed under its subject identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCertificate {
    /// Subject identifiers the key belongs to
    pub subject_sis: Vec<String>,
    /// The subject's public key
    pub public_key: PeerPublicKey,
}

impl PeerCertificate {
    /// Create a certificate
    pub fn new(subject_sis: Vec<String>, public_key: PeerPublicKey) -> Self {
        Self {
            subject_sis,
            public_key,
        }
    }

    /// Whether the certificate names any of the given SIs
    pub fn covers(&self, sis: &[String]) -> bool {
        self.subject_sis
            .iter()
            .any(|own| sis.iter().any(|si| si.eq_ignore_ascii_case(own)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::OwnerKeypair;

    #[test]
    fn test_covers() {
        let cert = PeerCertificate::new(
            vec!["urn:bob".into(), "http://example.org/bob".into()],
            OwnerKeypair::generate().public_key(),
        );
        assert!(cert.covers(&["URN:BOB".into()]));
        assert!(cert.covers(&["urn:alice".into(), "http://example.org/bob".into()]));
        assert!(!cert.covers(&["urn:alice".into()]));
    }

    #[test]
    fn test_certificate_serde_roundtrip() {
        let cert = PeerCertificate::new(vec!["urn:bob".into()], OwnerKeypair::generate().public_key());
        let bytes = postcard::to_allocvec(&cert).unwrap();
        let back: PeerCertificate = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, cert);
    }
}
