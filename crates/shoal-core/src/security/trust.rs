//! Trust store: peer certificates and the owner's private keys

use parking_lot::RwLock;

use crate::identity::{OwnerKeypair, PeerCertificate};

/// Source of peer public keys and the owner's private keys
pub trait TrustStore: Send + Sync {
    /// First certificate naming any of `sis`
    fn lookup_certificate(&self, sis: &[String]) -> Option<PeerCertificate>;

    /// Private keys of the engine owner
    fn owner_keypair(&self) -> Option<OwnerKeypair>;
}

/// Trust store held in memory
#[derive(Debug, Default)]
pub struct MemoryTrustStore {
    certificates: RwLock<Vec<PeerCertificate>>,
    owner: RwLock<Option<OwnerKeypair>>,
}

impl MemoryTrustStore {
    /// Empty store without owner keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the owner's keys
    pub fn with_owner(keypair: OwnerKeypair) -> Self {
        Self {
            certificates: RwLock::new(Vec::new()),
            owner: RwLock::new(Some(keypair)),
        }
    }

    /// Replace the owner's keys
    pub fn set_owner(&self, keypair: Option<OwnerKeypair>) {
        *self.owner.write() = keypair;
    }

    /// Add a certificate, replacing any certificate for the same subjects
    pub fn add_certificate(&self, certificate: PeerCertificate) {
        let mut certificates = self.certificates.write();
        certificates.retain(|c| !c.covers(&certificate.subject_sis));
        certificates.push(certificate);
    }

    /// Remove every certificate naming any of `sis`
    pub fn remove_certificates(&self, sis: &[String]) -> usize {
        let mut certificates = self.certificates.write();
        let before = certificates.len();
        certificates.retain(|c| !c.covers(sis));
        before - certificates.len()
    }

    /// Number of certificates held
    pub fn len(&self) -> usize {
        self.certificates.read().len()
    }

    /// Whether no certificate is held
    pub fn is_empty(&self) -> bool {
        self.certificates.read().is_empty()
    }
}

impl TrustStore for MemoryTrustStore {
    fn lookup_certificate(&self, sis: &[String]) -> Option<PeerCertificate> {
        self.certificates
            .read()
            .iter()
            .find(|c| c.covers(sis))
            .cloned()
    }

    fn owner_keypair(&self) -> Option<OwnerKeypair> {
        self.owner.read().clone()
    }
}
