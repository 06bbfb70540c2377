//! Owner keypair combining Ed25519 signing and X25519 key agreement

use crate::error::ShoalError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as AgreementPublicKey, StaticSecret};

/// Length of a serialized keypair or public key
pub const KEY_BYTES: usize = 64;

/// Private keys of the engine owner.
///
/// The Ed25519 half signs outgoing messages; the X25519 half opens messages
/// that peers sealed for this owner.
pub struct OwnerKeypair {
    /// Ed25519 signing key
    signing: SigningKey,
    /// X25519 static secret
    agreement: StaticSecret,
}

impl OwnerKeypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// Derive a deterministic keypair from a 32-byte seed
    ///
    /// The seed is used directly for Ed25519; the X25519 secret is derived
    /// from it with BLAKE3 so the two halves never share key material.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(seed);
        let derived = blake3::derive_key("shoal owner x25519 v1", seed);
        let agreement = StaticSecret::from(derived);
        Self { signing, agreement }
    }

    /// Public half, as published in certificates
    pub fn public_key(&self) -> PeerPublicKey {
        PeerPublicKey {
            verifying: self.signing.verifying_key(),
            agreement: AgreementPublicKey::from(&self.agreement),
        }
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }

    /// X25519 shared secret with a peer's agreement key
    pub fn diffie_hellman(&self, peer: &AgreementPublicKey) -> [u8; 32] {
        *self.agreement.diffie_hellman(peer).as_bytes()
    }

    /// Serialize the private keys
    ///
    /// Format: [ed25519_seed: 32 bytes][x25519_secret: 32 bytes]
    pub fn to_bytes(&self) -> [u8; KEY_BYTES] {
        let mut bytes = [0u8; KEY_BYTES];
        bytes[..32].copy_from_slice(self.signing.as_bytes());
        bytes[32..].copy_from_slice(self.agreement.as_bytes());
        bytes
    }

    /// Deserialize private keys
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShoalError> {
        if bytes.len() != KEY_BYTES {
            return Err(ShoalError::Crypto(format!(
                "Keypair must be {} bytes, got {}",
                KEY_BYTES,
                bytes.len()
            )));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&bytes[32..]);

        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
            agreement: StaticSecret::from(secret),
        })
    }
}

impl Clone for OwnerKeypair {
    fn clone(&self) -> Self {
        Self {
            signing: SigningKey::from_bytes(self.signing.as_bytes()),
            agreement: StaticSecret::from(self.agreement.to_bytes()),
        }
    }
}

impl std::fmt::Debug for OwnerKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerKeypair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Public keys of a peer: Ed25519 for verification, X25519 for sealing
#[derive(Clone, Copy)]
pub struct PeerPublicKey {
    verifying: VerifyingKey,
    agreement: AgreementPublicKey,
}

impl PeerPublicKey {
    /// Verify a signature produced by [`OwnerKeypair::sign`]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        let signature = Signature::from_bytes(&bytes);
        self.verifying.verify(message, &signature).is_ok()
    }

    /// X25519 key messages for this peer are sealed to
    pub fn agreement(&self) -> &AgreementPublicKey {
        &self.agreement
    }

    /// Serialize the public key
    ///
    /// Format: [ed25519: 32 bytes][x25519: 32 bytes]
    pub fn to_bytes(&self) -> [u8; KEY_BYTES] {
        let mut bytes = [0u8; KEY_BYTES];
        bytes[..32].copy_from_slice(self.verifying.as_bytes());
        bytes[32..].copy_from_slice(self.agreement.as_bytes());
        bytes
    }

    /// Deserialize a public key
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShoalError> {
        if bytes.len() != KEY_BYTES {
            return Err(ShoalError::Crypto(format!(
                "Public key must be {} bytes, got {}",
                KEY_BYTES,
                bytes.len()
            )));
        }
        let mut ed = [0u8; 32];
        ed.copy_from_slice(&bytes[..32]);
        let verifying = VerifyingKey::from_bytes(&ed)
            .map_err(|_| ShoalError::Crypto("Invalid Ed25519 public key".to_string()))?;
        let mut x = [0u8; 32];
        x.copy_from_slice(&bytes[32..]);

        Ok(Self {
            verifying,
            agreement: AgreementPublicKey::from(x),
        })
    }
}

impl std::fmt::Debug for PeerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerPublicKey")
            .field("ed25519", &hex::encode(self.verifying.as_bytes()))
            .field("x25519", &hex::encode(self.agreement.as_bytes()))
            .finish()
    }
}

impl PartialEq for PeerPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PeerPublicKey {}

impl Serialize for PeerPublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for PeerPublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}
