//! Encryption layer using ChaCha20-Poly1305 AEAD
//!
//! Two layers:
//! - [`SessionCrypto`]: symmetric encryption with a 32-byte session key.
//! - [`SealedPayload`]: a payload sealed for one recipient. A fresh session key
//!   is derived from an ephemeral X25519 exchange with the recipient's
//!   agreement key (HKDF-SHA256), so only the holder of the matching
//!   [`OwnerKeypair`] can open it.

use crate::error::ShoalError;
use crate::identity::{OwnerKeypair, PeerPublicKey};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey as AgreementPublicKey, StaticSecret};

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag appended by ChaCha20-Poly1305
pub const TAG_SIZE: usize = 16;

/// HKDF info prefix for session keys
const HKDF_INFO: &[u8] = b"shoal-seal-v1";

/// Symmetric encryption with a session key.
///
/// # Wire Format
///
/// Encrypted data format: `[nonce (12 bytes)] + [ciphertext + auth_tag (16 bytes)]`
///
/// # Example
///
/// ```
/// use shoal_core::crypto::SessionCrypto;
///
/// let key = SessionCrypto::generate_key();
/// let crypto = SessionCrypto::new(&key);
///
/// let ciphertext = crypto.encrypt(b"knowledge").unwrap();
/// assert_eq!(crypto.decrypt(&ciphertext).unwrap(), b"knowledge");
/// ```
pub struct SessionCrypto {
    cipher: ChaCha20Poly1305,
}

impl SessionCrypto {
    /// Create a cipher for the given 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a new random 32-byte key.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// Generate a random 12-byte nonce.
    pub fn generate_nonce() -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);
        nonce
    }

    /// Encrypt with a random nonce, prepended to the output.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ShoalError> {
        let nonce_bytes = Self::generate_nonce();
        let ciphertext = self.encrypt_with_nonce(plaintext, &nonce_bytes)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data produced by [`SessionCrypto::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, ShoalError> {
        if data.len() < NONCE_SIZE {
            return Err(ShoalError::Crypto(
                "Data too short to contain nonce".to_string(),
            ));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&data[..NONCE_SIZE]);
        self.decrypt_with_nonce(&data[NONCE_SIZE..], &nonce)
    }

    /// Encrypt with a caller-supplied nonce. The nonce is not prepended.
    pub fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, ShoalError> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| ShoalError::Crypto(format!("Encryption failed: {}", e)))
    }

    /// Decrypt with a caller-supplied nonce.
    pub fn decrypt_with_nonce(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, ShoalError> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| ShoalError::Crypto(format!("Decryption failed: {}", e)))
    }
}

/// A payload sealed for a single recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// Sender's ephemeral X25519 public key
    pub ephemeral_public: [u8; 32],
    /// `[nonce] + [ciphertext + tag]` under the derived session key
    pub ciphertext: Vec<u8>,
}

impl SealedPayload {
    /// Seal `plaintext` so only the owner of `recipient` can open it
    pub fn seal(plaintext: &[u8], recipient: &PeerPublicKey) -> Result<Self, ShoalError> {
        let mut ephemeral_seed = [0u8; 32];
        rand::rng().fill_bytes(&mut ephemeral_seed);
        let ephemeral_secret = StaticSecret::from(ephemeral_seed);
        let ephemeral_public = AgreementPublicKey::from(&ephemeral_secret);

        let shared = ephemeral_secret.diffie_hellman(recipient.agreement());
        let key = derive_key(
            shared.as_bytes(),
            ephemeral_public.as_bytes(),
            recipient.agreement().as_bytes(),
        )?;

        Ok(Self {
            ephemeral_public: *ephemeral_public.as_bytes(),
            ciphertext: SessionCrypto::new(&key).encrypt(plaintext)?,
        })
    }

    /// Open with the recipient's private keys
    pub fn open(&self, owner: &OwnerKeypair) -> Result<Vec<u8>, ShoalError> {
        let ephemeral_public = AgreementPublicKey::from(self.ephemeral_public);
        let shared = owner.diffie_hellman(&ephemeral_public);
        let own_public = owner.public_key();
        let key = derive_key(
            &shared,
            &self.ephemeral_public,
            own_public.agreement().as_bytes(),
        )?;

        SessionCrypto::new(&key).decrypt(&self.ciphertext)
    }
}

/// Derive a 32-byte session key from an X25519 shared secret.
///
/// Both public keys are bound into the HKDF info.
fn derive_key(
    shared_secret: &[u8],
    ephemeral_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> Result<[u8; 32], ShoalError> {
    let mut info = Vec::with_capacity(HKDF_INFO.len() + 64);
    info.extend_from_slice(HKDF_INFO);
    info.extend_from_slice(ephemeral_public);
    info.extend_from_slice(recipient_public);

    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut output = [0u8; 32];
    hkdf.expand(&info, &mut output)
        .map_err(|e| ShoalError::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(output)
}
