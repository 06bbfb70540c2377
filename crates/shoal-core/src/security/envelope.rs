//! Sealed and signed wire envelopes
//!
//! ## Security Model
//!
//! Uses **Encrypt-then-Sign**:
//! 1. If the [`SecurityContext`] names a recipient key, the payload is sealed
//!    for it ([`SealedPayload`]); otherwise it travels in the clear
//! 2. If the context signs, the owner signs version, header, signer SIs and
//!    body together
//!
//! The header stays readable so that relays can route on it; the signature
//! still covers it.
//!
//! ## Wire Format
//!
//! The envelope is postcard-encoded:
//!
//! ```text
//! +----------+--------+--------------+-------------------+--------------------+
//! | version  | header | signer (SIs) | body (plain/seal) | signature (opt.)   |
//! | (1 byte) |        | (optional)   | (variable)        | (64 bytes Ed25519) |
//! +----------+--------+--------------+-------------------+--------------------+
//! ```

use serde::{Deserialize, Serialize};

use super::evaluator::SecurityContext;
use crate::crypto::SealedPayload;
use crate::error::ShoalError;
use crate::identity::{OwnerKeypair, PeerPublicKey};
use crate::message::{MessageHeader, OutgoingMessage};

/// Current envelope protocol version
pub const ENVELOPE_VERSION: u8 = 1;

/// Payload as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeBody {
    /// Unencrypted payload
    Plain(Vec<u8>),
    /// Payload sealed for the recipient
    Sealed(SealedPayload),
}

/// A message as written to a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Protocol version for forward compatibility
    pub version: u8,
    /// Routing information
    pub header: MessageHeader,
    /// Subject identifiers of the signer, used to find its certificate
    pub signer: Option<Vec<String>>,
    /// Plain or sealed payload
    pub body: EnvelopeBody,
    /// Ed25519 signature over [`WireEnvelope::signed_data`]
    pub signature: Option<Vec<u8>>,
}

impl WireEnvelope {
    /// Seal and sign a message as the context prescribes
    pub fn seal(message: &OutgoingMessage, context: &SecurityContext) -> Result<Self, ShoalError> {
        let body = match &context.recipient_public_key {
            Some(recipient) => EnvelopeBody::Sealed(SealedPayload::seal(&message.payload, recipient)?),
            None => EnvelopeBody::Plain(message.payload.clone()),
        };

        let signing_key = context.signing_key.as_ref().filter(|_| context.sign);

        let mut envelope = Self {
            version: ENVELOPE_VERSION,
            header: message.header.clone(),
            signer: signing_key.and(context.sender_sis.clone()),
            body,
            signature: None,
        };

        if let Some(key) = signing_key {
            let signed_data = envelope.signed_data()?;
            envelope.signature = Some(key.sign(&signed_data));
        }

        Ok(envelope)
    }

    /// Bytes covered by the signature
    pub fn signed_data(&self) -> Result<Vec<u8>, ShoalError> {
        Ok(postcard::to_allocvec(&(
            self.version,
            &self.header,
            &self.signer,
            &self.body,
        ))?)
    }

    /// Whether the body is sealed
    pub fn is_sealed(&self) -> bool {
        matches!(self.body, EnvelopeBody::Sealed(_))
    }

    /// Whether a signature is attached
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Check the signature against a signer's key. Unsigned envelopes never verify.
    pub fn verify(&self, signer_key: &PeerPublicKey) -> Result<bool, ShoalError> {
        let Some(signature) = &self.signature else {
            return Ok(false);
        };
        Ok(signer_key.verify(&self.signed_data()?, signature))
    }

    /// Recover the payload, opening a sealed body with the owner's keys
    pub fn open_body(&self, owner: Option<&OwnerKeypair>) -> Result<Vec<u8>, ShoalError> {
        match &self.body {
            EnvelopeBody::Plain(payload) => Ok(payload.clone()),
            EnvelopeBody::Sealed(sealed) => {
                let owner = owner.ok_or_else(|| {
                    ShoalError::Crypto("sealed message but no owner private key".to_string())
                })?;
                sealed.open(owner)
            }
        }
    }

    /// Encode for transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>, ShoalError> {
        postcard::to_allocvec(self)
            .map_err(|e| ShoalError::Serialization(format!("Failed to encode envelope: {}", e)))
    }

    /// Decode a received envelope
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShoalError> {
        postcard::from_bytes(bytes)
            .map_err(|e| ShoalError::Serialization(format!("Failed to decode envelope: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Command, PeerIdentity, ReceiverCoordinates};

    fn message(payload: &[u8]) -> OutgoingMessage {
        OutgoingMessage {
            header: MessageHeader {
                command: Command::Raw,
                sender: Some(PeerIdentity::new("Alice", "urn:alice")),
                receiver: ReceiverCoordinates::default(),
                ttl: 10,
            },
            payload: payload.to_vec(),
        }
    }

    fn context(owner: &OwnerKeypair, recipient: Option<PeerPublicKey>, sign: bool) -> SecurityContext {
        SecurityContext {
            signing_key: Some(owner.clone()),
            recipient_public_key: recipient,
            sender_sis: Some(vec!["urn:alice".into()]),
            sign,
        }
    }

    #[test]
    fn test_plain_unsigned() {
        let alice = OwnerKeypair::generate();
        let envelope = WireEnvelope::seal(&message(b"hello"), &context(&alice, None, false)).unwrap();

        assert!(!envelope.is_sealed());
        assert!(!envelope.is_signed());
        assert!(envelope.signer.is_none());
        assert_eq!(envelope.open_body(None).unwrap(), b"hello");
    }

    #[test]
    fn test_sealed_and_signed_roundtrip() {
        let alice = OwnerKeypair::generate();
        let bob = OwnerKeypair::generate();
        let ctx = context(&alice, Some(bob.public_key()), true);

        let bytes = WireEnvelope::seal(&message(b"secret"), &ctx)
            .unwrap()
            .to_bytes()
            .unwrap();
        let envelope = WireEnvelope::from_bytes(&bytes).unwrap();

        assert!(envelope.is_sealed());
        assert_eq!(envelope.signer, Some(vec!["urn:alice".to_string()]));
        assert!(envelope.verify(&alice.public_key()).unwrap());
        assert_eq!(envelope.open_body(Some(&bob)).unwrap(), b"secret");
        assert!(envelope.open_body(Some(&alice)).is_err());
        assert!(envelope.open_body(None).is_err());
    }

    #[test]
    fn test_tampered_header_fails_verification() {
        let alice = OwnerKeypair::generate();
        let mut envelope =
            WireEnvelope::seal(&message(b"hello"), &context(&alice, None, true)).unwrap();
        assert!(envelope.verify(&alice.public_key()).unwrap());

        envelope.header.ttl = 99;
        assert!(!envelope.verify(&alice.public_key()).unwrap());
    }

    #[test]
    fn test_sign_flag_without_key_leaves_unsigned() {
        let ctx = SecurityContext {
            signing_key: None,
            recipient_public_key: None,
            sender_sis: Some(vec!["urn:alice".into()]),
            sign: true,
        };
        let envelope = WireEnvelope::seal(&message(b"x"), &ctx).unwrap();
        assert!(!envelope.is_signed());
        assert!(envelope.signer.is_none());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            WireEnvelope::from_bytes(&[0xFF, 0xFF, 0xFF]),
            Err(ShoalError::Serialization(_))
        ));
    }
}
