//! Opening and verifying received envelopes

use tracing::{debug, warn};

use super::envelope::{WireEnvelope, ENVELOPE_VERSION};
use super::evaluator::SecurityEvaluator;
use crate::error::ShoalError;
use crate::message::InboundMessage;

impl SecurityEvaluator {
    /// Decode, decrypt and verify a received envelope.
    ///
    /// A signature that does not match the signer's certificate is always
    /// refused. A signature whose signer has no certificate in the trust
    /// store is refused only with `refuse_unverifiably`; otherwise the
    /// message is accepted with `verified == false`.
    pub fn open_inbound(&self, bytes: &[u8]) -> Result<InboundMessage, ShoalError> {
        let envelope = WireEnvelope::from_bytes(bytes)?;
        self.open_envelope(&envelope)
    }

    /// Decrypt and verify an already decoded envelope
    pub fn open_envelope(&self, envelope: &WireEnvelope) -> Result<InboundMessage, ShoalError> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(ShoalError::EnvelopeVersionUnsupported(envelope.version));
        }

        let verified = if envelope.is_signed() {
            self.check_signature(envelope)?
        } else {
            false
        };

        let payload = envelope.open_body(self.private_key())?;

        debug!(
            command = %envelope.header.command,
            was_encrypted = envelope.is_sealed(),
            was_signed = envelope.is_signed(),
            verified,
            "Opened inbound envelope"
        );

        Ok(InboundMessage {
            header: envelope.header.clone(),
            signer: envelope.signer.clone(),
            payload,
            was_encrypted: envelope.is_sealed(),
            was_signed: envelope.is_signed(),
            verified,
        })
    }

    /// `Ok(true)` when verified, `Ok(false)` when unverifiable but tolerated
    fn check_signature(&self, envelope: &WireEnvelope) -> Result<bool, ShoalError> {
        let signer = envelope.signer.as_deref().unwrap_or_default();

        let certificate = if signer.is_empty() {
            None
        } else {
            self.trust_store()
                .and_then(|trust| trust.lookup_certificate(signer))
        };

        match certificate {
            Some(certificate) => {
                if envelope.verify(&certificate.public_key)? {
                    Ok(true)
                } else {
                    warn!(?signer, "Refusing message with invalid signature");
                    Err(ShoalError::SignatureInvalid(format!(
                        "signature does not match certificate of {:?}",
                        signer
                    )))
                }
            }
            None if self.policy().refuse_unverifiably => {
                warn!(?signer, "Refusing unverifiable message");
                Err(ShoalError::Unverifiable(format!(
                    "no certificate for signer {:?}",
                    signer
                )))
            }
            None => {
                debug!(?signer, "Accepting unverifiable message");
                Ok(false)
            }
        }
    }
}
