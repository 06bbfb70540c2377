//! Per-message security decisions
//!
//! [`SecurityEvaluator::evaluate`] turns the engine's [`SecurityPolicy`] into
//! the concrete keys used for one outgoing message. Every MUST-level
//! requirement that cannot be met fails with
//! [`ShoalError::SecurityPolicyViolation`] before anything is built, so a
//! message that needs encryption or a signature never leaves without one.

use std::sync::Arc;

use tracing::debug;

use super::policy::{ReplyPolicy, SecurityLevel, SecurityPolicy};
use super::trust::TrustStore;
use crate::error::ShoalError;
use crate::identity::{OwnerKeypair, PeerPublicKey};
use crate::types::PeerIdentity;

/// Whether a message starts a conversation or answers an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A fresh message
    Outgoing,
    /// A reply, carrying how the request was secured
    Reply {
        /// The request was sealed for us
        was_encrypted: bool,
        /// The request carried a signature
        was_signed: bool,
    },
}

/// Keys applied to one outgoing message. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    /// Owner keys used to sign
    pub signing_key: Option<OwnerKeypair>,
    /// Key the message is sealed for; `None` sends it in the clear
    pub recipient_public_key: Option<PeerPublicKey>,
    /// Subject identifiers the receiver looks our certificate up by
    pub sender_sis: Option<Vec<String>>,
    /// Whether to sign
    pub sign: bool,
}

impl SecurityContext {
    /// Whether the message will be sealed
    pub fn encrypts(&self) -> bool {
        self.recipient_public_key.is_some()
    }

    /// Whether the message will carry a signature
    pub fn signs(&self) -> bool {
        self.sign && self.signing_key.is_some()
    }
}

/// Applies a [`SecurityPolicy`] with the engine's keys and trust store
pub struct SecurityEvaluator {
    policy: SecurityPolicy,
    trust: Option<Arc<dyn TrustStore>>,
    owner: Option<PeerIdentity>,
    private_key: Option<OwnerKeypair>,
}

impl SecurityEvaluator {
    /// Validate a policy against the available keys.
    ///
    /// Rejected configurations:
    /// - encryption `Must` without a trust store or without owner keys
    /// - signing `Must` without owner keys or without an owner identity
    pub fn new(
        policy: SecurityPolicy,
        trust: Option<Arc<dyn TrustStore>>,
        owner: Option<PeerIdentity>,
    ) -> Result<Self, ShoalError> {
        let private_key = trust.as_ref().and_then(|t| t.owner_keypair());

        if policy.encryption_level == SecurityLevel::Must {
            if trust.is_none() {
                return Err(violation(
                    "encryption level is MUST but no trust store is available",
                ));
            }
            if private_key.is_none() {
                return Err(violation(
                    "encryption level is MUST but the trust store holds no owner private key",
                ));
            }
        }

        if policy.signature_level == SecurityLevel::Must
            && (private_key.is_none() || owner.is_none())
        {
            return Err(violation(
                "signature level is MUST but private key or owner identity is missing",
            ));
        }

        Ok(Self {
            policy,
            trust,
            owner,
            private_key,
        })
    }

    /// The configured policy
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Owner identity, used as the sender of outgoing messages
    pub fn owner(&self) -> Option<&PeerIdentity> {
        self.owner.as_ref()
    }

    /// Owner private keys
    pub fn private_key(&self) -> Option<&OwnerKeypair> {
        self.private_key.as_ref()
    }

    /// Trust store, for inbound verification
    pub fn trust_store(&self) -> Option<&Arc<dyn TrustStore>> {
        self.trust.as_ref()
    }

    /// Decide the keys for one message.
    ///
    /// `supplied_key` is a recipient key already known to the caller; without
    /// one the trust store is searched by `recipient_sis`.
    pub fn evaluate(
        &self,
        direction: Direction,
        recipient_sis: Option<&[String]>,
        supplied_key: Option<PeerPublicKey>,
    ) -> Result<SecurityContext, ShoalError> {
        match (direction, self.policy.reply_policy) {
            (Direction::Outgoing, _) | (Direction::Reply { .. }, ReplyPolicy::AsDefined) => {
                self.as_defined(recipient_sis, supplied_key)
            }
            (
                Direction::Reply {
                    was_encrypted,
                    was_signed,
                },
                reply_policy,
            ) => self.mirror(
                reply_policy == ReplyPolicy::Same,
                was_encrypted,
                was_signed,
                recipient_sis,
                supplied_key,
            ),
        }
    }

    fn as_defined(
        &self,
        recipient_sis: Option<&[String]>,
        supplied_key: Option<PeerPublicKey>,
    ) -> Result<SecurityContext, ShoalError> {
        let mut context = self.base_context();

        context.recipient_public_key = match self.policy.encryption_level {
            SecurityLevel::No => None,
            SecurityLevel::Must => {
                if self.private_key.is_none() {
                    return Err(violation(
                        "encryption level is MUST but no private key is available",
                    ));
                }
                let key = supplied_key.or_else(|| self.lookup_key(recipient_sis));
                if key.is_none() {
                    return Err(violation(
                        "encryption level is MUST but no public key of the recipient can be found",
                    ));
                }
                key
            }
            SecurityLevel::IfPossible => supplied_key.or_else(|| self.lookup_key(recipient_sis)),
        };

        context.sign = match self.policy.signature_level {
            SecurityLevel::No => false,
            SecurityLevel::Must => {
                if !self.can_sign() {
                    return Err(violation(
                        "signature level is MUST but private key or owner identity is missing",
                    ));
                }
                true
            }
            SecurityLevel::IfPossible => self.can_sign(),
        };

        debug!(
            encrypt = context.encrypts(),
            sign = context.sign,
            "Evaluated outgoing security"
        );
        Ok(context)
    }

    fn mirror(
        &self,
        strict: bool,
        was_encrypted: bool,
        was_signed: bool,
        recipient_sis: Option<&[String]>,
        supplied_key: Option<PeerPublicKey>,
    ) -> Result<SecurityContext, ShoalError> {
        let mut context = self.base_context();

        if was_encrypted {
            context.recipient_public_key = supplied_key.or_else(|| self.lookup_key(recipient_sis));
            if context.recipient_public_key.is_none() && strict {
                return Err(violation(
                    "reply policy is SAME and the request was encrypted, but no public key of the requester can be found",
                ));
            }
        }

        if was_signed {
            context.sign = self.can_sign();
            if !context.sign && strict {
                return Err(violation(
                    "reply policy is SAME and the request was signed, but private key or owner identity is missing",
                ));
            }
        }

        debug!(
            strict,
            encrypt = context.encrypts(),
            sign = context.sign,
            "Evaluated reply security"
        );
        Ok(context)
    }

    fn base_context(&self) -> SecurityContext {
        SecurityContext {
            signing_key: self.private_key.clone(),
            recipient_public_key: None,
            sender_sis: self.owner.as_ref().map(|o| o.sis.clone()),
            sign: false,
        }
    }

    fn can_sign(&self) -> bool {
        self.private_key.is_some() && self.owner.as_ref().is_some_and(|o| !o.sis.is_empty())
    }

    /// Certificate lookup on the send path. With encryption `No` the trust
    /// store is never consulted for recipient keys.
    fn lookup_key(&self, recipient_sis: Option<&[String]>) -> Option<PeerPublicKey> {
        if self.policy.encryption_level == SecurityLevel::No {
            return None;
        }
        let sis = recipient_sis.filter(|sis| !sis.is_empty())?;
        self.trust
            .as_ref()?
            .lookup_certificate(sis)
            .map(|cert| cert.public_key)
    }
}

/// Default policy without keys: nothing is encrypted or signed
impl Default for SecurityEvaluator {
    fn default() -> Self {
        Self {
            policy: SecurityPolicy::default(),
            trust: None,
            owner: None,
            private_key: None,
        }
    }
}

impl std::fmt::Debug for SecurityEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityEvaluator")
            .field("policy", &self.policy)
            .field("has_trust_store", &self.trust.is_some())
            .field("owner", &self.owner)
            .field("has_private_key", &self.private_key.is_some())
            .finish()
    }
}

fn violation(reason: &str) -> ShoalError {
    ShoalError::SecurityPolicyViolation(reason.to_string())
}
