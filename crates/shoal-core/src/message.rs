//! Outgoing and inbound messages
//!
//! An [`OutgoingMessage`] is built per send attempt by the dispatcher and
//! sealed into a [`WireEnvelope`](crate::security::WireEnvelope) with the
//! keys of a [`SecurityContext`](crate::security::SecurityContext). An
//! [`InboundMessage`] is what remains after a received envelope has been
//! opened and verified.

use serde::{Deserialize, Serialize};

use crate::error::ShoalError;
use crate::types::{Command, Interest, Knowledge, Payload, PeerIdentity, ReceiverCoordinates};

/// Routing information sent alongside the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// What the receiver is asked to do
    pub command: Command,
    /// Sending peer, if the engine has an owner
    pub sender: Option<PeerIdentity>,
    /// Who and where the message is addressed to
    pub receiver: ReceiverCoordinates,
    /// Remaining hops
    pub ttl: u32,
}

/// A message ready to be sealed
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    /// Routing information
    pub header: MessageHeader,
    /// Serialized payload
    pub payload: Vec<u8>,
}

impl OutgoingMessage {
    /// Serialize `payload` under a header for `receiver`
    pub fn new(
        payload: &Payload,
        sender: Option<PeerIdentity>,
        receiver: ReceiverCoordinates,
        ttl: u32,
    ) -> Result<Self, ShoalError> {
        let bytes = match payload {
            Payload::Interest(interest) => interest.to_bytes()?,
            Payload::Knowledge(knowledge) => knowledge.to_bytes()?,
            Payload::Raw(bytes) => bytes.clone(),
        };
        Ok(Self {
            header: MessageHeader {
                command: payload.command(),
                sender,
                receiver,
                ttl,
            },
            payload: bytes,
        })
    }
}

/// A received message after decryption and signature checks
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Routing information as sent
    pub header: MessageHeader,
    /// Subject identifiers the sender signed with
    pub signer: Option<Vec<String>>,
    /// Decrypted payload
    pub payload: Vec<u8>,
    /// The envelope was sealed for this engine's owner
    pub was_encrypted: bool,
    /// The envelope carried a signature
    pub was_signed: bool,
    /// The signature was checked against a known certificate
    pub verified: bool,
}

impl InboundMessage {
    /// Decode the payload according to the header command
    pub fn decode_payload(&self) -> Result<Payload, ShoalError> {
        Ok(match self.header.command {
            Command::Expose => Payload::Interest(Interest::from_bytes(&self.payload)?),
            Command::Insert => Payload::Knowledge(Knowledge::from_bytes(&self.payload)?),
            Command::Raw => Payload::Raw(self.payload.clone()),
        })
    }

    /// Subject identifiers to address a reply to
    ///
    /// Prefers the signer, falling back to the sender in the header.
    pub fn reply_sis(&self) -> Option<&[String]> {
        self.signer
            .as_deref()
            .or_else(|| self.header.sender.as_ref().map(|s| s.sis.as_slice()))
            .filter(|sis| !sis.is_empty())
    }
}
