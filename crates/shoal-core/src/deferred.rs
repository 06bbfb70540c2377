//! Messages that could not be sent
//!
//! When every address of a recipient fails, the payload can be parked in
//! the property store and replayed later (typically once a transport comes
//! back). Each message is one property:
//!
//! ```text
//! encode_key(["deferred", <recipient>, <ulid>]) -> postcard(DeferredMessage)
//! ```
//!
//! ULIDs from a monotonic generator keep the insertion order of messages to
//! the same recipient, so replay resends them in the order they were deferred.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ulid::Generator;

use crate::dispatch::{Delivery, Dispatcher};
use crate::encoding::encode_key;
use crate::error::ShoalError;
use crate::storage::PropertyStore;
use crate::types::{Interest, Knowledge, MessageId, Payload, PeerIdentity};

/// Content type of a deferred interest
pub const INTEREST_CONTENT_TYPE: &str = "x-shoal/interest";

/// Content type of deferred knowledge
pub const KNOWLEDGE_CONTENT_TYPE: &str = "x-shoal/knowledge";

/// Content type of deferred raw bytes
pub const RAW_CONTENT_TYPE: &str = "application/octet-stream";

const DEFERRED_NAMESPACE: &str = "deferred";

/// A parked message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredMessage {
    /// Identifier, ordered by time of deferral
    pub id: MessageId,
    /// Who the message was meant for
    pub recipient: PeerIdentity,
    /// One of the `*_CONTENT_TYPE` constants
    pub content_type: String,
    /// Serialized payload
    pub payload: Vec<u8>,
}

impl DeferredMessage {
    /// Decode the payload. `None` for an unknown content type.
    pub fn decode(&self) -> Result<Option<Payload>, ShoalError> {
        let payload = match self.content_type.as_str() {
            INTEREST_CONTENT_TYPE => Payload::Interest(Interest::from_bytes(&self.payload)?),
            KNOWLEDGE_CONTENT_TYPE => Payload::Knowledge(Knowledge::from_bytes(&self.payload)?),
            RAW_CONTENT_TYPE => Payload::Raw(self.payload.clone()),
            _ => return Ok(None),
        };
        Ok(Some(payload))
    }
}

/// Outcome of [`DeferredStore::replay_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Messages handed to a transport, or found already delivered
    pub sent: usize,
    /// Messages whose resend failed; they are not deferred again
    pub failed: usize,
    /// Entries with an unknown content type or an unreadable record
    pub skipped: usize,
}

/// Persistent queue of unsent messages, keyed by recipient
pub struct DeferredStore {
    store: Option<Arc<dyn PropertyStore>>,
    ids: Mutex<Generator>,
    replaying: tokio::sync::Mutex<()>,
}

impl DeferredStore {
    /// Store backed by `store`. Without one every operation fails with
    /// [`ShoalError::StorageUnavailable`].
    pub fn new(store: Option<Arc<dyn PropertyStore>>) -> Self {
        Self {
            store,
            ids: Mutex::new(Generator::new()),
            replaying: tokio::sync::Mutex::new(()),
        }
    }

    fn store(&self) -> Result<&Arc<dyn PropertyStore>, ShoalError> {
        self.store.as_ref().ok_or_else(|| {
            ShoalError::StorageUnavailable("no property store for deferred messages".to_string())
        })
    }

    /// Park `payload` for `recipient`
    pub fn defer(&self, payload: &Payload, recipient: &PeerIdentity) -> Result<MessageId, ShoalError> {
        let store = self.store()?;

        let (content_type, bytes) = match payload {
            Payload::Interest(interest) => (INTEREST_CONTENT_TYPE, interest.to_bytes()?),
            Payload::Knowledge(knowledge) => (KNOWLEDGE_CONTENT_TYPE, knowledge.to_bytes()?),
            Payload::Raw(bytes) => (RAW_CONTENT_TYPE, bytes.clone()),
        };
        let id = self
            .ids
            .lock()
            .generate()
            .map(MessageId)
            .map_err(|e| ShoalError::Storage(format!("Failed to allocate message id: {}", e)))?;

        let message = DeferredMessage {
            id,
            recipient: recipient.clone(),
            content_type: content_type.to_string(),
            payload: bytes,
        };
        let record = postcard::to_allocvec(&message)?;
        store.set_property(&property_name(recipient, &id), Some(&record))?;

        info!(%id, recipient = %recipient, content_type, "Message deferred");
        Ok(id)
    }

    /// Every parked message, grouped by recipient, oldest first within a recipient
    pub fn pending(&self) -> Result<Vec<DeferredMessage>, ShoalError> {
        let store = self.store()?;
        let mut messages = Vec::new();
        for name in store.property_names(&namespace())? {
            if let Some(record) = store.get_property(&name)? {
                messages.push(postcard::from_bytes(&record)?);
            }
        }
        Ok(messages)
    }

    /// Drop every parked message. Returns how many were dropped.
    pub fn purge_all(&self) -> Result<usize, ShoalError> {
        let store = self.store()?;
        let names = store.property_names(&namespace())?;
        for name in &names {
            store.set_property(name, None)?;
        }
        info!(count = names.len(), "Deferred messages purged");
        Ok(names.len())
    }

    /// Resend every parked message through `dispatcher`.
    ///
    /// Each entry is removed before it is resent, so a message that fails
    /// again is dropped rather than parked twice. Entries with an unknown
    /// content type are removed and skipped. Concurrent calls run one after
    /// the other.
    pub async fn replay_all(&self, dispatcher: &Dispatcher, ttl: u32) -> Result<ReplayReport, ShoalError> {
        let _replaying = self.replaying.lock().await;
        let store = self.store()?;
        let mut report = ReplayReport::default();

        for name in store.property_names(&namespace())? {
            let Some(record) = store.get_property(&name)? else {
                continue;
            };
            store.set_property(&name, None)?;

            let message: DeferredMessage = match postcard::from_bytes(&record) {
                Ok(message) => message,
                Err(e) => {
                    warn!(property = %name, error = %e, "Dropping unreadable deferred message");
                    report.skipped += 1;
                    continue;
                }
            };
            let payload = match message.decode() {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    debug!(id = %message.id, content_type = %message.content_type, "Skipping unknown content type");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(id = %message.id, error = %e, "Dropping undecodable deferred message");
                    report.skipped += 1;
                    continue;
                }
            };

            match dispatcher.send_to_peer(&payload, &message.recipient, ttl).await {
                Ok(Delivery::Sent { address, .. }) => {
                    debug!(id = %message.id, %address, "Deferred message sent");
                    report.sent += 1;
                }
                Ok(Delivery::AlreadyDelivered { address }) => {
                    debug!(id = %message.id, %address, "Deferred message was already delivered");
                    report.sent += 1;
                }
                Err(e) => {
                    warn!(id = %message.id, recipient = %message.recipient, error = %e, "Resending deferred message failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "Deferred messages replayed"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for DeferredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredStore")
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

fn namespace() -> String {
    encode_key(&[DEFERRED_NAMESPACE])
}

fn recipient_key(recipient: &PeerIdentity) -> &str {
    recipient.primary_si().unwrap_or(recipient.name.as_str())
}

fn property_name(recipient: &PeerIdentity, id: &MessageId) -> String {
    let id = id.to_string();
    encode_key(&[DEFERRED_NAMESPACE, recipient_key(recipient), id.as_str()])
}
