//! Outgoing message dispatch
//!
//! ## Algorithm
//!
//! For one payload and a list of candidate addresses:
//!
//! 1. Order the addresses, stream transports first ([`prioritize`])
//! 2. Per address: resolve the transport kind and its stub, drop knowledge
//!    fragments already delivered there, then open a connection (stream) or
//!    take the address as datagram destination (message)
//! 3. On the first address that got this far, ask the [`SecurityEvaluator`]
//!    for the message keys. A policy violation aborts the whole send.
//! 4. Seal the message and write it: one length-delimited frame on a
//!    stream, one datagram on a message transport
//! 5. Stop at the first address that was written to successfully
//!
//! Per-address failures (unknown scheme, no transport, refused connection,
//! failed write) are logged and the next address is tried. Only a policy
//! violation or the exhaustion of all addresses reaches the caller.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::dedup::DeliveryCache;
use crate::error::ShoalError;
use crate::message::{InboundMessage, OutgoingMessage};
use crate::security::{Direction, SecurityContext, SecurityEvaluator, WireEnvelope};
use crate::transport::{prioritize, Connection, TransportRegistry, TransportStub};
use crate::types::{Payload, PeerAddress, PeerIdentity, ReceiverCoordinates, TransportKind};

/// Outcome of a successful dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The message was written to `address`
    Sent {
        /// Address written to
        address: PeerAddress,
        /// Transport used
        kind: TransportKind,
    },
    /// Every fragment had already been delivered to `address`; nothing was written
    AlreadyDelivered {
        /// Address the knowledge had been delivered to
        address: PeerAddress,
    },
}

impl Delivery {
    /// Address the dispatch settled on
    pub fn address(&self) -> &PeerAddress {
        match self {
            Delivery::Sent { address, .. } | Delivery::AlreadyDelivered { address } => address,
        }
    }
}

/// Sends payloads over the first working transport
pub struct Dispatcher {
    registry: Arc<TransportRegistry>,
    cache: Arc<DeliveryCache>,
    security: RwLock<Arc<SecurityEvaluator>>,
    connect_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Dispatcher over a registry and delivery cache, with the default security policy
    pub fn new(
        registry: Arc<TransportRegistry>,
        cache: Arc<DeliveryCache>,
        connect_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            cache,
            security: RwLock::new(Arc::new(SecurityEvaluator::default())),
            connect_timeout,
        }
    }

    /// Replace the security evaluator
    pub fn set_security(&self, evaluator: SecurityEvaluator) {
        *self.security.write() = Arc::new(evaluator);
    }

    /// Current security evaluator
    pub fn security(&self) -> Arc<SecurityEvaluator> {
        self.security.read().clone()
    }

    /// Transport registry
    pub fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    /// Delivery dedup cache
    pub fn cache(&self) -> &Arc<DeliveryCache> {
        &self.cache
    }

    /// Send a fresh message to the first working address
    pub async fn send(
        &self,
        payload: &Payload,
        addresses: &[PeerAddress],
        receiver: &ReceiverCoordinates,
        ttl: u32,
    ) -> Result<Delivery, ShoalError> {
        self.dispatch(Direction::Outgoing, payload, addresses, receiver, ttl)
            .await
    }

    /// Send a fresh message to a peer, over its own addresses
    pub async fn send_to_peer(
        &self,
        payload: &Payload,
        recipient: &PeerIdentity,
        ttl: u32,
    ) -> Result<Delivery, ShoalError> {
        self.send(
            payload,
            &recipient.addresses,
            &ReceiverCoordinates::for_peer(recipient),
            ttl,
        )
        .await
    }

    /// Answer an inbound message by regular dispatch.
    ///
    /// The reply policy decides whether the request's encryption and
    /// signature are mirrored.
    pub async fn reply(
        &self,
        request: &InboundMessage,
        payload: &Payload,
        addresses: &[PeerAddress],
        ttl: u32,
    ) -> Result<Delivery, ShoalError> {
        let receiver = reply_coordinates(request);
        self.dispatch(reply_direction(request), payload, addresses, &receiver, ttl)
            .await
    }

    /// Answer an inbound message on the connection it arrived on.
    ///
    /// The connection stays open.
    pub async fn reply_on(
        &self,
        connection: &mut Connection,
        request: &InboundMessage,
        payload: &Payload,
        ttl: u32,
    ) -> Result<(), ShoalError> {
        let security = self.security();
        let receiver = reply_coordinates(request);
        let context = security.evaluate(reply_direction(request), receiver.peer.as_deref(), None)?;

        let message = OutgoingMessage::new(payload, security.owner().cloned(), receiver, ttl)?;
        let bytes = WireEnvelope::seal(&message, &context)?.to_bytes()?;
        write_frame(connection, bytes).await?;

        debug!(command = %message.header.command, "Replied on open connection");
        Ok(())
    }

    async fn dispatch(
        &self,
        direction: Direction,
        payload: &Payload,
        addresses: &[PeerAddress],
        receiver: &ReceiverCoordinates,
        ttl: u32,
    ) -> Result<Delivery, ShoalError> {
        let security = self.security();
        let ordered = prioritize(addresses);
        let mut context = None;

        for address in &ordered {
            debug!(%address, command = %payload.command(), "Trying address");

            let attempt = Attempt {
                security: &security,
                direction,
                payload,
                address,
                receiver,
                ttl,
            };
            match self.try_address(attempt, &mut context).await {
                Ok(delivery) => return Ok(delivery),
                Err(e) if e.is_per_address() => {
                    warn!(%address, error = %e, "Skipping address");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            attempted = ordered.len(),
            command = %payload.command(),
            "No address could be reached"
        );
        Err(ShoalError::DispatchExhausted {
            attempted: ordered.len(),
        })
    }

    async fn try_address(
        &self,
        attempt: Attempt<'_>,
        cached: &mut Option<SecurityContext>,
    ) -> Result<Delivery, ShoalError> {
        let address = attempt.address;
        let kind = address.kind()?;
        let stub = self.registry.get_stub(kind).await?;

        let payload = match attempt.payload {
            Payload::Knowledge(knowledge) => match self.cache.filter(knowledge, address) {
                Some(filtered) => Cow::Owned(Payload::Knowledge(filtered)),
                None => {
                    info!(%address, "Knowledge already delivered, nothing to send");
                    return Ok(Delivery::AlreadyDelivered {
                        address: address.clone(),
                    });
                }
            },
            other => Cow::Borrowed(other),
        };

        let connection = match &stub {
            TransportStub::Stream(transport) => {
                let connecting = transport.connect(address);
                let connected = match self.connect_timeout {
                    Some(limit) => tokio::time::timeout(limit, connecting)
                        .await
                        .map_err(|_| ShoalError::ConnectionFailure {
                            kind,
                            reason: format!("connect timed out after {:?}", limit),
                        })?,
                    None => connecting.await,
                };
                Some(connected.map_err(|e| per_address(kind, e))?)
            }
            TransportStub::Message(_) => None,
        };

        // Evaluated once per send, on the first reachable address
        let context = match cached.as_ref() {
            Some(context) => context.clone(),
            None => {
                let context = attempt.security.evaluate(
                    attempt.direction,
                    attempt.receiver.peer.as_deref(),
                    None,
                )?;
                *cached = Some(context.clone());
                context
            }
        };

        let message = OutgoingMessage::new(
            &payload,
            attempt.security.owner().cloned(),
            attempt.receiver.clone(),
            attempt.ttl,
        )?;
        let bytes = WireEnvelope::seal(&message, &context)?.to_bytes()?;

        match (&stub, connection) {
            (_, Some(mut connection)) => {
                write_frame(&mut connection, bytes)
                    .await
                    .map_err(|e| per_address(kind, e))?;
                if let Err(e) = connection.shutdown().await {
                    debug!(%address, error = %e, "Connection shutdown failed after write");
                }
            }
            (TransportStub::Message(transport), None) => {
                transport
                    .send(address, &bytes)
                    .await
                    .map_err(|e| per_address(kind, e))?;
            }
            (TransportStub::Stream(_), None) => {
                return Err(ShoalError::ConnectionFailure {
                    kind,
                    reason: "stream transport without connection".to_string(),
                });
            }
        }

        if let Payload::Knowledge(sent) = &*payload {
            self.cache.record(sent, address);
        }

        info!(
            %address,
            %kind,
            command = %message.header.command,
            encrypted = context.encrypts(),
            signed = context.signs(),
            "Message sent"
        );
        Ok(Delivery::Sent {
            address: address.clone(),
            kind,
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("security", &*self.security.read())
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

struct Attempt<'a> {
    security: &'a SecurityEvaluator,
    direction: Direction,
    payload: &'a Payload,
    address: &'a PeerAddress,
    receiver: &'a ReceiverCoordinates,
    ttl: u32,
}

async fn write_frame(connection: &mut Connection, bytes: Vec<u8>) -> Result<(), ShoalError> {
    let mut framed = FramedWrite::new(connection, LengthDelimitedCodec::new());
    framed.send(Bytes::from(bytes)).await?;
    Ok(())
}

/// Any transport failure only disqualifies the address it happened on
fn per_address(kind: TransportKind, error: ShoalError) -> ShoalError {
    if error.is_per_address() {
        error
    } else {
        ShoalError::ConnectionFailure {
            kind,
            reason: error.to_string(),
        }
    }
}

fn reply_direction(request: &InboundMessage) -> Direction {
    Direction::Reply {
        was_encrypted: request.was_encrypted,
        was_signed: request.was_signed,
    }
}

fn reply_coordinates(request: &InboundMessage) -> ReceiverCoordinates {
    ReceiverCoordinates {
        peer: request.reply_sis().map(<[String]>::to_vec),
        ..ReceiverCoordinates::default()
    }
}
