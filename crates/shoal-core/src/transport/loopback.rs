//! In-memory transports
//!
//! Loopback transports never touch the network: they record every
//! connection and datagram they are handed so callers can inspect what would
//! have gone out. Addresses can be marked as failing to exercise failover.

use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio_util::codec::{Decoder, LengthDelimitedCodec};

use super::{Connection, MessageTransport, StreamTransport, Transport};
use crate::error::ShoalError;
use crate::security::WireEnvelope;
use crate::types::{PeerAddress, TransportKind};

#[derive(Debug, Default)]
struct LoopbackLog {
    failing_connects: HashSet<String>,
    failing_writes: HashSet<String>,
    attempts: Vec<PeerAddress>,
    delivered: Vec<(PeerAddress, Vec<u8>)>,
}

impl LoopbackLog {
    fn fails(set: &HashSet<String>, address: &PeerAddress) -> bool {
        set.contains(&address.as_str().to_ascii_lowercase())
    }
}

#[derive(Debug)]
struct Lifecycle {
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    fn start(&self, kind: TransportKind) -> Result<(), ShoalError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ShoalError::ConnectionFailure {
                kind,
                reason: "transport was stopped".to_string(),
            });
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

/// Stream transport whose connections write into memory.
///
/// Each connection's bytes are kept separately; [`frames`](Self::frames)
/// splits them into length-delimited frames.
#[derive(Debug)]
pub struct LoopbackStreamTransport {
    kind: TransportKind,
    lifecycle: Lifecycle,
    log: Arc<Mutex<LoopbackLog>>,
}

impl LoopbackStreamTransport {
    /// New transport serving `kind`
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            lifecycle: Lifecycle::new(),
            log: Arc::new(Mutex::new(LoopbackLog::default())),
        }
    }

    /// Refuse connections to `address`
    pub fn fail_connect(&self, address: &str) {
        self.log
            .lock()
            .failing_connects
            .insert(address.to_ascii_lowercase());
    }

    /// Accept connections to `address` but fail every write
    pub fn fail_writes(&self, address: &str) {
        self.log
            .lock()
            .failing_writes
            .insert(address.to_ascii_lowercase());
    }

    /// Every address a connection was requested for, in order
    pub fn connect_attempts(&self) -> Vec<PeerAddress> {
        self.log.lock().attempts.clone()
    }

    /// Raw bytes written per opened connection
    pub fn connections(&self) -> Vec<(PeerAddress, Vec<u8>)> {
        self.log.lock().delivered.clone()
    }

    /// Length-delimited frames written per opened connection
    pub fn frames(&self) -> Result<Vec<(PeerAddress, Vec<Vec<u8>>)>, ShoalError> {
        self.connections()
            .into_iter()
            .map(|(address, bytes)| Ok((address, split_frames(&bytes)?)))
            .collect()
    }

    /// Every envelope written, in order
    pub fn envelopes(&self) -> Result<Vec<(PeerAddress, WireEnvelope)>, ShoalError> {
        let mut envelopes = Vec::new();
        for (address, frames) in self.frames()? {
            for frame in frames {
                envelopes.push((address.clone(), WireEnvelope::from_bytes(&frame)?));
            }
        }
        Ok(envelopes)
    }
}

#[async_trait]
impl Transport for LoopbackStreamTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn start(&self) -> Result<(), ShoalError> {
        self.lifecycle.start(self.kind)
    }

    async fn stop(&self) -> Result<(), ShoalError> {
        self.lifecycle.stop();
        Ok(())
    }

    fn started(&self) -> bool {
        self.lifecycle.started()
    }
}

#[async_trait]
impl StreamTransport for LoopbackStreamTransport {
    async fn connect(&self, address: &PeerAddress) -> Result<Connection, ShoalError> {
        let mut log = self.log.lock();
        log.attempts.push(address.clone());

        if LoopbackLog::fails(&log.failing_connects, address) {
            return Err(ShoalError::ConnectionFailure {
                kind: self.kind,
                reason: format!("connection to {} refused", address),
            });
        }

        let fail_writes = LoopbackLog::fails(&log.failing_writes, address);
        let index = log.delivered.len();
        log.delivered.push((address.clone(), Vec::new()));

        Ok(Box::new(RecordingConnection {
            index,
            fail_writes,
            log: self.log.clone(),
        }))
    }
}

struct RecordingConnection {
    index: usize,
    fail_writes: bool,
    log: Arc<Mutex<LoopbackLog>>,
}

impl AsyncWrite for RecordingConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "loopback write refused",
            )));
        }
        if let Some((_, bytes)) = self.log.lock().delivered.get_mut(self.index) {
            bytes.extend_from_slice(buf);
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Message transport that records datagrams
#[derive(Debug)]
pub struct LoopbackMessageTransport {
    kind: TransportKind,
    lifecycle: Lifecycle,
    log: Mutex<LoopbackLog>,
}

impl LoopbackMessageTransport {
    /// New transport serving `kind`
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            lifecycle: Lifecycle::new(),
            log: Mutex::new(LoopbackLog::default()),
        }
    }

    /// Fail every send to `address`
    pub fn fail_send(&self, address: &str) {
        self.log
            .lock()
            .failing_writes
            .insert(address.to_ascii_lowercase());
    }

    /// Every address a send was requested for, in order
    pub fn send_attempts(&self) -> Vec<PeerAddress> {
        self.log.lock().attempts.clone()
    }

    /// Datagrams sent successfully
    pub fn datagrams(&self) -> Vec<(PeerAddress, Vec<u8>)> {
        self.log.lock().delivered.clone()
    }

    /// Every envelope sent, in order
    pub fn envelopes(&self) -> Result<Vec<(PeerAddress, WireEnvelope)>, ShoalError> {
        self.datagrams()
            .into_iter()
            .map(|(address, bytes)| Ok((address, WireEnvelope::from_bytes(&bytes)?)))
            .collect()
    }
}

#[async_trait]
impl Transport for LoopbackMessageTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn start(&self) -> Result<(), ShoalError> {
        self.lifecycle.start(self.kind)
    }

    async fn stop(&self) -> Result<(), ShoalError> {
        self.lifecycle.stop();
        Ok(())
    }

    fn started(&self) -> bool {
        self.lifecycle.started()
    }
}

#[async_trait]
impl MessageTransport for LoopbackMessageTransport {
    async fn send(&self, address: &PeerAddress, bytes: &[u8]) -> Result<(), ShoalError> {
        let mut log = self.log.lock();
        log.attempts.push(address.clone());

        if LoopbackLog::fails(&log.failing_writes, address) {
            return Err(ShoalError::ConnectionFailure {
                kind: self.kind,
                reason: format!("send to {} refused", address),
            });
        }
        log.delivered.push((address.clone(), bytes.to_vec()));
        Ok(())
    }
}

/// Split a byte stream into length-delimited frames
pub fn split_frames(bytes: &[u8]) -> Result<Vec<Vec<u8>>, ShoalError> {
    let mut buffer = BytesMut::from(bytes);
    let mut codec = LengthDelimitedCodec::new();
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(&mut buffer)? {
        frames.push(frame.to_vec());
    }
    if !buffer.is_empty() {
        return Err(ShoalError::Serialization(format!(
            "{} trailing bytes after last frame",
            buffer.len()
        )));
    }
    Ok(frames)
}
