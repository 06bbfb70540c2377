//! Peer addresses and the transport kinds derived from them

use serde::{Deserialize, Serialize};

use crate::error::ShoalError;

/// Network transport a peer address is reachable over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportKind {
    /// TCP stream
    Tcp,
    /// HTTP over TCP
    Http,
    /// E-mail
    Mail,
    /// UDP datagrams
    Udp,
    /// Bluetooth
    Bluetooth,
    /// WiFi-Direct
    WifiDirect,
    /// Near field communication
    Nfc,
}

impl TransportKind {
    /// Every known transport kind
    pub const ALL: [TransportKind; 7] = [
        TransportKind::Tcp,
        TransportKind::Http,
        TransportKind::Mail,
        TransportKind::Udp,
        TransportKind::Bluetooth,
        TransportKind::WifiDirect,
        TransportKind::Nfc,
    ];

    /// Resolve a transport kind from an address scheme (case-insensitive)
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "tcp" => Some(TransportKind::Tcp),
            "http" => Some(TransportKind::Http),
            "mail" | "mailto" => Some(TransportKind::Mail),
            "udp" => Some(TransportKind::Udp),
            "bt" | "bluetooth" => Some(TransportKind::Bluetooth),
            "wifidirect" | "wifi" => Some(TransportKind::WifiDirect),
            "nfc" => Some(TransportKind::Nfc),
            _ => None,
        }
    }

    /// Whether this kind carries a bidirectional stream.
    ///
    /// Stream transports are preferred over message transports when a peer
    /// offers both.
    pub fn is_stream(&self) -> bool {
        !matches!(self, TransportKind::Mail | TransportKind::Udp)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Http => "http",
            TransportKind::Mail => "mail",
            TransportKind::Udp => "udp",
            TransportKind::Bluetooth => "bluetooth",
            TransportKind::WifiDirect => "wifidirect",
            TransportKind::Nfc => "nfc",
        };
        f.write_str(name)
    }
}

/// An opaque peer address such as `tcp://bob:7070` or `mailto:bob@example.org`
///
/// The transport kind is derived from the scheme on demand, so addresses with
/// unknown schemes can still be carried around and are only rejected when a
/// transport has to be picked for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Wrap an address string
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme part (`tcp` in `tcp://bob:7070`, `mailto` in `mailto:bob`)
    pub fn scheme(&self) -> Option<&str> {
        let idx = self.0.find(':')?;
        let scheme = &self.0[..idx];
        if scheme.is_empty() {
            None
        } else {
            Some(scheme)
        }
    }

    /// Resolve the transport kind for this address
    pub fn kind(&self) -> Result<TransportKind, ShoalError> {
        self.scheme()
            .and_then(TransportKind::from_scheme)
            .ok_or_else(|| ShoalError::UnsupportedTransport(self.0.clone()))
    }

    /// Whether the address belongs to a stream transport.
    ///
    /// Unknown schemes count as non-stream.
    pub fn is_stream(&self) -> bool {
        self.kind().map(|k| k.is_stream()).unwrap_or(false)
    }

    /// Case-insensitive comparison, as used for delivery bookkeeping
    pub fn eq_ignore_case(&self, other: &PeerAddress) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for PeerAddress {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}
