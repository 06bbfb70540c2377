//! Error types for Shoal

use thiserror::Error;

use crate::types::TransportKind;

/// Main error type for Shoal operations
#[derive(Error, Debug)]
pub enum ShoalError {
    /// Address scheme is unknown, or no transport is registered for its kind.
    /// Recoverable during dispatch: the next candidate address is tried.
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// Opening a stream or writing to a transport failed.
    /// Recoverable during dispatch: the next candidate address is tried.
    #[error("Connection failure on {kind}: {reason}")]
    ConnectionFailure {
        /// Transport the failure happened on
        kind: TransportKind,
        /// What went wrong
        reason: String,
    },

    /// A MUST-level security requirement cannot be met. Aborts the whole send.
    #[error("Security policy violation: {0}")]
    SecurityPolicyViolation(String),

    /// Every candidate address failed; the payload may be deferred.
    #[error("Dispatch exhausted after {attempted} address(es)")]
    DispatchExhausted {
        /// Number of candidate addresses that were tried
        attempted: usize,
    },

    /// A single persisted port could not be reconstructed
    #[error("Cannot recover port entry {key}: {reason}")]
    RecoveryEntryFailure {
        /// Storage key of the entry
        key: String,
        /// What went wrong
        reason: String,
    },

    /// A persistence operation was requested but no property store is configured
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Signature verification failed
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Signed message whose sender key is unknown, refused by policy
    #[error("Message cannot be verified: {0}")]
    Unverifiable(String),

    /// The sender is refused by the peer access list
    #[error("Peer refused: {0}")]
    PeerRefused(String),

    /// Envelope protocol version not supported
    #[error("Envelope version {0} is not supported")]
    EnvelopeVersionUnsupported(u8),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<postcard::Error> for ShoalError {
    fn from(e: postcard::Error) -> Self {
        ShoalError::Serialization(e.to_string())
    }
}

impl ShoalError {
    /// Whether dispatch may move on to the next candidate address after this error.
    pub fn is_per_address(&self) -> bool {
        matches!(
            self,
            ShoalError::UnsupportedTransport(_) | ShoalError::ConnectionFailure { .. }
        )
    }
}

/// Result type alias using ShoalError
pub type ShoalResult<T> = Result<T, ShoalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShoalError::UnsupportedTransport("gopher://x".to_string());
        assert_eq!(format!("{}", err), "Unsupported transport: gopher://x");

        let err = ShoalError::DispatchExhausted { attempted: 2 };
        assert_eq!(format!("{}", err), "Dispatch exhausted after 2 address(es)");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ShoalError = io_err.into();
        assert!(matches!(err, ShoalError::Io(_)));
    }

    #[test]
    fn test_per_address_classification() {
        assert!(ShoalError::UnsupportedTransport("x".into()).is_per_address());
        assert!(ShoalError::ConnectionFailure {
            kind: TransportKind::Tcp,
            reason: "refused".into()
        }
        .is_per_address());
        assert!(!ShoalError::SecurityPolicyViolation("x".into()).is_per_address());
        assert!(!ShoalError::DispatchExhausted { attempted: 1 }.is_per_address());
    }
}
