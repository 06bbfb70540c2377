//! Engine configuration
//!
//! All values have defaults, so a config file only needs to name what it
//! changes:
//!
//! ```json
//! { "connection_timeout_ms": 5000, "dedup": { "capacity": 1024 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ShoalError;
use crate::types::DEFAULT_TTL;

/// Default idle timeout for inbound sessions
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 3000;

/// Default number of delivery records kept before the oldest are evicted
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Delivery dedup cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Keep a context point whose fragments were all filtered out
    pub allow_empty_containers: bool,
    /// Maximum number of fingerprints tracked
    pub capacity: usize,
    /// Forget a delivery record after this many milliseconds
    pub ttl_ms: Option<u64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            allow_empty_containers: true,
            capacity: DEFAULT_DEDUP_CAPACITY,
            ttl_ms: None,
        }
    }
}

impl DedupConfig {
    /// TTL as a duration
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Configuration for a [`ShoalEngine`](crate::ShoalEngine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of this engine instance, used for log files
    pub instance: String,
    /// Idle timeout for inbound sessions in milliseconds
    pub connection_timeout_ms: u64,
    /// Upper bound for opening an outgoing stream, in milliseconds.
    /// `None` leaves the bound to the transport.
    pub connect_timeout_ms: Option<u64>,
    /// Hop count given to outgoing messages
    pub default_ttl: u32,
    /// Delivery dedup cache
    pub dedup: DedupConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance: "shoal".to_string(),
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            connect_timeout_ms: None,
            default_ttl: DEFAULT_TTL,
            dedup: DedupConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config
    pub fn from_json(json: &str) -> Result<Self, ShoalError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ShoalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ShoalError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), ShoalError> {
        if self.dedup.capacity == 0 {
            return Err(ShoalError::Config(
                "dedup.capacity must be at least 1".to_string(),
            ));
        }
        if self.instance.is_empty() {
            return Err(ShoalError::Config("instance must not be empty".to_string()));
        }
        Ok(())
    }

    /// Idle timeout for inbound sessions
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Bound for opening outgoing streams, if any
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.connection_timeout(), Duration::from_millis(3000));
        assert_eq!(config.connect_timeout(), None);
        assert_eq!(config.default_ttl, 10);
        assert!(config.dedup.allow_empty_containers);
        assert_eq!(config.dedup.ttl(), None);
    }

    #[test]
    fn test_partial_json() {
        let config =
            EngineConfig::from_json(r#"{ "connection_timeout_ms": 500, "dedup": { "capacity": 4 } }"#)
                .unwrap();
        assert_eq!(config.connection_timeout_ms, 500);
        assert_eq!(config.dedup.capacity, 4);
        assert!(config.dedup.allow_empty_containers);
        assert_eq!(config.default_ttl, DEFAULT_TTL);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = EngineConfig::from_json(r#"{ "dedup": { "capacity": 0 } }"#).unwrap_err();
        assert!(matches!(err, ShoalError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("shoal.json");
        std::fs::write(&path, r#"{ "instance": "reef", "connect_timeout_ms": 250 }"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.instance, "reef");
        assert_eq!(config.connect_timeout(), Some(Duration::from_millis(250)));
    }
}
