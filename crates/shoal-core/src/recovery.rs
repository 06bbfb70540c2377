//! Port persistence and recovery
//!
//! A port is a long-lived communication endpoint an application opens on
//! the engine (a chat channel, a subscription, ...). Ports that hand out a
//! memento are persisted and rebuilt when the engine restarts.
//!
//! ## Layout in the property store
//!
//! ```text
//! "shoal/ports"                          -> postcard(Vec<entry key>)
//! encode_key(["port", type])             -> memento of an unnamed port
//! encode_key(["port", type, name])       -> memento of a named port
//! ```
//!
//! where the entry key is `encode_key([type])` or `encode_key([type, name])`.
//!
//! ## Recovery
//!
//! Port types are not looked up by name at runtime. Every type that can be
//! recovered registers a [`PortFactory`] under its type tag at startup;
//! [`RecoveryStore::recover_all`] hands each stored memento to the factory
//! registered for its tag. An entry that cannot be rebuilt is logged and
//! skipped, the others still recover.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::encoding::{decode_key, decode_list, encode_key, encode_list};
use crate::engine::ShoalEngine;
use crate::error::ShoalError;
use crate::storage::PropertyStore;

/// Property holding the list of persisted port entries
pub const PORTS_PROPERTY: &str = "shoal/ports";

const PORT_NAMESPACE: &str = "port";

/// A recoverable endpoint
pub trait Port: Send + Sync {
    /// Type tag a [`PortFactory`] is registered under
    fn endpoint_type(&self) -> &str;

    /// Name distinguishing several ports of one type
    fn unique_name(&self) -> Option<&str> {
        None
    }

    /// State needed to rebuild this port. `None` if it is not to be persisted.
    fn memento(&self) -> Option<Vec<u8>>;
}

/// Stored state of one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMemento {
    pub endpoint_type: String,
    pub unique_name: Option<String>,
    pub state: Vec<u8>,
}

impl PortMemento {
    fn entry_key(&self) -> String {
        entry_key(&self.endpoint_type, self.unique_name.as_deref())
    }
}

/// Rebuilds a port of one type from its memento
pub type PortFactory =
    Arc<dyn Fn(&ShoalEngine, PortMemento) -> Result<Arc<dyn Port>, ShoalError> + Send + Sync>;

/// Persisted ports and the factories that rebuild them
pub struct RecoveryStore {
    store: Option<Arc<dyn PropertyStore>>,
    // Mirror of PORTS_PROPERTY; changed only together with the stored record
    keys: Mutex<BTreeSet<String>>,
    factories: RwLock<HashMap<String, PortFactory>>,
}

impl RecoveryStore {
    /// Store backed by `store`, loading the persisted entry list
    pub fn new(store: Option<Arc<dyn PropertyStore>>) -> Result<Self, ShoalError> {
        let keys = match &store {
            Some(store) => read_keys(store.as_ref())?,
            None => BTreeSet::new(),
        };
        Ok(Self {
            store,
            keys: Mutex::new(keys),
            factories: RwLock::new(HashMap::new()),
        })
    }

    fn store(&self) -> Result<&Arc<dyn PropertyStore>, ShoalError> {
        self.store.as_ref().ok_or_else(|| {
            ShoalError::StorageUnavailable("no property store for port mementos".to_string())
        })
    }

    /// Register the factory for ports of `endpoint_type`, replacing any previous one
    pub fn register_factory(&self, endpoint_type: impl Into<String>, factory: PortFactory) {
        self.factories.write().insert(endpoint_type.into(), factory);
    }

    /// Whether a factory is registered for `endpoint_type`
    pub fn has_factory(&self, endpoint_type: &str) -> bool {
        self.factories.read().contains_key(endpoint_type)
    }

    /// Persist `port`'s memento. A port without memento is left alone.
    pub fn persist(&self, port: &dyn Port) -> Result<(), ShoalError> {
        let Some(state) = port.memento() else {
            debug!(endpoint_type = port.endpoint_type(), "Port has no memento, not persisted");
            return Ok(());
        };
        let store = self.store()?;
        let key = entry_key(port.endpoint_type(), port.unique_name());

        let mut keys = self.keys.lock();
        store.set_property(&blob_property(port.endpoint_type(), port.unique_name()), Some(&state))?;
        if !keys.contains(&key) {
            let mut updated = keys.clone();
            updated.insert(key.clone());
            write_keys(store.as_ref(), &updated)?;
            *keys = updated;
        }

        debug!(entry = %key, "Port persisted");
        Ok(())
    }

    /// Forget `port`. Removing a port that was never persisted is a no-op.
    pub fn remove(&self, port: &dyn Port) -> Result<(), ShoalError> {
        let store = self.store()?;
        let key = entry_key(port.endpoint_type(), port.unique_name());

        let mut keys = self.keys.lock();
        store.set_property(&blob_property(port.endpoint_type(), port.unique_name()), None)?;
        if keys.contains(&key) {
            let mut updated = keys.clone();
            updated.remove(&key);
            write_keys(store.as_ref(), &updated)?;
            *keys = updated;
        }

        debug!(entry = %key, "Port removed");
        Ok(())
    }

    /// Entry keys currently persisted, in ascending order
    pub fn entries(&self) -> Vec<String> {
        self.keys.lock().iter().cloned().collect()
    }

    /// Rebuild every persisted port through its registered factory.
    ///
    /// Entries whose memento is gone are dropped from the entry list.
    /// Without a property store there is nothing to recover.
    pub fn recover_all(&self, engine: &ShoalEngine) -> Result<Vec<Arc<dyn Port>>, ShoalError> {
        let Some(store) = &self.store else {
            debug!("No property store, no ports to recover");
            return Ok(Vec::new());
        };

        let entries = {
            let mut keys = self.keys.lock();
            *keys = read_keys(store.as_ref())?;
            keys.iter().cloned().collect::<Vec<_>>()
        };

        let mut recovered = Vec::new();
        let mut dangling = Vec::new();
        for key in entries {
            let memento = match self.load(store.as_ref(), &key) {
                Ok(Some(memento)) => memento,
                Ok(None) => {
                    warn!(entry = %key, "Port memento missing, dropping entry");
                    dangling.push(key);
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Skipping port entry");
                    continue;
                }
            };

            // Factories may persist ports themselves; no lock is held here
            match self.rebuild(engine, memento) {
                Ok(port) => recovered.push(port),
                Err(e) => warn!(error = %e, "Skipping port entry"),
            }
        }

        if !dangling.is_empty() {
            let mut keys = self.keys.lock();
            let mut updated = keys.clone();
            for key in &dangling {
                updated.remove(key);
            }
            write_keys(store.as_ref(), &updated)?;
            *keys = updated;
        }

        info!(
            recovered = recovered.len(),
            dropped = dangling.len(),
            "Ports recovered"
        );
        Ok(recovered)
    }

    fn load(&self, store: &dyn PropertyStore, key: &str) -> Result<Option<PortMemento>, ShoalError> {
        let mut parts = decode_key(key)
            .map_err(|e| entry_failure(key, e.to_string()))?
            .into_iter();
        let (endpoint_type, unique_name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(endpoint_type), unique_name, None) => (endpoint_type, unique_name),
            _ => return Err(entry_failure(key, "entry key has no type tag or extra parts")),
        };

        let state = store.get_property(&blob_property(&endpoint_type, unique_name.as_deref()))?;
        Ok(state.map(|state| PortMemento {
            endpoint_type,
            unique_name,
            state,
        }))
    }

    fn rebuild(&self, engine: &ShoalEngine, memento: PortMemento) -> Result<Arc<dyn Port>, ShoalError> {
        let key = memento.entry_key();
        let factory = self
            .factories
            .read()
            .get(&memento.endpoint_type)
            .cloned()
            .ok_or_else(|| {
                entry_failure(
                    &key,
                    format!("no factory for port type {:?}", memento.endpoint_type),
                )
            })?;

        factory(engine, memento).map_err(|e| entry_failure(&key, e.to_string()))
    }
}

impl std::fmt::Debug for RecoveryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        f.debug_struct("RecoveryStore")
            .field("entries", &self.keys.lock().len())
            .field("factories", &types)
            .finish_non_exhaustive()
    }
}

fn entry_key(endpoint_type: &str, unique_name: Option<&str>) -> String {
    match unique_name {
        Some(name) => encode_key(&[endpoint_type, name]),
        None => encode_key(&[endpoint_type]),
    }
}

fn blob_property(endpoint_type: &str, unique_name: Option<&str>) -> String {
    match unique_name {
        Some(name) => encode_key(&[PORT_NAMESPACE, endpoint_type, name]),
        None => encode_key(&[PORT_NAMESPACE, endpoint_type]),
    }
}

fn read_keys(store: &dyn PropertyStore) -> Result<BTreeSet<String>, ShoalError> {
    Ok(match store.get_property(PORTS_PROPERTY)? {
        Some(record) => decode_list(&record)?.into_iter().collect(),
        None => BTreeSet::new(),
    })
}

fn write_keys(store: &dyn PropertyStore, keys: &BTreeSet<String>) -> Result<(), ShoalError> {
    let list: Vec<String> = keys.iter().cloned().collect();
    store.set_property(PORTS_PROPERTY, Some(&encode_list(&list)?))
}

fn entry_failure(key: &str, reason: impl Into<String>) -> ShoalError {
    ShoalError::RecoveryEntryFailure {
        key: key.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::MemoryPropertyStore;

    #[derive(Debug, Clone, PartialEq)]
    struct Channel {
        name: Option<String>,
        topic: String,
    }

    impl Port for Channel {
        fn endpoint_type(&self) -> &str {
            "chat.Channel"
        }

        fn unique_name(&self) -> Option<&str> {
            self.name.as_deref()
        }

        fn memento(&self) -> Option<Vec<u8>> {
            Some(self.topic.as_bytes().to_vec())
        }
    }

    struct Transient;

    impl Port for Transient {
        fn endpoint_type(&self) -> &str {
            "transient"
        }

        fn memento(&self) -> Option<Vec<u8>> {
            None
        }
    }

    fn channel(name: Option<&str>, topic: &str) -> Channel {
        Channel {
            name: name.map(str::to_string),
            topic: topic.to_string(),
        }
    }

    fn channel_factory(rebuilt: Arc<Mutex<Vec<PortMemento>>>) -> PortFactory {
        Arc::new(move |_engine: &ShoalEngine, memento: PortMemento| {
            rebuilt.lock().push(memento.clone());
            let topic = String::from_utf8(memento.state)
                .map_err(|e| ShoalError::Serialization(e.to_string()))?;
            Ok(Arc::new(Channel {
                name: memento.unique_name,
                topic,
            }) as Arc<dyn Port>)
        })
    }

    fn engine() -> ShoalEngine {
        ShoalEngine::in_memory(EngineConfig::default()).unwrap()
    }

    fn stored_keys(store: &MemoryPropertyStore) -> Vec<String> {
        decode_list(&store.get_property(PORTS_PROPERTY).unwrap().unwrap()).unwrap()
    }

    #[test]
    fn test_persist_writes_blob_and_aggregate() {
        let properties = Arc::new(MemoryPropertyStore::new());
        let ports = RecoveryStore::new(Some(properties.clone())).unwrap();

        ports.persist(&channel(Some("general"), "urn:fish")).unwrap();
        ports.persist(&channel(None, "urn:any")).unwrap();

        let expected = vec![
            encode_key(&["chat.Channel"]),
            encode_key(&["chat.Channel", "general"]),
        ];
        assert_eq!(ports.entries(), expected);
        assert_eq!(stored_keys(&properties), expected);
        assert_eq!(
            properties
                .get_property(&blob_property("chat.Channel", Some("general")))
                .unwrap()
                .unwrap(),
            b"urn:fish"
        );
    }

    #[test]
    fn test_persist_without_memento_is_noop() {
        let properties = Arc::new(MemoryPropertyStore::new());
        let ports = RecoveryStore::new(Some(properties.clone())).unwrap();
        ports.persist(&Transient).unwrap();
        assert!(properties.is_empty());

        // Even without a store
        RecoveryStore::new(None).unwrap().persist(&Transient).unwrap();
    }

    #[test]
    fn test_without_store() {
        let ports = RecoveryStore::new(None).unwrap();
        assert!(matches!(
            ports.persist(&channel(None, "x")),
            Err(ShoalError::StorageUnavailable(_))
        ));
        assert!(matches!(
            ports.remove(&channel(None, "x")),
            Err(ShoalError::StorageUnavailable(_))
        ));
        assert!(ports.recover_all(&engine()).unwrap().is_empty());
    }

    #[test]
    fn test_remove_keeps_aggregate_consistent() {
        let properties = Arc::new(MemoryPropertyStore::new());
        let ports = RecoveryStore::new(Some(properties.clone())).unwrap();
        let general = channel(Some("general"), "urn:fish");
        let random = channel(Some("random"), "urn:reef");

        ports.persist(&general).unwrap();
        ports.persist(&random).unwrap();
        ports.remove(&general).unwrap();
        ports.remove(&general).unwrap();

        assert_eq!(stored_keys(&properties), vec![encode_key(&["chat.Channel", "random"])]);
        assert!(properties
            .get_property(&blob_property("chat.Channel", Some("general")))
            .unwrap()
            .is_none());
    }

    /// Store whose entry-list record can be made read-only
    struct FrozenAggregate {
        inner: MemoryPropertyStore,
        frozen: std::sync::atomic::AtomicBool,
    }

    impl PropertyStore for FrozenAggregate {
        fn set_property(&self, name: &str, value: Option<&[u8]>) -> Result<(), ShoalError> {
            if name == PORTS_PROPERTY && self.frozen.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ShoalError::Storage("entry list is read-only".into()));
            }
            self.inner.set_property(name, value)
        }

        fn get_property(&self, name: &str) -> Result<Option<Vec<u8>>, ShoalError> {
            self.inner.get_property(name)
        }

        fn property_names(&self, prefix: &str) -> Result<Vec<String>, ShoalError> {
            self.inner.property_names(prefix)
        }
    }

    #[test]
    fn test_failed_aggregate_write_leaves_entries_unchanged() {
        let properties = Arc::new(FrozenAggregate {
            inner: MemoryPropertyStore::new(),
            frozen: std::sync::atomic::AtomicBool::new(false),
        });
        let ports = RecoveryStore::new(Some(properties.clone())).unwrap();
        let general = channel(Some("general"), "urn:fish");
        ports.persist(&general).unwrap();
        let before = vec![encode_key(&["chat.Channel", "general"])];

        properties.frozen.store(true, std::sync::atomic::Ordering::SeqCst);

        assert!(matches!(
            ports.persist(&channel(Some("random"), "urn:reef")),
            Err(ShoalError::Storage(_))
        ));
        assert_eq!(ports.entries(), before);
        assert_eq!(stored_keys(&properties.inner), before);

        assert!(matches!(ports.remove(&general), Err(ShoalError::Storage(_))));
        assert_eq!(ports.entries(), before);
        assert_eq!(stored_keys(&properties.inner), before);
    }

    #[test]
    fn test_recover_round_trip_across_instances() {
        let properties = Arc::new(MemoryPropertyStore::new());
        {
            let ports = RecoveryStore::new(Some(properties.clone())).unwrap();
            ports.persist(&channel(Some("general"), "urn:fish")).unwrap();
            ports.persist(&channel(Some("a:b"), "urn:colon")).unwrap();
        }

        let ports = RecoveryStore::new(Some(properties.clone())).unwrap();
        let rebuilt = Arc::new(Mutex::new(Vec::new()));
        ports.register_factory("chat.Channel", channel_factory(rebuilt.clone()));

        let recovered = ports.recover_all(&engine()).unwrap();
        assert_eq!(recovered.len(), 2);

        let mut names: Vec<Option<String>> = rebuilt.lock().iter().map(|m| m.unique_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec![Some("a:b".to_string()), Some("general".to_string())]);
        assert!(recovered.iter().any(|p| p.memento() == Some(b"urn:colon".to_vec())));
    }

    #[test]
    fn test_recover_skips_bad_entries() {
        let properties = Arc::new(MemoryPropertyStore::new());
        let ports = RecoveryStore::new(Some(properties.clone())).unwrap();
        ports.register_factory("chat.Channel", channel_factory(Arc::new(Mutex::new(Vec::new()))));
        ports.register_factory(
            "failing",
            Arc::new(
                |_engine: &ShoalEngine, _memento: PortMemento| -> Result<Arc<dyn Port>, ShoalError> {
                    Err(ShoalError::Config("bad state".into()))
                },
            ),
        );

        struct Typed(&'static str);
        impl Port for Typed {
            fn endpoint_type(&self) -> &str {
                self.0
            }
            fn memento(&self) -> Option<Vec<u8>> {
                Some(vec![1])
            }
        }

        ports.persist(&channel(None, "urn:fish")).unwrap();
        ports.persist(&Typed("failing")).unwrap();
        ports.persist(&Typed("unregistered")).unwrap();
        ports.persist(&channel(Some("gone"), "urn:gone")).unwrap();
        properties
            .set_property(&blob_property("chat.Channel", Some("gone")), None)
            .unwrap();

        let recovered = ports.recover_all(&engine()).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].memento(), Some(b"urn:fish".to_vec()));

        // The dangling entry is pruned, entries that failed to rebuild stay
        let keys = stored_keys(&properties);
        assert!(!keys.contains(&encode_key(&["chat.Channel", "gone"])));
        assert!(keys.contains(&encode_key(&["failing"])));
        assert!(keys.contains(&encode_key(&["unregistered"])));
    }

    #[test]
    fn test_names_with_delimiters_do_not_collide() {
        assert_ne!(entry_key("a", Some("b")), entry_key("a:b", None));
        assert_ne!(blob_property("1:a", None), blob_property("1", Some("a")));
        assert_ne!(blob_property("port", None), PORTS_PROPERTY);
    }
}
