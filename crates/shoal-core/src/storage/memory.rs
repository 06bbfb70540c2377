//! In-memory property store

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::PropertyStore;
use crate::error::ShoalError;

/// Property store that lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryPropertyStore {
    properties: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryPropertyStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored properties
    pub fn len(&self) -> usize {
        self.properties.read().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.properties.read().is_empty()
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn set_property(&self, name: &str, value: Option<&[u8]>) -> Result<(), ShoalError> {
        let mut properties = self.properties.write();
        match value {
            Some(value) => {
                properties.insert(name.to_string(), value.to_vec());
            }
            None => {
                properties.remove(name);
            }
        }
        Ok(())
    }

    fn get_property(&self, name: &str) -> Result<Option<Vec<u8>>, ShoalError> {
        Ok(self.properties.read().get(name).cloned())
    }

    fn property_names(&self, prefix: &str) -> Result<Vec<String>, ShoalError> {
        Ok(self
            .properties
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryPropertyStore::new();
        assert!(store.is_empty());

        store.set_property("a/1", Some(b"one")).unwrap();
        store.set_property("a/2", Some(b"two")).unwrap();
        store.set_property("b", Some(b"three")).unwrap();
        assert_eq!(store.len(), 3);

        assert_eq!(store.property_names("a/").unwrap(), vec!["a/1", "a/2"]);
        assert_eq!(store.get_property("b").unwrap().unwrap(), b"three");

        store.set_property("b", None).unwrap();
        assert!(store.get_property("b").unwrap().is_none());
        assert_eq!(store.len(), 2);
    }
}
