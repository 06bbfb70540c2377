//! Key-value property storage.
//!
//! This module provides the property store behind:
//! - Deferred (unsent) messages
//! - Port mementos and the list of persisted ports
//! - Peer access lists
//!
//! [`Storage`] persists properties with redb; [`MemoryPropertyStore`] keeps
//! them in memory for tests and short-lived engines.

use crate::error::ShoalError;
use parking_lot::RwLock;
use redb::{Database, TableDefinition};
use std::path::Path;
use std::sync::Arc;

mod memory;

pub use memory::MemoryPropertyStore;

// Table definitions
const PROPERTIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("properties");

/// Named values that survive engine restarts
///
/// Setting a property to `None` removes it.
pub trait PropertyStore: Send + Sync {
    /// Set or remove a property
    fn set_property(&self, name: &str, value: Option<&[u8]>) -> Result<(), ShoalError>;

    /// Read a property
    fn get_property(&self, name: &str) -> Result<Option<Vec<u8>>, ShoalError>;

    /// Names of all properties starting with `prefix`, in ascending order
    fn property_names(&self, prefix: &str) -> Result<Vec<String>, ShoalError>;
}

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create the properties table
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ShoalError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PROPERTIES_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }
}

impl PropertyStore for Storage {
    fn set_property(&self, name: &str, value: Option<&[u8]>) -> Result<(), ShoalError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(PROPERTIES_TABLE)?;
            match value {
                Some(value) => {
                    table.insert(name, value)?;
                }
                None => {
                    table.remove(name)?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_property(&self, name: &str) -> Result<Option<Vec<u8>>, ShoalError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(PROPERTIES_TABLE)?;

        Ok(table.get(name)?.map(|v| v.value().to_vec()))
    }

    fn property_names(&self, prefix: &str) -> Result<Vec<String>, ShoalError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(PROPERTIES_TABLE)?;

        let mut names = Vec::new();
        for entry in table.range(prefix..)? {
            let (key, _) = entry?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            names.push(key.to_string());
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let storage = Storage::new(&db_path).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_storage_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        let storage = Storage::new(&db_path);
        assert!(storage.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_set_get_remove_property() {
        let (storage, _temp) = create_test_storage();

        assert!(storage.get_property("missing").unwrap().is_none());

        storage.set_property("name", Some(b"value")).unwrap();
        assert_eq!(storage.get_property("name").unwrap().unwrap(), b"value");

        storage.set_property("name", Some(b"other")).unwrap();
        assert_eq!(storage.get_property("name").unwrap().unwrap(), b"other");

        storage.set_property("name", None).unwrap();
        assert!(storage.get_property("name").unwrap().is_none());
    }

    #[test]
    fn test_removing_missing_property_is_ok() {
        let (storage, _temp) = create_test_storage();
        storage.set_property("never-set", None).unwrap();
    }

    #[test]
    fn test_property_names_by_prefix() {
        let (storage, _temp) = create_test_storage();
        storage.set_property("deferred/b/2", Some(b"x")).unwrap();
        storage.set_property("deferred/a/1", Some(b"x")).unwrap();
        storage.set_property("ports", Some(b"x")).unwrap();
        storage.set_property("deferred0", Some(b"x")).unwrap();

        let names = storage.property_names("deferred/").unwrap();
        assert_eq!(names, vec!["deferred/a/1", "deferred/b/2"]);
    }

    #[test]
    fn test_properties_persist_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");

        {
            let storage = Storage::new(&db_path).unwrap();
            storage.set_property("memento", Some(&[1, 2, 3])).unwrap();
        }

        {
            let storage = Storage::new(&db_path).unwrap();
            assert_eq!(storage.get_property("memento").unwrap().unwrap(), vec![1, 2, 3]);
        }
    }
}
