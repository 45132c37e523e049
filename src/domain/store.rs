use crate::domain::record::ModelRecord;
use crate::errors::StoreError;
use dashmap::DashMap;
use sled::Db;
use std::path::Path;

/// Trait for fitted-model storage backends.
/// Implementations must be thread-safe (Send + Sync).
pub trait ModelStore: Send + Sync {
    fn put(&self, name: &str, record: &ModelRecord) -> Result<(), StoreError>;
    fn get(&self, name: &str) -> Result<Option<ModelRecord>, StoreError>;
    /// Returns whether a record was removed.
    fn remove(&self, name: &str) -> Result<bool, StoreError>;
    /// Stored names, sorted.
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

// ============================================================================
// MemoryModelStore - in-process storage using DashMap
// ============================================================================

#[derive(Default)]
pub struct MemoryModelStore {
    records: DashMap<String, ModelRecord>,
}

impl ModelStore for MemoryModelStore {
    fn put(&self, name: &str, record: &ModelRecord) -> Result<(), StoreError> {
        self.records.insert(name.to_string(), record.clone());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<ModelRecord>, StoreError> {
        Ok(self.records.get(name).map(|r| r.clone()))
    }

    fn remove(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(name).is_some())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}

// ============================================================================
// DiskModelStore - persistent storage using sled, bincode-encoded records
// ============================================================================

pub struct DiskModelStore {
    db: Db,
    models: sled::Tree,
}

impl DiskModelStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let models = db.open_tree("models")?;
        Ok(Self { db, models })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl ModelStore for DiskModelStore {
    fn put(&self, name: &str, record: &ModelRecord) -> Result<(), StoreError> {
        let bytes = record.to_bytes()?;
        self.models.insert(name.as_bytes(), bytes)?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<ModelRecord>, StoreError> {
        match self.models.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(ModelRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.models.remove(name.as_bytes())?.is_some())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        // sled iterates keys in byte order, which is sorted for UTF-8.
        self.models
            .iter()
            .keys()
            .map(|key| -> Result<String, StoreError> {
                Ok(String::from_utf8_lossy(&key?).into_owned())
            })
            .collect()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
