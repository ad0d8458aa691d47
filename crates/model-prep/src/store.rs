//! Small typed key-value store used for persisted state and app config.
//!
//! Values are kept as JSON in a single object; `JsonFileStore` writes the
//! whole object to disk on every change.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::state::BackgroundState;

/// Type-safe key that associates a key name with its value type
#[derive(Debug, Clone, Copy)]
pub struct ConfigKey<T> {
    name: &'static str,
    _phantom: PhantomData<T>,
}

impl<T> ConfigKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    pub fn key_name(&self) -> &'static str {
        self.name
    }
}

/// Full background preparation aggregate, overwritten on every persist.
pub const BACKGROUND_STATE: ConfigKey<BackgroundState> = ConfigKey::new("backgroundModelState");

/// Set once, the first time every background model ends up ready.
pub const FIRST_BACKGROUND_COMPLETED: ConfigKey<bool> =
    ConfigKey::new("firstBackgroundBatchCompleted");

/// Untyped storage backend. Use the typed helpers from [`ConfigStoreExt`].
pub trait ConfigStore: Send + Sync {
    fn get_value(&self, key: &str) -> Option<Value>;
    fn set_value(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn delete_value(&self, key: &str) -> Result<(), StoreError>;
}

pub trait ConfigStoreExt {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T>;
    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: &T) -> Result<(), StoreError>;
    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), StoreError>;
}

impl<S: ConfigStore + ?Sized> ConfigStoreExt for S {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T> {
        let value = self.get_value(key.key_name())?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Ignoring unreadable value for '{}': {}", key.key_name(), e);
                None
            }
        }
    }

    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: &T) -> Result<(), StoreError> {
        let val = serde_json::to_value(value)?;
        self.set_value(key.key_name(), val)
    }

    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), StoreError> {
        self.delete_value(key.key_name())
    }
}

/// Store backed by a single JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open the store, reading existing content if the file is present.
    ///
    /// A file that is not a JSON object is ignored (and replaced on next save).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = std::fs::read(&path)?;
            match serde_json::from_slice::<Map<String, Value>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Store file {:?} is unreadable, starting empty: {}", path, e);
                    Map::new()
                }
            }
        } else {
            Map::new()
        };

        debug!("Opened store {:?} ({} keys)", path, data.len());

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, data: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write then rename so a crash never leaves a truncated file
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(data)?)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn get_value(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.insert(key.to_string(), value);
        self.save(&data)
    }

    fn delete_value(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        if data.remove(key).is_some() {
            self.save(&data)?;
        }
        Ok(())
    }
}

/// In-memory store, for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn get_value(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete_value(&self, key: &str) -> Result<(), StoreError> {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::ModelDownloadStatus;
    use tempfile::tempdir;

    const NUMBER: ConfigKey<u32> = ConfigKey::new("number");

    fn test_lifecycle(store: &dyn ConfigStore) {
        assert_eq!(store.get(&NUMBER), None);

        store.set(&NUMBER, &7).unwrap();
        assert_eq!(store.get(&NUMBER), Some(7));

        store.set(&NUMBER, &8).unwrap();
        assert_eq!(store.get(&NUMBER), Some(8));

        store.delete(&NUMBER).unwrap();
        assert_eq!(store.get(&NUMBER), None);
    }

    #[test]
    fn memory_store_lifecycle() {
        test_lifecycle(&MemoryStore::new());
    }

    #[test]
    fn file_store_lifecycle() {
        let dir = tempdir().unwrap();
        test_lifecycle(&JsonFileStore::open(dir.path().join("state.json")).unwrap());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut state = BackgroundState::default();
        state
            .models
            .insert("m".into(), ModelDownloadStatus::pending("m"));

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.set(&BACKGROUND_STATE, &state).unwrap();
            store.set(&FIRST_BACKGROUND_COMPLETED, &true).unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get(&BACKGROUND_STATE), Some(state));
        assert_eq!(store.get(&FIRST_BACKGROUND_COMPLETED), Some(true));
    }

    #[test]
    fn wrong_type_reads_as_none() {
        let store = MemoryStore::new();
        store.set_value("number", Value::String("x".into())).unwrap();
        assert_eq!(store.get(&NUMBER), None);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"not json").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get(&NUMBER), None);
        store.set(&NUMBER, &1).unwrap();
        assert_eq!(JsonFileStore::open(&path).unwrap().get(&NUMBER), Some(1));
    }
}
