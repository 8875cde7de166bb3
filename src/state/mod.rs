//! Persisted key/value state shared by the engine and its units.
//!
//! The store is synchronous and in-process: [`StateStore::set_value`] only
//! mutates memory, and durability happens at explicit
//! [`flush`](StateStore::flush) points.  Typed access goes through
//! [`StateStoreExt`], which converts to and from the stored JSON form.

mod file;

pub use file::JsonFileStore;

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StoreError;

/// Key/value persistence used for contributions and apply metadata.
///
/// Implementations use interior mutability: every method takes `&self` so a
/// single store can be shared through the run [`Context`](crate::units::Context).
#[cfg_attr(test, mockall::automock)]
pub trait StateStore: Send + Sync {
    /// Return the raw JSON value stored under `key`.
    fn get_value(&self, key: &str) -> Option<Value>;

    /// Replace the value stored under `key`.
    fn set_value(&self, key: &str, value: Value);

    /// Remove `key`, returning `true` if it was present.
    fn delete(&self, key: &str) -> bool;

    /// Return `true` if `key` is present.
    fn has(&self, key: &str) -> bool;

    /// Make all changes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.  A failed
    /// flush never corrupts previously flushed data.
    fn flush(&self) -> Result<(), StoreError>;
}

/// Typed accessors layered over [`StateStore`].
pub trait StateStoreExt: StateStore {
    /// Deserialize the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Value`] if the stored JSON does not match `T`.
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.get_value(key)
            .map(|value| {
                serde_json::from_value(value).map_err(|source| StoreError::Value {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Serialize `value` and store it under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Value`] if `value` cannot be represented as JSON.
    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_value(value).map_err(|source| StoreError::Value {
            key: key.to_string(),
            source,
        })?;
        self.set_value(key, json);
        Ok(())
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

/// Volatile store that never touches disk.
///
/// Used by tests and by dry runs where nothing should be persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return all keys currently stored, in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl StateStore for MemoryStore {
    fn get_value(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_value(&self, key: &str, value: Value) {
        self.data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) -> bool {
        self.data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    fn has(&self, key: &str) -> bool {
        self.data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(key)
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
