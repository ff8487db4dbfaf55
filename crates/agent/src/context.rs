//! Session-scoped typed state shared by the router and by tools.
//!
//! Values are stored as JSON under a string key together with a schema version. Readers name
//! the key through a [`StateKey`], which fixes both the Rust type and the version, so a tool
//! that writes `user_state` v1 cannot be silently misread by code expecting v2.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use vigil_core::errors::ContextError;

pub struct StateKey<T> {
    name: &'static str,
    version: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateKey<T> {
    pub const fn new(name: &'static str, version: u32) -> Self {
        Self { name, version, _marker: PhantomData }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

#[derive(Clone, Debug)]
struct StoredValue {
    version: u32,
    value: Value,
}

/// Cloning shares the same underlying store.
#[derive(Clone, Debug, Default)]
pub struct TurnContext {
    entries: Arc<Mutex<HashMap<&'static str, StoredValue>>>,
}

impl TurnContext {
    pub async fn get<T>(&self, key: &StateKey<T>) -> Result<Option<T>, ContextError>
    where
        T: DeserializeOwned,
    {
        let entries = self.entries.lock().await;
        entries.get(key.name).map(|stored| decode(key, stored)).transpose()
    }

    pub async fn set<T>(&self, key: &StateKey<T>, value: &T) -> Result<(), ContextError>
    where
        T: Serialize,
    {
        let stored = encode(key, value)?;
        self.entries.lock().await.insert(key.name, stored);
        Ok(())
    }

    /// Read-modify-write under a single lock; starts from `T::default()` when the key is unset.
    pub async fn update<T, F>(&self, key: &StateKey<T>, apply: F) -> Result<T, ContextError>
    where
        T: Serialize + DeserializeOwned + Default + Clone,
        F: FnOnce(&mut T),
    {
        let mut entries = self.entries.lock().await;
        let mut current = match entries.get(key.name) {
            Some(stored) => decode(key, stored)?,
            None => T::default(),
        };
        apply(&mut current);
        let stored = encode(key, &current)?;
        entries.insert(key.name, stored);
        Ok(current)
    }

    pub async fn contains<T>(&self, key: &StateKey<T>) -> bool {
        self.entries.lock().await.contains_key(key.name)
    }

    pub async fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.entries.lock().await.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

fn decode<T>(key: &StateKey<T>, stored: &StoredValue) -> Result<T, ContextError>
where
    T: DeserializeOwned,
{
    if stored.version != key.version {
        return Err(ContextError::SchemaMismatch {
            key: key.name.to_string(),
            stored: stored.version,
            expected: key.version,
        });
    }
    serde_json::from_value(stored.value.clone()).map_err(|error| ContextError::Decode {
        key: key.name.to_string(),
        reason: error.to_string(),
    })
}

fn encode<T>(key: &StateKey<T>, value: &T) -> Result<StoredValue, ContextError>
where
    T: Serialize,
{
    let value = serde_json::to_value(value).map_err(|error| ContextError::Encode {
        key: key.name.to_string(),
        reason: error.to_string(),
    })?;
    Ok(StoredValue { version: key.version, value })
}
