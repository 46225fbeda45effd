//! In-memory storage backends.

use super::{KeyValueStore, Result, SecureStore, StateStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory key-value store.
#[derive(Default, Clone)]
pub struct InMemoryKeyValueStore {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryKeyValueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// In-memory reactive state store.
#[derive(Default, Clone)]
pub struct InMemoryStateStore {
    slices: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_slice(&self, slice: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.slices.read().await.get(slice).cloned())
    }

    async fn set_slice(&self, slice: &str, value: serde_json::Value) -> Result<()> {
        self.slices.write().await.insert(slice.to_string(), value);
        Ok(())
    }
}

/// In-memory secure store.
#[derive(Default, Clone)]
pub struct InMemorySecureStore {
    items: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemorySecureStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStore for InMemorySecureStore {
    async fn get_secure_item(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_secure_item(&self, key: &str, value: &[u8]) -> Result<()> {
        self.items.write().await.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
