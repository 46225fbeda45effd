//! JSON file storage implementation.
//!
//! Stores values as JSON files under a root directory, one subdirectory per
//! storage class (`kv/`, `state/`, `secure/`). Keys map to relative paths,
//! so `assessments/u1` lives at `kv/assessments/u1.json`.

use super::{KeyValueStore, Result, SecureStore, StateStore, StorageError};
use std::path::{Path, PathBuf};
use tokio::fs;

/// File-based JSON storage backend.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    root: PathBuf,
}

impl JsonStorage {
    /// Create storage. This creates the per-class subdirectories.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("kv")).await?;
        fs::create_dir_all(root.join("state")).await?;
        fs::create_dir_all(root.join("secure")).await?;

        Ok(Self { root })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_path(&self, class: &str, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(class).join(format!("{}.json", key)))
    }
}

#[async_trait::async_trait]
impl KeyValueStore for JsonStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        read_string(&self.item_path("kv", key)?).await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        // Reject values that are not JSON so the file backend stays readable.
        let _: serde_json::Value = serde_json::from_str(value)?;
        write_file(&self.item_path("kv", key)?, value.as_bytes()).await
    }
}

#[async_trait::async_trait]
impl StateStore for JsonStorage {
    async fn get_slice(&self, slice: &str) -> Result<Option<serde_json::Value>> {
        match read_string(&self.item_path("state", slice)?).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_slice(&self, slice: &str, value: serde_json::Value) -> Result<()> {
        let json = serde_json::to_string_pretty(&value)?;
        write_file(&self.item_path("state", slice)?, json.as_bytes()).await
    }
}

#[async_trait::async_trait]
impl SecureStore for JsonStorage {
    async fn get_secure_item(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.item_path("secure", key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_secure_item(&self, key: &str, value: &[u8]) -> Result<()> {
        write_file(&self.item_path("secure", key)?, value).await
    }
}

async fn read_string(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(json) => Ok(Some(json)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, bytes).await?;
    Ok(())
}
