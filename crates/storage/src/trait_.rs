//! Storage class abstractions.

use async_trait::async_trait;
use clinexport_core::AccessLevel;
use std::fmt;

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Access gate refused the read
    #[error("access denied: {presented:?} access cannot read {resource}")]
    AccessDenied {
        /// What was being read
        resource: String,
        /// Level presented by the caller
        presented: AccessLevel,
    },

    /// Backend temporarily unavailable; safe to retry
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Key is malformed or escapes the store
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Whether retrying the read may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Transient(_) => true,
            StorageError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// The storage class a snapshot was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageClass {
    /// Plain async key-value store
    KeyValue,
    /// Reactive in-memory state store
    State,
    /// Encrypted secure store
    Secure,
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageClass::KeyValue => write!(f, "key-value"),
            StorageClass::State => write!(f, "state"),
            StorageClass::Secure => write!(f, "secure"),
        }
    }
}

/// Plain async key-value store holding JSON strings.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write a value.
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// Reactive state store. Reads return a snapshot of a state slice.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Snapshot of a state slice.
    async fn get_slice(&self, slice: &str) -> Result<Option<serde_json::Value>>;

    /// Replace a state slice.
    async fn set_slice(&self, slice: &str, value: serde_json::Value) -> Result<()>;
}

/// Encrypted secure store. Values are opaque bytes to callers that do not
/// hold the platform key; the store decrypts on read.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Read a decrypted value.
    async fn get_secure_item(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value.
    async fn set_secure_item(&self, key: &str, value: &[u8]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::Transient("busy".into()).is_transient());
        assert!(!StorageError::Other("bad".into()).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(StorageError::Io(io).is_transient());
    }
}
