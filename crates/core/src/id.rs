//! Unique identifiers for export entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for an export operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExportId(Ulid);

impl ExportId {
    /// Generate a new ExportId
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Raw bytes of the id, used for deterministic derivations.
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_bytes()
    }
}

impl Default for ExportId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ExportId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Unique identifier for a sharing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharingId(Ulid);

impl SharingId {
    /// Generate a new SharingId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SharingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SharingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditEntryId(Ulid);

impl AuditEntryId {
    /// Generate a new AuditEntryId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AuditEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of the user whose data is exported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a new user ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
