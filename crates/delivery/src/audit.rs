//! Append-only sharing audit log.

use clinexport_core::{AuditEntryId, ExportId, RecipientType, SharingId, Time};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    /// A share was requested
    ShareAttempted,
    /// The artifact was delivered
    ShareSucceeded,
    /// The share failed
    ShareFailed,
    /// The recipient is not one the export was produced and consented for
    ShareRefused,
    /// The emergency protocol was started
    EmergencyProtocolActivated,
    /// The emergency protocol itself failed
    EmergencyProtocolFailed,
    /// A download was served
    DownloadGranted,
    /// A download was refused
    DownloadDenied,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry id
    pub id: AuditEntryId,
    /// When it happened
    pub timestamp: Time,
    /// Share the entry belongs to, if any
    pub sharing_id: Option<SharingId>,
    /// Export concerned
    pub export_id: Option<ExportId>,
    /// Recipient type concerned
    pub recipient: Option<RecipientType>,
    /// Action
    pub action: AuditAction,
    /// Detail without clinical content
    pub detail: String,
}

impl AuditEntry {
    /// New entry stamped now.
    pub fn new(action: AuditAction, detail: impl Into<String>) -> Self {
        Self {
            id: AuditEntryId::new(),
            timestamp: chrono::Utc::now(),
            sharing_id: None,
            export_id: None,
            recipient: None,
            action,
            detail: detail.into(),
        }
    }

    /// Attach the share.
    pub fn for_sharing(mut self, sharing_id: SharingId, recipient: RecipientType) -> Self {
        self.sharing_id = Some(sharing_id);
        self.recipient = Some(recipient);
        self
    }

    /// Attach the export.
    pub fn for_export(mut self, export_id: Option<ExportId>) -> Self {
        self.export_id = export_id;
        self
    }
}

/// Shared append-only log. Entries can be added and read, never changed.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl AuditLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub async fn append(&self, entry: AuditEntry) {
        self.entries.write().await.push(entry);
    }

    /// Snapshot of every entry in order.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    /// Entries of one share.
    pub async fn for_sharing(&self, sharing_id: SharingId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.sharing_id == Some(sharing_id))
            .cloned()
            .collect()
    }

    /// Entries of one export.
    pub async fn for_export(&self, export_id: ExportId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.export_id == Some(export_id))
            .cloned()
            .collect()
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
