//! Delivery transports and the emergency protocol seam.

use crate::error::{DeliveryError, Result};
use crate::recipient::RecipientMetadata;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tracing::{error, info};

/// Moves an artifact to a recipient.
#[async_trait]
pub trait SharingTransport: Send + Sync {
    /// Method name recorded in sharing results.
    fn method(&self) -> &str;

    /// Deliver `artifact` to `recipient`. Emergency deliveries may have no
    /// artifact when an earlier export stage failed; the transport still
    /// notifies the recipient.
    async fn deliver(&self, artifact: Option<&Path>, recipient: &RecipientMetadata) -> Result<()>;
}

/// Fallback run when an emergency delivery fails.
#[async_trait]
pub trait EmergencyProtocol: Send + Sync {
    /// Start direct-contact procedures for the recipient.
    async fn activate_emergency_protocols(
        &self,
        recipient: &RecipientMetadata,
        reason: &str,
    ) -> Result<()>;
}

/// Copies artifacts into a per-destination outbox directory.
#[derive(Debug, Clone)]
pub struct FileDropTransport {
    outbox: PathBuf,
}

impl FileDropTransport {
    /// Transport writing under `outbox`.
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }
}

#[async_trait]
impl SharingTransport for FileDropTransport {
    fn method(&self) -> &str {
        "file-drop"
    }

    async fn deliver(&self, artifact: Option<&Path>, recipient: &RecipientMetadata) -> Result<()> {
        let dir = self.outbox.join(recipient.destination());
        fs::create_dir_all(&dir).await?;

        match artifact {
            Some(path) => {
                let name = path
                    .file_name()
                    .ok_or_else(|| DeliveryError::Transport("artifact has no file name".to_string()))?;
                fs::copy(path, dir.join(name)).await?;
            }
            None => {
                fs::write(
                    dir.join("notice.txt"),
                    b"An export was requested for you but could not be completed.\n",
                )
                .await?;
            }
        }
        info!("Delivered to {}", recipient.destination());
        Ok(())
    }
}

/// Emergency protocol that raises an operator alert through the log.
#[derive(Debug, Default)]
pub struct LoggingEmergencyProtocol {
    activations: AtomicUsize,
}

impl LoggingEmergencyProtocol {
    /// Create a protocol.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times it ran.
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmergencyProtocol for LoggingEmergencyProtocol {
    async fn activate_emergency_protocols(
        &self,
        recipient: &RecipientMetadata,
        reason: &str,
    ) -> Result<()> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        error!(
            "EMERGENCY: delivery to {} failed ({}); direct-dial protocol activated",
            recipient.destination(),
            reason
        );
        Ok(())
    }
}
