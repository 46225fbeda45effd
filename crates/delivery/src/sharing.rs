//! Recipient-aware sharing with an audit trail.

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::error::{DeliveryError, Result};
use crate::recipient::RecipientMetadata;
use crate::transport::{EmergencyProtocol, SharingTransport};
use clinexport_core::{EncryptionState, ExportId, RecipientType, SharingId, Time};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a successful share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharingResult {
    /// Always true; failures are returned as errors
    pub success: bool,
    /// Share id
    pub sharing_id: SharingId,
    /// Recipient type
    pub recipient: RecipientType,
    /// Transport method used
    pub sharing_method: String,
    /// When delivery completed
    pub timestamp: Time,
    /// Audit entries written for this share
    pub audit_trail: Vec<AuditEntry>,
}

/// Shares artifacts with recipients through a transport.
pub struct SecureSharingService {
    transport: Arc<dyn SharingTransport>,
    emergency: Arc<dyn EmergencyProtocol>,
    audit: AuditLog,
}

impl SecureSharingService {
    /// Create a service writing to a fresh audit log.
    pub fn new(transport: Arc<dyn SharingTransport>, emergency: Arc<dyn EmergencyProtocol>) -> Self {
        Self {
            transport,
            emergency,
            audit: AuditLog::new(),
        }
    }

    /// Use an existing audit log.
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    /// The audit log.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Share `artifact` with `recipient`.
    ///
    /// Emergency recipients skip preconditions and are attempted even with no
    /// artifact; when their delivery fails the emergency protocol runs once and
    /// [`DeliveryError::EmergencyDelivery`] is returned. Providers and research
    /// recipients require an encrypted artifact.
    pub async fn share(
        &self,
        artifact: Option<&Path>,
        encryption: &EncryptionState,
        recipient: &RecipientMetadata,
        export_id: Option<ExportId>,
    ) -> Result<SharingResult> {
        let sharing_id = SharingId::new();
        let recipient_type = recipient.recipient_type();
        let entry = |action: AuditAction, detail: String| {
            AuditEntry::new(action, detail)
                .for_sharing(sharing_id, recipient_type)
                .for_export(export_id)
        };

        self.audit
            .append(entry(
                AuditAction::ShareAttempted,
                format!("share to {} via {}", recipient.destination(), self.transport.method()),
            ))
            .await;

        if recipient_type == RecipientType::Emergency {
            return self.share_emergency(artifact, recipient, sharing_id, &entry).await;
        }

        if let Err(e) = self.check_preconditions(artifact, encryption, recipient) {
            warn!("Share {} refused: {}", sharing_id, e);
            self.audit.append(entry(AuditAction::ShareFailed, e.to_string())).await;
            return Err(e);
        }

        match self.transport.deliver(artifact, recipient).await {
            Ok(()) => {
                self.audit
                    .append(entry(AuditAction::ShareSucceeded, "delivered".to_string()))
                    .await;
                self.result(sharing_id, recipient_type).await
            }
            Err(e) => {
                warn!("Share {} failed: {}", sharing_id, e);
                self.audit.append(entry(AuditAction::ShareFailed, e.to_string())).await;
                Err(e)
            }
        }
    }

    fn check_preconditions(
        &self,
        artifact: Option<&Path>,
        encryption: &EncryptionState,
        recipient: &RecipientMetadata,
    ) -> Result<()> {
        recipient.validate()?;
        let recipient_type = recipient.recipient_type();
        if recipient_type.requires_encryption() && !encryption.is_encrypted() {
            return Err(DeliveryError::EncryptionRequired(recipient_type));
        }
        if artifact.is_none() {
            return Err(DeliveryError::MissingArtifact);
        }
        Ok(())
    }

    async fn share_emergency<F>(
        &self,
        artifact: Option<&Path>,
        recipient: &RecipientMetadata,
        sharing_id: SharingId,
        entry: &F,
    ) -> Result<SharingResult>
    where
        F: Fn(AuditAction, String) -> AuditEntry + Sync,
    {
        let failure = match self.transport.deliver(artifact, recipient).await {
            Ok(()) => {
                self.audit
                    .append(entry(AuditAction::ShareSucceeded, "emergency delivery".to_string()))
                    .await;
                return self.result(sharing_id, RecipientType::Emergency).await;
            }
            Err(e) => e.to_string(),
        };

        warn!("Emergency share {} failed: {}", sharing_id, failure);
        self.audit
            .append(entry(AuditAction::ShareFailed, failure.clone()))
            .await;

        let fallback_activated = match self
            .emergency
            .activate_emergency_protocols(recipient, &failure)
            .await
        {
            Ok(()) => {
                self.audit
                    .append(entry(
                        AuditAction::EmergencyProtocolActivated,
                        "direct contact protocol started".to_string(),
                    ))
                    .await;
                true
            }
            Err(e) => {
                self.audit
                    .append(entry(AuditAction::EmergencyProtocolFailed, e.to_string()))
                    .await;
                false
            }
        };

        Err(DeliveryError::EmergencyDelivery {
            message: failure,
            fallback_activated,
        })
    }

    async fn result(&self, sharing_id: SharingId, recipient: RecipientType) -> Result<SharingResult> {
        debug!("Share {} delivered to {}", sharing_id, recipient);
        Ok(SharingResult {
            success: true,
            sharing_id,
            recipient,
            sharing_method: self.transport.method().to_string(),
            timestamp: chrono::Utc::now(),
            audit_trail: self.audit.for_sharing(sharing_id).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipient::ProviderCredentials;
    use async_trait::async_trait;
    use clinexport_core::{EmergencyContact, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingTransport;

    #[async_trait]
    impl SharingTransport for FailingTransport {
        fn method(&self) -> &str {
            "failing"
        }

        async fn deliver(&self, _: Option<&Path>, _: &RecipientMetadata) -> Result<()> {
            Err(DeliveryError::Transport("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SharingTransport for RecordingTransport {
        fn method(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, _: Option<&Path>, _: &RecipientMetadata) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingProtocol {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmergencyProtocol for CountingProtocol {
        async fn activate_emergency_protocols(&self, _: &RecipientMetadata, _: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn emergency() -> RecipientMetadata {
        RecipientMetadata::Emergency {
            contact: EmergencyContact {
                name: "Sam".to_string(),
                phone: "555-0100".to_string(),
            },
        }
    }

    fn provider() -> RecipientMetadata {
        RecipientMetadata::HealthcareProvider {
            provider_id: "p1".to_string(),
            credentials: Some(ProviderCredentials {
                license_number: "MD-1".to_string(),
                verified: true,
            }),
        }
    }

    #[tokio::test]
    async fn test_failed_emergency_share_activates_protocol_once() {
        let protocol = Arc::new(CountingProtocol::default());
        let service = SecureSharingService::new(Arc::new(FailingTransport), protocol.clone());

        let err = service
            .share(None, &EncryptionState::NotRequested, &emergency(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeliveryError::EmergencyDelivery {
                fallback_activated: true,
                ..
            }
        ));
        assert_eq!(protocol.calls.load(Ordering::SeqCst), 1);

        let actions: Vec<_> = service.audit().entries().await.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::ShareAttempted,
                AuditAction::ShareFailed,
                AuditAction::EmergencyProtocolActivated
            ]
        );
    }

    #[tokio::test]
    async fn test_emergency_share_proceeds_without_artifact() {
        let transport = Arc::new(RecordingTransport::default());
        let service =
            SecureSharingService::new(transport.clone(), Arc::new(CountingProtocol::default()));

        let result = service
            .share(None, &EncryptionState::NotRequested, &emergency(), None)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.audit_trail.len(), 2);
    }

    #[tokio::test]
    async fn test_provider_requires_encrypted_artifact() {
        let transport = Arc::new(RecordingTransport::default());
        let service =
            SecureSharingService::new(transport.clone(), Arc::new(CountingProtocol::default()));
        let path = Path::new("/tmp/export.pdf");

        let err = service
            .share(
                Some(path),
                &EncryptionState::UnencryptedUnsafe {
                    reason: "key store offline".to_string(),
                },
                &provider(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::EncryptionRequired(RecipientType::HealthcareProvider)
        ));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

        let ok = service
            .share(
                Some(path),
                &EncryptionState::Encrypted {
                    key: "k".to_string(),
                },
                &provider(),
                Some(ExportId::new()),
            )
            .await
            .unwrap();
        assert_eq!(ok.sharing_method, "recording");
        assert_eq!(ok.recipient, RecipientType::HealthcareProvider);
    }

    #[tokio::test]
    async fn test_unverified_provider_is_audited_as_failed() {
        let service = SecureSharingService::new(
            Arc::new(RecordingTransport::default()),
            Arc::new(CountingProtocol::default()),
        );
        let recipient = RecipientMetadata::HealthcareProvider {
            provider_id: "p2".to_string(),
            credentials: None,
        };
        let err = service
            .share(
                Some(Path::new("/tmp/x.pdf")),
                &EncryptionState::Encrypted {
                    key: "k".to_string(),
                },
                &recipient,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Precondition(_)));
        assert_eq!(service.audit().len().await, 2);
    }

    #[tokio::test]
    async fn test_personal_share_without_artifact_fails() {
        let service = SecureSharingService::new(
            Arc::new(RecordingTransport::default()),
            Arc::new(CountingProtocol::default()),
        );
        let recipient = RecipientMetadata::Personal {
            user_id: UserId::new("u1"),
        };
        let err = service
            .share(None, &EncryptionState::NotRequested, &recipient, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::MissingArtifact));
    }
}
