//! The export pipeline state machine.

use crate::artifact::TempArtifact;
use crate::config::ExportConfig;
use crate::retrieval::{retrieve_category, RetrievalOutcome};
use crate::sweep::{sweep_expired_artifacts, SweepReport};
use clinexport_clinical::{ClinicalDataTransformer, ClinicalValidator, ValidationLimits};
use clinexport_core::{
    DataCategory, EncryptionState, ExportArtifact, ExportError, ExportFormat, ExportId,
    ExportOperationResult, ExportOperationState, ExportPurpose, ExportRequest, ExportStage,
    RecipientType, Time,
};
use clinexport_delivery::{
    ArtifactEncryptor, AuditAction, AuditEntry, EncryptionKey, RecipientMetadata,
    SecureSharingService, SharingResult, TokenIssuer,
};
use clinexport_privacy::{AnonymizationContext, ConsentValidator, PrivacyFilter};
use clinexport_progress::{OperationRegistry, ProgressCallback, StateFilter};
use clinexport_render::{verify_artifact, CsvExporter, FormatRenderer, PdfReportRenderer};
use clinexport_storage::ClinicalDataSource;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type StageResult<T> = std::result::Result<T, (ExportStage, ExportError)>;

/// A completed artifact kept for download and sharing.
#[derive(Debug, Clone)]
struct StoredArtifact {
    artifact: ExportArtifact,
    expires_at: Time,
    log_access: bool,
    purpose: ExportPurpose,
    approved_recipients: BTreeSet<RecipientType>,
}

/// Artifact content returned by [`ExportOrchestrator::download_export`].
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedArtifact {
    /// File content, encrypted when `encryption` says so
    pub bytes: Vec<u8>,
    /// Encryption state of the content
    pub encryption: EncryptionState,
    /// Checksum of the rendered content
    pub checksum: String,
}

/// Runs export requests through the pipeline and serves their results.
///
/// ```text
/// validate → register → retrieve → filter → transform → render → integrity → secure
/// ```
pub struct ExportOrchestrator {
    source: Arc<dyn ClinicalDataSource>,
    registry: Arc<dyn OperationRegistry>,
    sharing: Arc<SecureSharingService>,
    pdf: Arc<dyn FormatRenderer>,
    csv: Arc<dyn FormatRenderer>,
    consent: ConsentValidator,
    filter: PrivacyFilter,
    transformer: ClinicalDataTransformer,
    encryptor: ArtifactEncryptor,
    tokens: TokenIssuer,
    config: ExportConfig,
    running: Mutex<HashMap<ExportId, Arc<AtomicBool>>>,
    artifacts: RwLock<HashMap<ExportId, StoredArtifact>>,
}

impl ExportOrchestrator {
    /// Create an orchestrator with the built-in renderers and default
    /// configuration.
    pub fn new(
        source: Arc<dyn ClinicalDataSource>,
        registry: Arc<dyn OperationRegistry>,
        sharing: Arc<SecureSharingService>,
    ) -> Self {
        let config = ExportConfig::default();
        Self {
            source,
            registry,
            sharing,
            pdf: Arc::new(PdfReportRenderer::default()),
            csv: Arc::new(CsvExporter::new()),
            consent: ConsentValidator::new(),
            filter: PrivacyFilter::new(),
            transformer: transformer_for(&config),
            encryptor: ArtifactEncryptor::new(),
            tokens: TokenIssuer::new(),
            config,
            running: Mutex::new(HashMap::new()),
            artifacts: RwLock::new(HashMap::new()),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ExportConfig) -> Self {
        self.transformer = transformer_for(&config);
        self.config = config;
        self
    }

    /// Replace the renderer for the format it produces.
    pub fn with_renderer(mut self, renderer: Arc<dyn FormatRenderer>) -> Self {
        match renderer.format() {
            ExportFormat::Pdf => self.pdf = renderer,
            ExportFormat::Csv => self.csv = renderer,
        }
        self
    }

    /// Use a specific token issuer.
    pub fn with_token_issuer(mut self, tokens: TokenIssuer) -> Self {
        self.tokens = tokens;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Run one export. Never panics or raises: every failure is reported in
    /// the returned result and, once registered, in the operation state.
    pub async fn generate_export(&self, request: ExportRequest) -> ExportOperationResult {
        let export_id = request.export_id.unwrap_or_default();

        if let Err(error) = self.validate(&request) {
            warn!("Export {} rejected during validation: {}", export_id, error.code());
            return ExportOperationResult::failure(export_id, ExportStage::Validate, error);
        }

        let state =
            ExportOperationState::new(export_id, request.format, request.user_id.clone());
        if let Err(e) = self.registry.register(state).await {
            warn!("Export {} rejected: {}", export_id, e);
            return ExportOperationResult::failure(export_id, ExportStage::Register, e.into());
        }

        let cancel = Arc::new(AtomicBool::new(false));
        self.running.lock().await.insert(export_id, cancel.clone());
        info!("Export {} started ({})", export_id, request.format);

        let (stage_tx, stage_rx) = watch::channel(ExportStage::Validate);
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            self.config.export_timeout(),
            self.run_pipeline(export_id, &request, &cancel, &stage_tx),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                let stage = *stage_rx.borrow();
                warn!("Export {} timed out during {}", export_id, stage);
                Err((
                    stage,
                    ExportError::Timeout {
                        elapsed_secs: started.elapsed().as_secs(),
                    },
                ))
            }
        };

        self.running.lock().await.remove(&export_id);

        match outcome {
            Ok(result) => {
                if let Err(e) = self.registry.complete(export_id, result.clone()).await {
                    warn!("Export {} state not updated: {}", export_id, e);
                }
                result
            }
            Err((stage, error)) => {
                warn!("Export {} failed at {}: {}", export_id, stage, error.code());
                let result = ExportOperationResult::failure(export_id, stage, error.clone());
                if let Err(e) = self.registry.fail(export_id, error, result.clone()).await {
                    warn!("Export {} state not updated: {}", export_id, e);
                }
                result
            }
        }
    }

    fn validate(&self, request: &ExportRequest) -> Result<(), ExportError> {
        request.validate()?;
        self.consent
            .validate(
                &request.consent,
                &request.user_id,
                &request.privacy,
                request.purpose,
                chrono::Utc::now(),
            )
            .map_err(|e| e.into_export_error(&request.data_categories))
    }

    async fn run_pipeline(
        &self,
        id: ExportId,
        request: &ExportRequest,
        cancel: &AtomicBool,
        stage: &watch::Sender<ExportStage>,
    ) -> StageResult<ExportOperationResult> {
        self.progress(id, 5, "Request validated").await;

        let enter = |next: ExportStage| -> StageResult<()> {
            stage.send_replace(next);
            if cancel.load(Ordering::SeqCst) {
                info!("Export {} cancelled before {}", id, next);
                return Err((next, ExportError::Cancelled));
            }
            Ok(())
        };

        enter(ExportStage::Retrieve)?;
        let plan = self.filter.plan(&request.data_categories, &request.consent);
        self.progress(id, 10, "Retrieving clinical data").await;
        let retrieved = self
            .retrieve(id, request, &plan.allowed)
            .await
            .map_err(|e| (ExportStage::Retrieve, e))?;

        enter(ExportStage::Filter)?;
        let mut ctx = AnonymizationContext::for_export(id, &request.user_id);
        let mut filtered = self.filter.filter(
            retrieved.datasets,
            &request.data_categories,
            &request.consent,
            &request.privacy,
            &request.user_id,
            &mut ctx,
        );
        filtered.omissions.extend(retrieved.omissions);
        filtered.omissions.sort_by_key(|o| o.category);
        self.progress(id, 60, "Privacy filter applied").await;

        enter(ExportStage::Transform)?;
        let output = self.transformer.transform(id, request.time_range, filtered);
        let clinically_validated = output.validation.clinically_valid;
        if !clinically_validated {
            if request.purpose == ExportPurpose::PersonalRecord && request.allow_unvalidated {
                warn!("Export {} continues without clinical validation", id);
            } else {
                return Err((ExportStage::Transform, output.validation.to_error()));
            }
        }
        self.progress(id, 70, "Clinical data transformed").await;

        enter(ExportStage::Render)?;
        let format = request.format;
        tokio::fs::create_dir_all(&self.config.temp_dir)
            .await
            .map_err(|e| (ExportStage::Render, generation_error(format, e.to_string())))?;
        let mut artifact = TempArtifact::new(
            self.config
                .temp_dir
                .join(format!("{}.{}", id, format.extension())),
        );
        let generation = self
            .renderer(format)
            .render(&output.data, &request.render, artifact.path())
            .await
            .map_err(|e| (ExportStage::Render, generation_error(format, e.to_string())))?;
        if !generation.validation.is_valid() {
            return Err((
                ExportStage::Render,
                ExportError::Generation {
                    format,
                    message: "generated artifact failed validation".to_string(),
                    details: generation.validation.errors.clone(),
                },
            ));
        }
        self.progress(id, 85, "Artifact rendered").await;

        enter(ExportStage::Integrity)?;
        let integrity = verify_artifact(artifact.path(), generation.file_size)
            .await
            .map_err(|e| (ExportStage::Integrity, generation_error(format, e.to_string())))?;
        self.progress(id, 95, "Integrity verified").await;

        enter(ExportStage::Secure)?;
        let recipient = request.purpose.recipient();
        let mut encryption_error = None;
        let encryption =
            if request.privacy.encryption.required || recipient.requires_encryption() {
                let key = EncryptionKey::generate();
                match self.encryptor.encrypt_file(artifact.path(), &key).await {
                    Ok(encrypted) => {
                        artifact.replace(encrypted);
                        EncryptionState::Encrypted {
                            key: key.to_base64(),
                        }
                    }
                    Err(e) => {
                        warn!("Export {} left unencrypted: {}", id, e);
                        let reason = e.to_string();
                        encryption_error = Some(e.into_export_error(recipient));
                        EncryptionState::UnencryptedUnsafe { reason }
                    }
                }
            } else {
                EncryptionState::NotRequested
            };

        let size = tokio::fs::metadata(artifact.path())
            .await
            .map(|m| m.len())
            .map_err(|e| (ExportStage::Secure, generation_error(format, e.to_string())))?;
        let access_token = request
            .privacy
            .access_controls
            .require_download_token
            .then(|| self.tokens.issue(id));

        let exported = ExportArtifact {
            path: artifact.keep(),
            size,
            checksum: integrity.checksum,
            encryption,
            access_token,
        };
        let ttl_secs = request
            .privacy
            .retention_policy
            .artifact_ttl_hours
            .saturating_mul(3600);
        let expires_at = chrono::Duration::from_std(Duration::from_secs(ttl_secs))
            .ok()
            .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
        self.artifacts.write().await.insert(
            id,
            StoredArtifact {
                artifact: exported.clone(),
                expires_at,
                log_access: request.privacy.audit_requirements.log_access,
                purpose: request.purpose,
                approved_recipients: request.consent.approved_recipients.clone(),
            },
        );

        Ok(ExportOperationResult {
            export_id: id,
            success: true,
            artifact: Some(exported),
            generation: Some(generation),
            omissions: output.data.omissions,
            clinically_validated,
            error: encryption_error,
            failed_stage: None,
        })
    }

    /// Read the allowed categories in parallel, advancing progress from 10
    /// to 50 as each one completes.
    async fn retrieve(
        &self,
        id: ExportId,
        request: &ExportRequest,
        allowed: &[DataCategory],
    ) -> Result<RetrievalOutcome, ExportError> {
        let access_level = request.privacy.access_controls.access_level;
        let mut pending: FuturesUnordered<_> = allowed
            .iter()
            .map(|&category| async move {
                let result = retrieve_category(
                    self.source.as_ref(),
                    &request.user_id,
                    category,
                    &request.time_range,
                    access_level,
                    &self.config,
                )
                .await;
                (category, result)
            })
            .collect();

        let total = allowed.len();
        let mut done = 0usize;
        let mut outcome = RetrievalOutcome::default();
        while let Some((category, result)) = pending.next().await {
            outcome.record(category, result)?;
            done += 1;
            let progress = 10 + (40 * done / total) as u8;
            self.progress(id, progress, &format!("Retrieved {} ({}/{})", category, done, total))
                .await;
        }
        debug!("Export {} read {} categories", id, outcome.datasets.len());
        Ok(outcome)
    }

    fn renderer(&self, format: ExportFormat) -> &dyn FormatRenderer {
        match format {
            ExportFormat::Pdf => self.pdf.as_ref(),
            ExportFormat::Csv => self.csv.as_ref(),
        }
    }

    async fn progress(&self, id: ExportId, progress: u8, message: &str) {
        if let Err(e) = self.registry.update_progress(id, progress, message).await {
            debug!("Progress update for {} dropped: {}", id, e);
        }
    }

    /// Current state of an export.
    pub async fn get_export_status(&self, id: ExportId) -> Option<ExportOperationState> {
        self.registry.get(id).await
    }

    /// Hand over the terminal state of an export and forget it.
    pub async fn take_export_result(&self, id: ExportId) -> Option<ExportOperationState> {
        self.registry.take_terminal(id).await
    }

    /// States matching a filter.
    pub async fn list_exports(&self, filter: StateFilter) -> Vec<ExportOperationState> {
        self.registry.list(filter).await
    }

    /// Subscribe to progress of an export. Register before calling
    /// [`generate_export`](Self::generate_export) to see every update.
    pub async fn subscribe(&self, id: ExportId, callback: ProgressCallback) {
        self.registry.subscribe(id, callback).await;
    }

    /// Request cancellation. The pipeline stops at the next stage boundary
    /// and removes any partial artifact.
    pub async fn cancel_export(&self, id: ExportId) -> Result<(), ExportError> {
        if let Some(flag) = self.running.lock().await.get(&id) {
            flag.store(true, Ordering::SeqCst);
            info!("Cancellation requested for export {}", id);
            return Ok(());
        }
        match self.registry.get(id).await {
            Some(state) => Err(ExportError::Conflict(format!(
                "export {} is {} and cannot be cancelled",
                id, state.status
            ))),
            None => Err(ExportError::NotFound(format!("export {}", id))),
        }
    }

    /// Return artifact content. Unknown exports and wrong tokens get the
    /// same `NotFound` answer.
    pub async fn download_export(
        &self,
        id: ExportId,
        access_token: &str,
    ) -> Result<DownloadedArtifact, ExportError> {
        let stored = self.artifacts.read().await.get(&id).cloned();
        let granted = stored.as_ref().map_or(false, |s| match &s.artifact.access_token {
            Some(_) => self.tokens.verify(id, access_token),
            None => true,
        });

        if stored.as_ref().map_or(true, |s| s.log_access) {
            let action = if granted {
                AuditAction::DownloadGranted
            } else {
                AuditAction::DownloadDenied
            };
            self.sharing
                .audit()
                .append(AuditEntry::new(action, "download requested").for_export(Some(id)))
                .await;
        }

        let not_found = || ExportError::NotFound(format!("export {}", id));
        let stored = match stored {
            Some(s) if granted => s,
            _ => return Err(not_found()),
        };
        let bytes = tokio::fs::read(&stored.artifact.path)
            .await
            .map_err(|_| not_found())?;

        Ok(DownloadedArtifact {
            bytes,
            encryption: stored.artifact.encryption,
            checksum: stored.artifact.checksum,
        })
    }

    /// Share a completed export. Other than emergency contacts, only the
    /// recipient the export's purpose names, and the consent approves, may
    /// receive it. Emergency recipients are attempted even when the export
    /// failed or never produced an artifact.
    pub async fn share_export(
        &self,
        id: ExportId,
        recipient: &RecipientMetadata,
    ) -> Result<SharingResult, ExportError> {
        let recipient_type = recipient.recipient_type();
        let stored = self.artifacts.read().await.get(&id).cloned();

        let shared = match &stored {
            Some(s) => {
                if recipient_type != RecipientType::Emergency {
                    self.check_share_scope(id, s, recipient_type).await?;
                }
                self.sharing
                    .share(
                        Some(&s.artifact.path),
                        &s.artifact.encryption,
                        recipient,
                        Some(id),
                    )
                    .await
            }
            None if recipient_type == RecipientType::Emergency => {
                warn!("Export {} has no artifact; emergency delivery proceeds", id);
                self.sharing
                    .share(None, &EncryptionState::NotRequested, recipient, Some(id))
                    .await
            }
            None => return Err(ExportError::NotFound(format!("export {}", id))),
        };

        shared.map_err(|e| e.into_export_error(recipient_type))
    }

    /// An artifact goes only to the recipient its purpose was produced for,
    /// and only when the consent approved that recipient.
    async fn check_share_scope(
        &self,
        id: ExportId,
        stored: &StoredArtifact,
        recipient: RecipientType,
    ) -> Result<(), ExportError> {
        let intended = stored.purpose.recipient();
        let message = if recipient != intended {
            format!("export {} was produced for {}, not {}", id, intended, recipient)
        } else if !stored.approved_recipients.contains(&recipient) {
            format!("consent does not approve sharing with {}", recipient)
        } else {
            return Ok(());
        };

        warn!("Share of export {} to {} refused", id, recipient);
        let mut entry = AuditEntry::new(AuditAction::ShareRefused, message.clone())
            .for_export(Some(id));
        entry.recipient = Some(recipient);
        self.sharing.audit().append(entry).await;

        Err(ExportError::ConsentValidation {
            message,
            required_consents: Vec::new(),
        })
    }

    /// Remove artifacts past their retention, sweep stale files from the
    /// artifact directory and evict old terminal states.
    pub async fn sweep(&self) -> SweepReport {
        let now = chrono::Utc::now();
        let expired: Vec<StoredArtifact> = {
            let mut artifacts = self.artifacts.write().await;
            let ids: Vec<ExportId> = artifacts
                .iter()
                .filter(|(_, s)| s.expires_at <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| artifacts.remove(id)).collect()
        };

        let mut report = SweepReport::default();
        for stored in expired {
            match tokio::fs::remove_file(&stored.artifact.path).await {
                Ok(()) => {
                    report.files_removed += 1;
                    report.total_size_freed += stored.artifact.size;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => report
                    .errors
                    .push(format!("{}: {}", stored.artifact.path.display(), e)),
            }
        }

        let stale = sweep_expired_artifacts(&self.config.temp_dir, self.config.artifact_ttl()).await;
        report.files_removed += stale.files_removed;
        report.total_size_freed += stale.total_size_freed;
        report.errors.extend(stale.errors);

        let mut artifacts = self.artifacts.write().await;
        let mut gone = Vec::new();
        for (id, stored) in artifacts.iter() {
            if tokio::fs::metadata(&stored.artifact.path).await.is_err() {
                gone.push(*id);
            }
        }
        for id in gone {
            artifacts.remove(&id);
        }
        drop(artifacts);

        let evicted = self.registry.evict_expired(self.config.state_ttl()).await;
        info!(
            "Sweep removed {} files ({} bytes), evicted {} states",
            report.files_removed, report.total_size_freed, evicted
        );
        report
    }

    /// Run [`sweep`](Self::sweep) every `every` in a background task.
    pub fn spawn_background_sweep(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                orchestrator.sweep().await;
            }
        })
    }
}

fn transformer_for(config: &ExportConfig) -> ClinicalDataTransformer {
    ClinicalDataTransformer::new().with_validator(ClinicalValidator::new().with_limits(
        ValidationLimits {
            max_session_minutes: config.max_session_minutes,
        },
    ))
}

fn generation_error(format: ExportFormat, message: String) -> ExportError {
    ExportError::Generation {
        format,
        message,
        details: Vec::new(),
    }
}
