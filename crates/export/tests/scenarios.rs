//! End-to-end export scenarios over in-memory stores.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use clinexport_core::{
    AccessLevel, AnonymizationLevel, AssessmentKind, AssessmentRecord, CrisisContent,
    CrisisRecord, CsvStructure, DataCategory, EmergencyContact, EncryptionState, ExportError,
    ExportFormat, ExportId, ExportOperationState, ExportPurpose, ExportRequest, ExportStage,
    ExportStatus, GenerationResult, GenerationValidation, MoodEntry, OmissionReason,
    PrivacyConfiguration, RecipientType, RenderOptions, SafetyPlan, SessionRecord, TimeRange,
    UserConsentRecord, UserId,
};
use clinexport_delivery::{
    ArtifactEncryptor, AuditAction, DeliveryError, EmergencyProtocol, EncryptionKey,
    FileDropTransport, LoggingEmergencyProtocol, RecipientMetadata, SecureSharingService,
    SharingTransport,
};
use clinexport_export::{ExportConfig, ExportOrchestrator};
use clinexport_progress::InMemoryOperationRegistry;
use clinexport_render::{validate_csv_integrity, FormatRenderer};
use clinexport_storage::{
    keys, AssessmentDataResult, ClinicalDataSource, CrisisHistoryResult, InMemoryKeyValueStore,
    InMemorySecureStore, InMemoryStateStore, KeyValueStore, MbctProgressResult,
    MoodTrackingResult, SecureStore, StateStore, StoreBackedDataSource,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn user() -> UserId {
    UserId::new("patient-7")
}

async fn seeded_source() -> StoreBackedDataSource {
    let kv = InMemoryKeyValueStore::new();
    let state = InMemoryStateStore::new();
    let secure = InMemorySecureStore::new();
    let yesterday = Utc::now() - ChronoDuration::days(1);

    let assessments = vec![
        AssessmentRecord {
            id: "phq-1".to_string(),
            user_id: user(),
            kind: AssessmentKind::Phq9,
            answers: vec![3, 3, 3, 3, 3, 3, 3, 3, 1],
            total_score: Some(25.0),
            crisis_flag: Some(true),
            completed_at: Some(yesterday),
        },
        AssessmentRecord {
            id: "gad-1".to_string(),
            user_id: user(),
            kind: AssessmentKind::Gad7,
            answers: vec![1, 1, 1, 1, 1, 1, 1],
            total_score: Some(7.0),
            crisis_flag: Some(false),
            completed_at: Some(yesterday - ChronoDuration::days(3)),
        },
    ];
    kv.set_item(
        &keys::assessments(&user()),
        &serde_json::to_string(&assessments).unwrap(),
    )
    .await
    .unwrap();

    let sessions = vec![SessionRecord {
        id: "s-1".to_string(),
        user_id: user(),
        practice: "body-scan".to_string(),
        duration_minutes: 20.0,
        completed: true,
        notes: Some("felt calmer".to_string()),
        started_at: Some(yesterday),
    }];
    kv.set_item(&keys::mbct(&user()), &serde_json::to_string(&sessions).unwrap())
        .await
        .unwrap();

    let mood = vec![MoodEntry {
        id: "m-1".to_string(),
        user_id: user(),
        mood: 4.0,
        energy: Some(5.0),
        anxiety: Some(6.0),
        notes: Some("rough morning".to_string()),
        recorded_at: Some(yesterday),
    }];
    state
        .set_slice(&keys::mood(&user()), serde_json::to_value(&mood).unwrap())
        .await
        .unwrap();

    let crisis = vec![CrisisRecord {
        id: "c-1".to_string(),
        user_id: user(),
        content: CrisisContent::Detailed {
            risk_score: 9.0,
            suicidal_ideation: true,
            safety_plan: Some(SafetyPlan {
                warning_signs: vec!["isolating".to_string()],
                coping_strategies: vec!["walk".to_string()],
                emergency_contacts: vec![EmergencyContact {
                    name: "Alex".to_string(),
                    phone: "555-0199".to_string(),
                }],
            }),
        },
        recorded_at: Some(yesterday),
    }];
    secure
        .set_secure_item(&keys::crisis(&user()), &serde_json::to_vec(&crisis).unwrap())
        .await
        .unwrap();

    StoreBackedDataSource::new(Arc::new(kv), Arc::new(state), Arc::new(secure))
}

fn sharing(dir: &Path) -> SecureSharingService {
    SecureSharingService::new(
        Arc::new(FileDropTransport::new(dir.join("outbox"))),
        Arc::new(LoggingEmergencyProtocol::new()),
    )
}

fn orchestrator_over(
    dir: &Path,
    source: Arc<dyn ClinicalDataSource>,
    sharing: SecureSharingService,
) -> ExportOrchestrator {
    ExportOrchestrator::new(
        source,
        Arc::new(InMemoryOperationRegistry::new()),
        Arc::new(sharing),
    )
    .with_config(ExportConfig::default().with_temp_dir(dir.join("artifacts")))
}

async fn orchestrator(dir: &Path) -> ExportOrchestrator {
    orchestrator_over(dir, Arc::new(seeded_source().await), sharing(dir))
}

fn request(
    requested: &[DataCategory],
    consented: &[DataCategory],
    purpose: ExportPurpose,
) -> ExportRequest {
    let mut consent = UserConsentRecord::new(user(), consented.iter().copied())
        .with_recipient(purpose.recipient())
        .signed("signature");
    consent.granted_at = Utc::now() - ChronoDuration::days(7);
    ExportRequest::new(
        user(),
        requested.iter().copied(),
        ExportFormat::Csv,
        TimeRange::last_days(30),
        consent,
    )
    .with_purpose(purpose)
}

/// Read back an artifact through the download path, decrypting if needed.
async fn read_artifact(orchestrator: &ExportOrchestrator, id: ExportId, token: &str) -> String {
    let download = orchestrator.download_export(id, token).await.unwrap();
    let bytes = match &download.encryption {
        EncryptionState::Encrypted { key } => ArtifactEncryptor::new()
            .decrypt(&download.bytes, &EncryptionKey::from_base64(key).unwrap())
            .unwrap(),
        _ => download.bytes,
    };
    String::from_utf8(bytes).unwrap()
}

fn rows(text: &str) -> Vec<Vec<String>> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes())
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

/// Rows of the flat layout keyed by header name.
fn flat_rows(text: &str, category: &str) -> Vec<std::collections::HashMap<String, String>> {
    let all = rows(text);
    let header = all[0].clone();
    all[1..]
        .iter()
        .filter(|r| r[0] == category)
        .map(|r| header.iter().cloned().zip(r.iter().cloned()).collect())
        .collect()
}

#[tokio::test]
async fn unconsented_category_is_omitted_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path()).await;

    let result = orchestrator
        .generate_export(request(
            &[DataCategory::Assessments],
            &[DataCategory::MoodTracking],
            ExportPurpose::PersonalRecord,
        ))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.omissions.len(), 1);
    assert_eq!(result.omissions[0].category, DataCategory::Assessments);
    assert_eq!(result.omissions[0].reason, OmissionReason::ConsentNotGranted);

    let token = result.artifact.as_ref().unwrap().access_token.clone().unwrap();
    let text = read_artifact(&orchestrator, result.export_id, &token).await;
    assert!(flat_rows(&text, "assessments").is_empty());
}

#[tokio::test]
async fn phq9_with_item_nine_is_crisis_level() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path()).await;

    let result = orchestrator
        .generate_export(request(
            &[DataCategory::Assessments],
            &[DataCategory::Assessments],
            ExportPurpose::PersonalRecord,
        ))
        .await;
    assert!(result.success, "{:?}", result.error);
    assert!(result.clinically_validated);

    let token = result.artifact.as_ref().unwrap().access_token.clone().unwrap();
    let text = read_artifact(&orchestrator, result.export_id, &token).await;
    let phq = flat_rows(&text, "assessments")
        .into_iter()
        .find(|r| r["record_id"] == "phq-1")
        .unwrap();
    assert_eq!(phq["score"], "25");
    assert_eq!(phq["is_crisis_level"], "true");
    assert_eq!(phq["has_suicidal_ideation"], "true");
    assert_eq!(phq["severity"], "severe");
}

#[tokio::test]
async fn research_export_coarsens_crisis_records() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path()).await;

    let all = DataCategory::ALL;
    let req = request(&all, &all, ExportPurpose::Research)
        .with_privacy(PrivacyConfiguration::with_level(AnonymizationLevel::ResearchGrade));
    let result = orchestrator.generate_export(req).await;
    assert!(result.success, "{:?}", result.error);

    let artifact = result.artifact.unwrap();
    assert!(artifact.encryption.is_encrypted());
    let text = read_artifact(
        &orchestrator,
        result.export_id,
        artifact.access_token.as_deref().unwrap(),
    )
    .await;

    let crisis = flat_rows(&text, "crisis-safety");
    assert_eq!(crisis.len(), 1);
    assert_eq!(crisis[0]["risk_category"], "high");
    assert_eq!(crisis[0]["risk_score"], "");
    assert_eq!(crisis[0]["suicidal_ideation"], "");
    assert!(!text.contains("patient-7"));
    assert!(!text.contains("555-0199"));

    // The PHQ-9 at 25 with item 9 endorsed is withheld; GAD-7 at 7 stays.
    let assessments = flat_rows(&text, "assessments");
    assert_eq!(assessments.len(), 1);
    assert_eq!(assessments[0]["instrument"], "GAD-7");
    assert!(assessments
        .iter()
        .all(|r| r["is_crisis_level"] == "false" && r["has_suicidal_ideation"] == "false"));
    assert!(result.omissions.iter().any(|o| o.category == DataCategory::Assessments
        && o.reason == OmissionReason::CrisisWithheld));
}

#[tokio::test]
async fn restricted_access_omits_crisis_history() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path()).await;

    let mut req = request(
        &[DataCategory::Assessments, DataCategory::CrisisSafety],
        &[DataCategory::Assessments, DataCategory::CrisisSafety],
        ExportPurpose::PersonalRecord,
    );
    req.privacy.access_controls.access_level = AccessLevel::Restricted;
    let result = orchestrator.generate_export(req).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.omissions.len(), 1);
    assert_eq!(result.omissions[0].category, DataCategory::CrisisSafety);
    assert_eq!(result.omissions[0].reason, OmissionReason::AccessDenied);
}

/// Writes an empty file and reports it honestly.
struct EmptyCsvRenderer;

#[async_trait]
impl FormatRenderer for EmptyCsvRenderer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    async fn render(
        &self,
        data: &clinexport_core::ClinicalExportData,
        options: &RenderOptions,
        output: &Path,
    ) -> clinexport_render::Result<GenerationResult> {
        tokio::fs::write(output, b"").await?;
        Ok(GenerationResult {
            file_path: output.to_path_buf(),
            file_size: 0,
            record_count: data.record_count(),
            page_count: None,
            generation_time_ms: 0,
            validation: validate_csv_integrity(&[], options.csv_structure),
        })
    }
}

/// Writes an empty file but claims a valid 1 KiB artifact.
struct LyingRenderer;

#[async_trait]
impl FormatRenderer for LyingRenderer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    async fn render(
        &self,
        data: &clinexport_core::ClinicalExportData,
        _: &RenderOptions,
        output: &Path,
    ) -> clinexport_render::Result<GenerationResult> {
        tokio::fs::write(output, b"").await?;
        Ok(GenerationResult {
            file_path: output.to_path_buf(),
            file_size: 1024,
            record_count: data.record_count(),
            page_count: None,
            generation_time_ms: 0,
            validation: GenerationValidation::passed(),
        })
    }
}

async fn artifact_dir_is_empty(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir.join("artifacts")).await {
        Ok(mut entries) => entries.next_entry().await.unwrap().is_none(),
        Err(_) => true,
    }
}

#[tokio::test]
async fn zero_byte_artifact_is_a_generation_error() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path())
        .await
        .with_renderer(Arc::new(EmptyCsvRenderer));

    let result = orchestrator
        .generate_export(request(
            &[DataCategory::Assessments],
            &[DataCategory::Assessments],
            ExportPurpose::PersonalRecord,
        ))
        .await;

    assert!(!result.success);
    assert!(result.artifact.is_none());
    assert_eq!(result.failed_stage, Some(ExportStage::Render));
    assert!(matches!(result.error, Some(ExportError::Generation { .. })));

    let state = orchestrator.get_export_status(result.export_id).await.unwrap();
    assert_eq!(state.status, ExportStatus::Failed);
    assert!(artifact_dir_is_empty(dir.path()).await);
}

#[tokio::test]
async fn renderer_output_is_reverified() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path())
        .await
        .with_renderer(Arc::new(LyingRenderer));

    let result = orchestrator
        .generate_export(request(
            &[DataCategory::MoodTracking],
            &[DataCategory::MoodTracking],
            ExportPurpose::PersonalRecord,
        ))
        .await;

    assert!(!result.success);
    assert_eq!(result.failed_stage, Some(ExportStage::Integrity));
    assert!(matches!(result.error, Some(ExportError::Generation { .. })));
    assert!(artifact_dir_is_empty(dir.path()).await);
}

struct BrokenTransport;

#[async_trait]
impl SharingTransport for BrokenTransport {
    fn method(&self) -> &str {
        "broken"
    }

    async fn deliver(
        &self,
        _: Option<&Path>,
        _: &RecipientMetadata,
    ) -> clinexport_delivery::Result<()> {
        Err(DeliveryError::Transport("network unreachable".to_string()))
    }
}

#[derive(Default)]
struct CountingProtocol {
    calls: AtomicUsize,
}

#[async_trait]
impl EmergencyProtocol for CountingProtocol {
    async fn activate_emergency_protocols(
        &self,
        _: &RecipientMetadata,
        _: &str,
    ) -> clinexport_delivery::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn failed_emergency_share_still_activates_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let protocol = Arc::new(CountingProtocol::default());
    let sharing = SecureSharingService::new(Arc::new(BrokenTransport), protocol.clone());
    let orchestrator =
        orchestrator_over(dir.path(), Arc::new(seeded_source().await), sharing)
            .with_renderer(Arc::new(EmptyCsvRenderer));

    let failed = orchestrator
        .generate_export(request(
            &[DataCategory::CrisisSafety],
            &[DataCategory::CrisisSafety],
            ExportPurpose::EmergencyHandoff,
        ))
        .await;
    assert!(!failed.success);

    let recipient = RecipientMetadata::Emergency {
        contact: EmergencyContact {
            name: "Crisis line".to_string(),
            phone: "988".to_string(),
        },
    };
    let err = orchestrator
        .share_export(failed.export_id, &recipient)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ExportError::EmergencyDelivery {
            fallback_activated: true,
            ..
        }
    ));
    assert_eq!(protocol.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn provider_share_needs_completed_export() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path()).await;
    let recipient = RecipientMetadata::HealthcareProvider {
        provider_id: "clinic-1".to_string(),
        credentials: Some(clinexport_delivery::ProviderCredentials {
            license_number: "MD-42".to_string(),
            verified: true,
        }),
    };

    assert!(matches!(
        orchestrator.share_export(ExportId::new(), &recipient).await,
        Err(ExportError::NotFound(_))
    ));

    let result = orchestrator
        .generate_export(request(
            &[DataCategory::Assessments],
            &[DataCategory::Assessments],
            ExportPurpose::ClinicalReport,
        ))
        .await;
    assert!(result.success, "{:?}", result.error);

    let shared = orchestrator
        .share_export(result.export_id, &recipient)
        .await
        .unwrap();
    assert_eq!(shared.recipient, RecipientType::HealthcareProvider);
    assert!(dir.path().join("outbox/provider-clinic-1").exists());
}

#[tokio::test]
async fn share_is_limited_to_the_export_recipient() {
    let dir = tempfile::tempdir().unwrap();
    let sharing = Arc::new(sharing(dir.path()));
    let orchestrator = ExportOrchestrator::new(
        Arc::new(seeded_source().await),
        Arc::new(InMemoryOperationRegistry::new()),
        sharing.clone(),
    )
    .with_config(ExportConfig::default().with_temp_dir(dir.path().join("artifacts")));

    let result = orchestrator
        .generate_export(request(
            &[DataCategory::CrisisSafety],
            &[DataCategory::CrisisSafety],
            ExportPurpose::ClinicalReport,
        ))
        .await;
    assert!(result.success, "{:?}", result.error);

    let research = RecipientMetadata::Research {
        study_id: "study-9".to_string(),
        consent: Some(clinexport_delivery::ResearchConsent {
            study_id: "study-9".to_string(),
            granted_at: Utc::now() - ChronoDuration::days(1),
            revoked: false,
        }),
    };
    let err = orchestrator
        .share_export(result.export_id, &research)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::ConsentValidation { .. }));
    assert!(!dir.path().join("outbox/research-study-9").exists());

    let personal = RecipientMetadata::Personal { user_id: user() };
    assert!(orchestrator
        .share_export(result.export_id, &personal)
        .await
        .is_err());

    let refused: Vec<_> = sharing
        .audit()
        .for_export(result.export_id)
        .await
        .into_iter()
        .filter(|e| e.action == AuditAction::ShareRefused)
        .collect();
    assert_eq!(refused.len(), 2);
    assert_eq!(refused[0].recipient, Some(RecipientType::Research));
}

#[tokio::test]
async fn duplicate_export_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path()).await;
    let id = ExportId::new();
    let req = request(
        &[DataCategory::Assessments],
        &[DataCategory::Assessments],
        ExportPurpose::PersonalRecord,
    )
    .with_export_id(id);

    let (first, second) = tokio::join!(
        orchestrator.generate_export(req.clone()),
        orchestrator.generate_export(req.clone())
    );
    let results = [first, second];
    let rejected: Vec<_> = results
        .iter()
        .filter(|r| r.failed_stage == Some(ExportStage::Register))
        .collect();
    assert_eq!(rejected.len(), 1);
    assert!(matches!(rejected[0].error, Some(ExportError::Conflict(_))));
    assert_eq!(results.iter().filter(|r| r.success).count(), 1);

    let again = orchestrator.generate_export(req).await;
    assert_eq!(again.failed_stage, Some(ExportStage::Register));
    let state = orchestrator.get_export_status(id).await.unwrap();
    assert_eq!(state.status, ExportStatus::Completed);
}

#[tokio::test]
async fn every_csv_layout_is_rectangular_utf8() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path()).await;
    let all = DataCategory::ALL;

    for structure in [CsvStructure::Flat, CsvStructure::Normalized, CsvStructure::Hierarchical] {
        let req = request(&all, &all, ExportPurpose::PersonalRecord).with_render_options(
            RenderOptions {
                csv_structure: structure,
                ..Default::default()
            },
        );
        let result = orchestrator.generate_export(req).await;
        assert!(result.success, "{:?}: {:?}", structure, result.error);

        let token = result.artifact.unwrap().access_token.unwrap();
        let text = read_artifact(&orchestrator, result.export_id, &token).await;
        let table = rows(&text);
        assert!(table.len() > 1);
        let width = table[0].len();
        assert!(table.iter().all(|r| r.len() == width), "{:?}", structure);
        assert!(text.ends_with('\n'));
    }
}

#[tokio::test]
async fn excluded_category_never_reaches_the_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path()).await;
    let all = DataCategory::ALL;
    let consented = [
        DataCategory::Assessments,
        DataCategory::MoodTracking,
        DataCategory::MbctProgress,
    ];

    let result = orchestrator
        .generate_export(request(&all, &consented, ExportPurpose::PersonalRecord))
        .await;
    assert!(result.success, "{:?}", result.error);

    let token = result.artifact.unwrap().access_token.unwrap();
    let text = read_artifact(&orchestrator, result.export_id, &token).await;
    assert!(flat_rows(&text, "crisis-safety").is_empty());
    assert!(!text.contains("c-1"));
    assert_eq!(flat_rows(&text, "mood-tracking").len(), 1);
}

#[tokio::test]
async fn pdf_report_is_produced() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path()).await;
    let mut req = request(
        &DataCategory::ALL,
        &DataCategory::ALL,
        ExportPurpose::PersonalRecord,
    );
    req.format = ExportFormat::Pdf;

    let result = orchestrator.generate_export(req).await;
    assert!(result.success, "{:?}", result.error);
    let generation = result.generation.unwrap();
    assert!(generation.validation.is_valid());
    assert!(generation.page_count.unwrap_or(0) >= 1);

    let token = result.artifact.unwrap().access_token.unwrap();
    let download = orchestrator
        .download_export(result.export_id, &token)
        .await
        .unwrap();
    assert!(download.bytes.starts_with(b"%PDF-"));
}

#[tokio::test]
async fn progress_is_monotonic_and_reaches_100() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path()).await;
    let id = ExportId::new();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    orchestrator
        .subscribe(
            id,
            Arc::new(move |state: &ExportOperationState| {
                sink.lock().unwrap().push(state.progress);
            }),
        )
        .await;

    let result = orchestrator
        .generate_export(
            request(
                &DataCategory::ALL,
                &DataCategory::ALL,
                ExportPurpose::PersonalRecord,
            )
            .with_export_id(id),
        )
        .await;
    assert!(result.success, "{:?}", result.error);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&0));
    assert_eq!(seen.last(), Some(&100));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);

    let taken = orchestrator.take_export_result(id).await.unwrap();
    assert_eq!(taken.status, ExportStatus::Completed);
    assert!(orchestrator.get_export_status(id).await.is_none());
}

/// Delays every read.
struct SlowSource {
    inner: StoreBackedDataSource,
    delay: Duration,
}

#[async_trait]
impl ClinicalDataSource for SlowSource {
    async fn get_assessment_data(
        &self,
        user_id: &UserId,
        range: &TimeRange,
    ) -> clinexport_storage::Result<AssessmentDataResult> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_assessment_data(user_id, range).await
    }

    async fn get_mood_tracking_data(
        &self,
        user_id: &UserId,
        range: &TimeRange,
    ) -> clinexport_storage::Result<MoodTrackingResult> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_mood_tracking_data(user_id, range).await
    }

    async fn get_mbct_progress_data(
        &self,
        user_id: &UserId,
        range: &TimeRange,
    ) -> clinexport_storage::Result<MbctProgressResult> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_mbct_progress_data(user_id, range).await
    }

    async fn get_crisis_assessment_history(
        &self,
        user_id: &UserId,
        access_level: AccessLevel,
    ) -> clinexport_storage::Result<CrisisHistoryResult> {
        tokio::time::sleep(self.delay).await;
        self.inner
            .get_crisis_assessment_history(user_id, access_level)
            .await
    }
}

async fn slow_orchestrator(dir: &Path, delay: Duration) -> ExportOrchestrator {
    let source = SlowSource {
        inner: seeded_source().await,
        delay,
    };
    orchestrator_over(dir, Arc::new(source), sharing(dir))
}

#[tokio::test]
async fn cancellation_stops_at_next_stage() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator =
        Arc::new(slow_orchestrator(dir.path(), Duration::from_millis(200)).await);
    let id = ExportId::new();
    let req = request(
        &[DataCategory::Assessments],
        &[DataCategory::Assessments],
        ExportPurpose::PersonalRecord,
    )
    .with_export_id(id);

    let runner = orchestrator.clone();
    let handle = tokio::spawn(async move { runner.generate_export(req).await });

    loop {
        if let Some(state) = orchestrator.get_export_status(id).await {
            if state.status == ExportStatus::Processing {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    orchestrator.cancel_export(id).await.unwrap();

    let result = handle.await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error, Some(ExportError::Cancelled));
    assert!(artifact_dir_is_empty(dir.path()).await);
    assert!(matches!(
        orchestrator.cancel_export(id).await,
        Err(ExportError::Conflict(_))
    ));
}

#[tokio::test]
async fn slow_export_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = slow_orchestrator(dir.path(), Duration::from_secs(3))
        .await
        .with_config(ExportConfig {
            export_timeout_secs: 1,
            ..ExportConfig::default().with_temp_dir(dir.path().join("artifacts"))
        });

    let result = orchestrator
        .generate_export(request(
            &[DataCategory::Assessments],
            &[DataCategory::Assessments],
            ExportPurpose::PersonalRecord,
        ))
        .await;

    assert!(!result.success);
    assert_eq!(result.failed_stage, Some(ExportStage::Retrieve));
    assert!(matches!(result.error, Some(ExportError::Timeout { .. })));
    let state = orchestrator.get_export_status(result.export_id).await.unwrap();
    assert_eq!(state.status, ExportStatus::Failed);
}
