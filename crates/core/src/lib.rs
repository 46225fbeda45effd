//! Clinical export core data models.
//!
//! This crate defines the data structures shared by every stage of the
//! clinical data export pipeline: requests, consent, privacy configuration,
//! raw stored records, the canonical export shape, operation state and the
//! error taxonomy.

#![warn(missing_docs)]

// Identities
mod id;

// Request surface
mod category;
mod consent;
mod privacy;
mod request;

// Data
mod records;
mod canonical;

// Pipeline outputs
mod generation;
mod state;
mod error;

// Re-exports
pub use id::*;

pub use category::{DataCategory, RecipientType};
pub use consent::UserConsentRecord;
pub use privacy::{
    AccessControls, AccessLevel, AnonymizationConfig, AnonymizationLevel, AuditRequirements,
    EncryptionRequirement, PrivacyConfiguration, RetentionPolicy,
};
pub use request::{
    CsvStructure, ExportFormat, ExportPurpose, ExportRequest, RenderOptions, ReportTheme,
    TimeRange,
};

pub use records::{
    AssessmentKind, AssessmentRecord, CategoryData, CrisisContent, CrisisRecord,
    EmergencyContact, MoodEntry, RiskCategory, SafetyPlan, SessionRecord,
};
pub use canonical::{
    AssessmentResult, ClinicalExportData, Collection, CrisisEntry, ExportSummary, MoodTracking,
    Omission, OmissionReason, SeverityBand, TherapeuticSession, ValidationStatus,
};

pub use generation::{ExportArtifact, EncryptionState, GenerationResult, GenerationValidation};
pub use state::{ExportOperationResult, ExportOperationState, ExportStage, ExportStatus};
pub use error::{error_codes, ExportError};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
