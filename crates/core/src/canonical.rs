//! Canonical export data: the single shape every renderer consumes.

use crate::category::DataCategory;
use crate::id::ExportId;
use crate::privacy::AnonymizationLevel;
use crate::records::{AssessmentKind, CrisisContent};
use crate::request::TimeRange;
use crate::Time;
use serde::{Deserialize, Serialize};

/// Clinical severity band for a questionnaire score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeverityBand {
    /// Minimal symptoms
    Minimal,
    /// Mild symptoms
    Mild,
    /// Moderate symptoms
    Moderate,
    /// Moderately severe symptoms (PHQ-9 only)
    ModeratelySevere,
    /// Severe symptoms
    Severe,
}

impl SeverityBand {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityBand::Minimal => "minimal",
            SeverityBand::Mild => "mild",
            SeverityBand::Moderate => "moderate",
            SeverityBand::ModeratelySevere => "moderately-severe",
            SeverityBand::Severe => "severe",
        }
    }
}

/// Validation status of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    /// Every record passed
    Valid,
    /// Some records failed non-blocking checks
    Warnings,
    /// At least one record failed a clinical rule
    Invalid,
}

/// A scored questionnaire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    /// Record id (pseudonymized when anonymized)
    pub record_id: String,
    /// Subject identifier (pseudonym when anonymized)
    pub subject: String,
    /// Questionnaire
    pub kind: AssessmentKind,
    /// Total score
    pub score: f64,
    /// Per-item scores
    pub subscale_scores: Vec<f64>,
    /// Severity band of the score
    pub severity: SeverityBand,
    /// Whether the score meets the crisis cutoff
    pub is_crisis_level: bool,
    /// Whether the suicidal ideation item was endorsed (PHQ-9 item 9 >= 1)
    pub has_suicidal_ideation: bool,
    /// Completion time
    pub completed_at: Option<Time>,
}

/// A mood check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodTracking {
    /// Record id
    pub record_id: String,
    /// Subject identifier
    pub subject: String,
    /// Mood 1..=10
    pub mood: f64,
    /// Energy 1..=10
    pub energy: Option<f64>,
    /// Anxiety 1..=10
    pub anxiety: Option<f64>,
    /// Free text, when not minimized away
    pub notes: Option<String>,
    /// Check-in time
    pub recorded_at: Option<Time>,
}

/// An MBCT session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TherapeuticSession {
    /// Record id
    pub record_id: String,
    /// Subject identifier
    pub subject: String,
    /// Practice name
    pub practice: String,
    /// Duration in minutes
    pub duration_minutes: f64,
    /// Whether the practice was completed
    pub completed: bool,
    /// Free text, when not minimized away
    pub notes: Option<String>,
    /// Session start
    pub started_at: Option<Time>,
}

/// A crisis entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisEntry {
    /// Record id
    pub record_id: String,
    /// Subject identifier
    pub subject: String,
    /// Detail or coarse category
    pub content: CrisisContent,
    /// Assessment time
    pub recorded_at: Option<Time>,
}

/// A collection of canonical records with quality metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection<T> {
    /// Records
    pub records: Vec<T>,
    /// Fraction of records that passed validation, 0..=1
    pub data_quality: f64,
    /// Aggregate validation status
    pub validation_status: ValidationStatus,
}

impl<T> Collection<T> {
    /// An empty, valid collection.
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            data_quality: 1.0,
            validation_status: ValidationStatus::Valid,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Why a category is absent from an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OmissionReason {
    /// The consent record does not cover the category
    ConsentNotGranted,
    /// The storage gate denied access at the requested level
    AccessDenied,
    /// Crisis-threshold responses withheld from a research export
    CrisisWithheld,
}

/// A category left out of an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Omission {
    /// The omitted category
    pub category: DataCategory,
    /// Why
    pub reason: OmissionReason,
}

impl Omission {
    /// Human-readable note for reports.
    pub fn note(&self) -> String {
        match self.reason {
            OmissionReason::ConsentNotGranted => {
                format!("{} omitted: consent not granted", self.category)
            }
            OmissionReason::AccessDenied => {
                format!("{} omitted: access denied at requested level", self.category)
            }
            OmissionReason::CrisisWithheld => {
                format!("{}: crisis-threshold responses withheld", self.category)
            }
        }
    }
}

/// Record counts and flags for the export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Assessment count
    pub assessment_count: usize,
    /// Mood entry count
    pub mood_entry_count: usize,
    /// Session count
    pub session_count: usize,
    /// Crisis entry count
    pub crisis_entry_count: usize,
    /// Whether any record reaches a crisis threshold
    pub crisis_indicators_present: bool,
}

impl ExportSummary {
    /// Total record count.
    pub fn total_records(&self) -> usize {
        self.assessment_count + self.mood_entry_count + self.session_count + self.crisis_entry_count
    }
}

/// Canonical export data. Owned by the transformer until handed to a
/// renderer; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalExportData {
    /// Export this data belongs to
    pub export_id: ExportId,
    /// Subject identifier (pseudonym when anonymized)
    pub subject: String,
    /// Time window (shifted when temporal shifting applied)
    pub time_range: TimeRange,
    /// Anonymization applied
    pub anonymization: AnonymizationLevel,
    /// Questionnaires
    pub assessments: Collection<AssessmentResult>,
    /// Mood check-ins
    pub mood: Collection<MoodTracking>,
    /// MBCT sessions
    pub sessions: Collection<TherapeuticSession>,
    /// Crisis entries, when requested and consented
    pub crisis: Option<Collection<CrisisEntry>>,
    /// Categories left out
    pub omissions: Vec<Omission>,
    /// Counts and flags
    pub summary: ExportSummary,
}

impl ClinicalExportData {
    /// Number of records of a category in this data.
    pub fn count(&self, category: DataCategory) -> usize {
        match category {
            DataCategory::Assessments => self.assessments.len(),
            DataCategory::MoodTracking => self.mood.len(),
            DataCategory::MbctProgress => self.sessions.len(),
            DataCategory::CrisisSafety => self.crisis.as_ref().map_or(0, |c| c.len()),
        }
    }

    /// Total record count.
    pub fn record_count(&self) -> usize {
        DataCategory::ALL.iter().map(|c| self.count(*c)).sum()
    }
}
