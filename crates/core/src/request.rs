//! Export request submitted by the UI layer.

use crate::category::{DataCategory, RecipientType};
use crate::consent::UserConsentRecord;
use crate::error::ExportError;
use crate::id::{ExportId, UserId};
use crate::privacy::PrivacyConfiguration;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Output format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Themed clinical report
    Pdf,
    /// Tabular data
    Csv,
}

impl ExportFormat {
    /// File extension for artifacts of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Pdf => "PDF",
            ExportFormat::Csv => "CSV",
        })
    }
}

/// CSV layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvStructure {
    /// Related tables joined by foreign keys
    Normalized,
    /// One denormalized table
    #[default]
    Flat,
    /// Nested parent/child rows
    Hierarchical,
}

/// Visual theme of the PDF report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportTheme {
    /// Default clinical theme
    #[default]
    Clinical,
    /// High contrast theme
    HighContrast,
}

/// Rendering options passed to the format renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// CSV layout
    #[serde(default)]
    pub csv_structure: CsvStructure,
    /// PDF theme
    #[serde(default)]
    pub theme: ReportTheme,
    /// Embed trend charts in the PDF
    #[serde(default = "default_include_charts")]
    pub include_charts: bool,
}

fn default_include_charts() -> bool {
    true
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            csv_structure: CsvStructure::default(),
            theme: ReportTheme::default(),
            include_charts: true,
        }
    }
}

/// Why the export is being produced. Decides the intended recipient and
/// whether clinically unvalidated data may be exported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportPurpose {
    /// Report for a treating clinician
    #[default]
    ClinicalReport,
    /// Copy for the user's own records
    PersonalRecord,
    /// De-identified research contribution
    Research,
    /// Hand-off to emergency services
    EmergencyHandoff,
}

impl ExportPurpose {
    /// Recipient type implied by the purpose.
    pub fn recipient(&self) -> RecipientType {
        match self {
            ExportPurpose::ClinicalReport => RecipientType::HealthcareProvider,
            ExportPurpose::PersonalRecord => RecipientType::Personal,
            ExportPurpose::Research => RecipientType::Research,
            ExportPurpose::EmergencyHandoff => RecipientType::Emergency,
        }
    }
}

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Window start
    pub start: Time,
    /// Window end
    pub end: Time,
}

impl TimeRange {
    /// Create a time range.
    pub fn new(start: Time, end: Time) -> Self {
        Self { start, end }
    }

    /// The last `days` days up to now.
    pub fn last_days(days: i64) -> Self {
        let end = chrono::Utc::now();
        Self {
            start: end - chrono::Duration::days(days),
            end,
        }
    }

    /// Whether `t` lies inside the window.
    pub fn contains(&self, t: Time) -> bool {
        t >= self.start && t <= self.end
    }

    /// Whether the window is well formed.
    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    /// Shift both ends by `offset`.
    pub fn shifted(&self, offset: chrono::Duration) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

/// An export request. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Caller-chosen id; generated when absent
    #[serde(default)]
    pub export_id: Option<ExportId>,
    /// Whose data
    pub user_id: UserId,
    /// Requested categories
    pub data_categories: BTreeSet<DataCategory>,
    /// Output format
    pub format: ExportFormat,
    /// Time window
    pub time_range: TimeRange,
    /// Consent record presented with the request
    pub consent: UserConsentRecord,
    /// Privacy configuration
    #[serde(default)]
    pub privacy: PrivacyConfiguration,
    /// Why the export is produced
    #[serde(default)]
    pub purpose: ExportPurpose,
    /// Allow clinically unvalidated data (personal records only)
    #[serde(default)]
    pub allow_unvalidated: bool,
    /// Renderer options
    #[serde(default)]
    pub render: RenderOptions,
}

impl ExportRequest {
    /// Create a request with default privacy, purpose and rendering.
    pub fn new(
        user_id: UserId,
        data_categories: impl IntoIterator<Item = DataCategory>,
        format: ExportFormat,
        time_range: TimeRange,
        consent: UserConsentRecord,
    ) -> Self {
        Self {
            export_id: None,
            user_id,
            data_categories: data_categories.into_iter().collect(),
            format,
            time_range,
            consent,
            privacy: PrivacyConfiguration::default(),
            purpose: ExportPurpose::default(),
            allow_unvalidated: false,
            render: RenderOptions::default(),
        }
    }

    /// Use a fixed export id.
    pub fn with_export_id(mut self, id: ExportId) -> Self {
        self.export_id = Some(id);
        self
    }

    /// Set the privacy configuration.
    pub fn with_privacy(mut self, privacy: PrivacyConfiguration) -> Self {
        self.privacy = privacy;
        self
    }

    /// Set the purpose.
    pub fn with_purpose(mut self, purpose: ExportPurpose) -> Self {
        self.purpose = purpose;
        self
    }

    /// Set render options.
    pub fn with_render_options(mut self, render: RenderOptions) -> Self {
        self.render = render;
        self
    }

    /// Schema-level validation. Consent is checked separately.
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.user_id.as_str().trim().is_empty() {
            return Err(ExportError::Validation("user id is required".to_string()));
        }
        if self.data_categories.is_empty() {
            return Err(ExportError::Validation(
                "at least one data category must be requested".to_string(),
            ));
        }
        if !self.time_range.is_valid() {
            return Err(ExportError::Validation(
                "time range start must not be after its end".to_string(),
            ));
        }
        if self.allow_unvalidated && self.purpose != ExportPurpose::PersonalRecord {
            return Err(ExportError::Validation(
                "unvalidated export is only available for personal records".to_string(),
            ));
        }
        Ok(())
    }
}
