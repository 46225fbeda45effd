//! Export operation state and result.

use crate::canonical::Omission;
use crate::error::ExportError;
use crate::generation::{ExportArtifact, GenerationResult};
use crate::id::{ExportId, UserId};
use crate::request::ExportFormat;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    /// Registered, nothing done yet
    Initialized,
    /// Pipeline running
    Processing,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl ExportStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStatus::Completed | ExportStatus::Failed)
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportStatus::Initialized => write!(f, "initialized"),
            ExportStatus::Processing => write!(f, "processing"),
            ExportStatus::Completed => write!(f, "completed"),
            ExportStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Pipeline stage, used to report where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportStage {
    /// Request, consent and privacy validation
    Validate,
    /// State registration
    Register,
    /// Data retrieval
    Retrieve,
    /// Privacy & consent filtering
    Filter,
    /// Clinical transformation and validation
    Transform,
    /// Format rendering
    Render,
    /// Integrity validation
    Integrity,
    /// Encryption and token issuing
    Secure,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportStage::Validate => "validate",
            ExportStage::Register => "register",
            ExportStage::Retrieve => "retrieve",
            ExportStage::Filter => "filter",
            ExportStage::Transform => "transform",
            ExportStage::Render => "render",
            ExportStage::Integrity => "integrity",
            ExportStage::Secure => "secure",
        };
        f.write_str(name)
    }
}

/// Outcome of `generate_export`. Always well-formed; failures are carried
/// in `error` rather than raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportOperationResult {
    /// Export id
    pub export_id: ExportId,
    /// Whether an artifact was produced
    pub success: bool,
    /// Final artifact
    pub artifact: Option<ExportArtifact>,
    /// Render details
    pub generation: Option<GenerationResult>,
    /// Categories left out
    pub omissions: Vec<Omission>,
    /// Whether the data passed clinical validation
    pub clinically_validated: bool,
    /// Failure, if any
    pub error: Option<ExportError>,
    /// Stage that failed
    pub failed_stage: Option<ExportStage>,
}

impl ExportOperationResult {
    /// A failed result.
    pub fn failure(export_id: ExportId, stage: ExportStage, error: ExportError) -> Self {
        Self {
            export_id,
            success: false,
            artifact: None,
            generation: None,
            omissions: Vec::new(),
            clinically_validated: false,
            error: Some(error),
            failed_stage: Some(stage),
        }
    }
}

/// Tracked state of a single export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportOperationState {
    /// Export id
    pub export_id: ExportId,
    /// Format being produced
    pub operation_type: ExportFormat,
    /// Whose data
    pub user_id: UserId,
    /// Lifecycle status
    pub status: ExportStatus,
    /// 0..=100, never decreases
    pub progress: u8,
    /// Human-readable progress message
    pub status_message: String,
    /// When the export started
    pub start_time: Time,
    /// Last change
    pub last_update: Time,
    /// When the export finished
    pub end_time: Option<Time>,
    /// Final result
    pub result: Option<ExportOperationResult>,
    /// Failure
    pub error: Option<ExportError>,
}

impl ExportOperationState {
    /// A freshly registered export.
    pub fn new(export_id: ExportId, operation_type: ExportFormat, user_id: UserId) -> Self {
        let now = chrono::Utc::now();
        Self {
            export_id,
            operation_type,
            user_id,
            status: ExportStatus::Initialized,
            progress: 0,
            status_message: "Export initialized".to_string(),
            start_time: now,
            last_update: now,
            end_time: None,
            result: None,
            error: None,
        }
    }
}
