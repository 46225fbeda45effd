//! Export error taxonomy.

use crate::category::{DataCategory, RecipientType};
use crate::request::ExportFormat;
use serde::{Deserialize, Serialize};

/// Stable error codes surfaced to callers.
pub mod error_codes {
    /// Consent missing, expired or insufficient
    pub const CONSENT_VALIDATION: &str = "CONSENT_VALIDATION";
    /// Clinical accuracy rules failed
    pub const CLINICAL_ACCURACY: &str = "CLINICAL_ACCURACY";
    /// Renderer failure or invalid artifact
    pub const GENERATION: &str = "GENERATION";
    /// Secure file creation failed
    pub const ENCRYPTION: &str = "ENCRYPTION";
    /// Pipeline exceeded its time budget
    pub const TIMEOUT: &str = "TIMEOUT";
    /// Emergency delivery failed
    pub const EMERGENCY_DELIVERY: &str = "EMERGENCY_DELIVERY";
    /// Delivery to a non-emergency recipient failed
    pub const DELIVERY: &str = "DELIVERY";
    /// Malformed request
    pub const VALIDATION: &str = "VALIDATION";
    /// Storage read failed
    pub const STORAGE: &str = "STORAGE";
    /// Cancelled by the caller
    pub const CANCELLED: &str = "CANCELLED";
    /// Export id already in use
    pub const STATE_CONFLICT: &str = "STATE_CONFLICT";
    /// Export or artifact not found
    pub const NOT_FOUND: &str = "NOT_FOUND";
}

/// Errors reported by the export pipeline. Every stage failure is converted
/// into one of these at the orchestrator boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum ExportError {
    /// Consent missing, expired or insufficient.
    #[error("consent validation failed: {message}")]
    ConsentValidation {
        /// What is wrong
        message: String,
        /// Categories the user must consent to
        required_consents: Vec<DataCategory>,
    },

    /// Transformed data failed clinical validation rules.
    #[error("clinical accuracy validation failed: {}", .violations.join("; "))]
    ClinicalAccuracy {
        /// Itemized violated rules
        violations: Vec<String>,
    },

    /// Renderer failure or structural validation failure.
    #[error("{format} generation failed: {message}")]
    Generation {
        /// Requested format
        format: ExportFormat,
        /// What went wrong
        message: String,
        /// Itemized validation errors
        #[serde(default)]
        details: Vec<String>,
    },

    /// Secure-file creation failed.
    #[error("encryption failed: {message}")]
    Encryption {
        /// What went wrong
        message: String,
    },

    /// The pipeline exceeded its time budget.
    #[error("export timed out after {elapsed_secs}s")]
    Timeout {
        /// Elapsed seconds
        elapsed_secs: u64,
    },

    /// Sharing failed for an emergency recipient. The fallback protocol has
    /// already been triggered when this is reported.
    #[error("emergency delivery failed: {message}")]
    EmergencyDelivery {
        /// What went wrong
        message: String,
        /// Whether the fallback protocol ran
        fallback_activated: bool,
    },

    /// Delivery to a non-emergency recipient failed.
    #[error("delivery to {recipient} failed: {message}")]
    Delivery {
        /// Intended recipient
        recipient: RecipientType,
        /// What went wrong
        message: String,
    },

    /// Malformed request.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Storage read failed.
    #[error("storage error reading {category}: {message}")]
    Storage {
        /// Category being read
        category: DataCategory,
        /// What went wrong
        message: String,
    },

    /// The export was cancelled.
    #[error("export cancelled")]
    Cancelled,

    /// Export id already running or registered.
    #[error("state conflict: {0}")]
    Conflict(String),

    /// Export or artifact not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ExportError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::ConsentValidation { .. } => error_codes::CONSENT_VALIDATION,
            ExportError::ClinicalAccuracy { .. } => error_codes::CLINICAL_ACCURACY,
            ExportError::Generation { .. } => error_codes::GENERATION,
            ExportError::Encryption { .. } => error_codes::ENCRYPTION,
            ExportError::Timeout { .. } => error_codes::TIMEOUT,
            ExportError::EmergencyDelivery { .. } => error_codes::EMERGENCY_DELIVERY,
            ExportError::Delivery { .. } => error_codes::DELIVERY,
            ExportError::Validation(_) => error_codes::VALIDATION,
            ExportError::Storage { .. } => error_codes::STORAGE,
            ExportError::Cancelled => error_codes::CANCELLED,
            ExportError::Conflict(_) => error_codes::STATE_CONFLICT,
            ExportError::NotFound(_) => error_codes::NOT_FOUND,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ExportError::Generation { .. }
                | ExportError::Timeout { .. }
                | ExportError::Storage { .. }
                | ExportError::Encryption { .. }
                | ExportError::Delivery { .. }
                | ExportError::Cancelled
        )
    }

    /// User-facing hint.
    pub fn hint(&self) -> String {
        match self {
            ExportError::ConsentValidation {
                required_consents, ..
            } => {
                let list: Vec<_> = required_consents.iter().map(|c| c.as_str()).collect();
                format!("Review and renew consent for: {}", list.join(", "))
            }
            ExportError::ClinicalAccuracy { .. } => {
                "The data failed clinical checks. A personal-record export can be produced if you opt in."
                    .to_string()
            }
            ExportError::Generation { .. } => "The report could not be generated. Please retry.".to_string(),
            ExportError::Encryption { .. } => {
                "The file could not be secured and will not be shared with providers or researchers."
                    .to_string()
            }
            ExportError::Timeout { .. } => {
                "The export took too long. Retry with a narrower time range.".to_string()
            }
            ExportError::EmergencyDelivery { .. } => {
                "Emergency contact protocol has been started.".to_string()
            }
            ExportError::Delivery { .. } => {
                "The file could not be delivered. Check the recipient details and retry.".to_string()
            }
            ExportError::Validation(_) => "Check the export options and try again.".to_string(),
            ExportError::Storage { .. } => "Your data could not be read. Please retry.".to_string(),
            ExportError::Cancelled => "The export was cancelled.".to_string(),
            ExportError::Conflict(_) => "An export with this id is already in progress.".to_string(),
            ExportError::NotFound(_) => "The export could not be found.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consent_hint_lists_required_categories() {
        let err = ExportError::ConsentValidation {
            message: "expired".to_string(),
            required_consents: vec![DataCategory::Assessments, DataCategory::CrisisSafety],
        };
        assert_eq!(err.code(), error_codes::CONSENT_VALIDATION);
        assert!(err.hint().contains("assessments, crisis-safety"));
        assert!(!err.retryable());
    }

    #[test]
    fn test_generation_errors_are_retryable() {
        let err = ExportError::Generation {
            format: ExportFormat::Csv,
            message: "empty file".to_string(),
            details: vec![],
        };
        assert!(err.retryable());
        assert_eq!(err.to_string(), "CSV generation failed: empty file");
    }

    #[test]
    fn test_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(ExportError::Cancelled).unwrap();
        assert_eq!(json["kind"], "cancelled");
    }
}
