//! Privacy configuration attached to an export request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How strongly exported data is de-identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnonymizationLevel {
    /// No anonymization; consent pruning only
    None,
    /// Pseudonymized identifiers and shifted timestamps
    Standard,
    /// Standard plus generalized timestamps and free text removal
    Advanced,
    /// Advanced plus statistical noise; crisis data coarsened
    ResearchGrade,
}

impl fmt::Display for AnonymizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnonymizationLevel::None => write!(f, "none"),
            AnonymizationLevel::Standard => write!(f, "standard"),
            AnonymizationLevel::Advanced => write!(f, "advanced"),
            AnonymizationLevel::ResearchGrade => write!(f, "research-grade"),
        }
    }
}

/// Anonymization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizationConfig {
    /// Overall level
    pub level: AnonymizationLevel,
    /// Replace direct identifiers with a per-export pseudonym
    #[serde(default = "default_true")]
    pub identifier_replacement: bool,
    /// Shift timestamps by a per-export offset
    #[serde(default = "default_true")]
    pub temporal_shifting: bool,
    /// Inject bounded noise into non-crisis numeric scores
    #[serde(default)]
    pub noise_addition: bool,
}

fn default_true() -> bool {
    true
}

impl AnonymizationConfig {
    /// Configuration for a level with that level's default switches.
    pub fn at_level(level: AnonymizationLevel) -> Self {
        Self {
            level,
            identifier_replacement: true,
            temporal_shifting: true,
            noise_addition: level == AnonymizationLevel::ResearchGrade,
        }
    }
}

impl Default for AnonymizationConfig {
    fn default() -> Self {
        Self::at_level(AnonymizationLevel::None)
    }
}

/// Access level presented to the crisis-history gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    /// No access to crisis history
    Restricted,
    /// Clinician-level access
    Clinical,
    /// Crisis responder access
    Emergency,
}

/// Access controls for the export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessControls {
    /// Level used when reading crisis history
    pub access_level: AccessLevel,
    /// Require an access token for download
    #[serde(default = "default_true")]
    pub require_download_token: bool,
}

impl Default for AccessControls {
    fn default() -> Self {
        Self {
            access_level: AccessLevel::Clinical,
            require_download_token: true,
        }
    }
}

/// Encryption requirement for the produced artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptionRequirement {
    /// Encrypt the artifact at rest before delivery
    pub required: bool,
}

/// Retention of generated artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Hours before the artifact is swept
    pub artifact_ttl_hours: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { artifact_ttl_hours: 24 }
    }
}

/// Audit requirements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRequirements {
    /// Record download attempts in the audit log
    pub log_access: bool,
}

impl Default for AuditRequirements {
    fn default() -> Self {
        Self { log_access: true }
    }
}

/// Privacy configuration: decides what is fetched and how it is transformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivacyConfiguration {
    /// Drop free-text fields that are not needed clinically
    #[serde(default)]
    pub data_minimization: bool,
    /// Anonymization settings
    #[serde(default)]
    pub anonymization: AnonymizationConfig,
    /// Encryption requirement
    #[serde(default)]
    pub encryption: EncryptionRequirement,
    /// Access controls
    #[serde(default)]
    pub access_controls: AccessControls,
    /// Retention policy
    #[serde(default)]
    pub retention_policy: RetentionPolicy,
    /// Audit requirements
    #[serde(default)]
    pub audit_requirements: AuditRequirements,
}

impl PrivacyConfiguration {
    /// Privacy configuration at a given anonymization level.
    pub fn with_level(level: AnonymizationLevel) -> Self {
        Self {
            anonymization: AnonymizationConfig::at_level(level),
            ..Default::default()
        }
    }

    /// Whether identifiers are replaced by a pseudonym.
    pub fn replaces_identifiers(&self) -> bool {
        self.anonymization.level >= AnonymizationLevel::Standard
            && self.anonymization.identifier_replacement
    }

    /// Whether timestamps are shifted.
    pub fn shifts_time(&self) -> bool {
        self.anonymization.level >= AnonymizationLevel::Standard
            && self.anonymization.temporal_shifting
    }

    /// Whether timestamps are truncated and free text dropped.
    pub fn generalizes(&self) -> bool {
        self.anonymization.level >= AnonymizationLevel::Advanced
    }

    /// Whether noise is added to non-crisis scores.
    pub fn adds_noise(&self) -> bool {
        match self.anonymization.level {
            AnonymizationLevel::ResearchGrade => true,
            AnonymizationLevel::Advanced => self.anonymization.noise_addition,
            _ => false,
        }
    }

    /// Whether crisis content is reduced to coarse risk categories.
    pub fn coarsens_crisis(&self) -> bool {
        self.anonymization.level == AnonymizationLevel::ResearchGrade
    }
}
