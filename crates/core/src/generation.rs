//! Render outputs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Structural and accessibility validation of a generated artifact.
/// Every flag is a gate: any `false` makes the artifact unusable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationValidation {
    /// Well-formed container (non-empty, expected markers / uniform rows)
    pub structure_valid: bool,
    /// Declared data types parse
    pub data_types_valid: bool,
    /// No truncation, valid encoding, size matches
    pub integrity_maintained: bool,
    /// Contrast and alt-text requirements met (always true for CSV)
    pub accessibility_compliant: bool,
    /// Itemized problems
    pub errors: Vec<String>,
}

impl GenerationValidation {
    /// A validation with every gate passed.
    pub fn passed() -> Self {
        Self {
            structure_valid: true,
            data_types_valid: true,
            integrity_maintained: true,
            accessibility_compliant: true,
            errors: Vec::new(),
        }
    }

    /// Whether every gate passed.
    pub fn is_valid(&self) -> bool {
        self.structure_valid
            && self.data_types_valid
            && self.integrity_maintained
            && self.accessibility_compliant
    }
}

/// Result of one render call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Where the artifact was written
    pub file_path: PathBuf,
    /// Size in bytes
    pub file_size: u64,
    /// Records rendered
    pub record_count: usize,
    /// Pages rendered (PDF only)
    pub page_count: Option<usize>,
    /// Time spent rendering, in milliseconds
    pub generation_time_ms: u64,
    /// Validation of the artifact
    pub validation: GenerationValidation,
}

/// Encryption outcome of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum EncryptionState {
    /// Encryption not requested
    NotRequested,
    /// Artifact encrypted at rest
    Encrypted {
        /// Base64 key needed to decrypt
        key: String,
    },
    /// Encryption was requested but failed; delivery to recipients
    /// requiring encryption is blocked
    UnencryptedUnsafe {
        /// Failure reason
        reason: String,
    },
}

impl EncryptionState {
    /// Whether the artifact is encrypted.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, EncryptionState::Encrypted { .. })
    }
}

/// Final artifact of a completed export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportArtifact {
    /// Path of the deliverable file
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// SHA-256 of the rendered (pre-encryption) content, hex
    pub checksum: String,
    /// Encryption outcome
    pub encryption: EncryptionState,
    /// Token required to download the artifact
    pub access_token: Option<String>,
}
