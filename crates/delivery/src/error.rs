//! Delivery errors.

use clinexport_core::{ExportError, RecipientType};

/// Result alias for delivery.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised while securing or sharing an artifact.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed or the ciphertext was tampered with
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Key material is malformed
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The recipient's precondition does not hold
    #[error("recipient precondition failed: {0}")]
    Precondition(String),

    /// The recipient requires an encrypted artifact
    #[error("{0} delivery requires an encrypted artifact")]
    EncryptionRequired(RecipientType),

    /// There is nothing to deliver
    #[error("no artifact to deliver")]
    MissingArtifact,

    /// The transport failed
    #[error("transport failed: {0}")]
    Transport(String),

    /// Emergency delivery failed
    #[error("emergency delivery failed: {message}")]
    EmergencyDelivery {
        /// What went wrong
        message: String,
        /// Whether the emergency protocol ran successfully
        fallback_activated: bool,
    },
}

impl DeliveryError {
    /// Convert into the export taxonomy.
    pub fn into_export_error(self, recipient: RecipientType) -> ExportError {
        match self {
            DeliveryError::Encryption(message) | DeliveryError::InvalidKey(message) => {
                ExportError::Encryption { message }
            }
            DeliveryError::EncryptionRequired(r) => ExportError::Encryption {
                message: format!("delivery to {} blocked: artifact is not encrypted", r),
            },
            DeliveryError::EmergencyDelivery {
                message,
                fallback_activated,
            } => ExportError::EmergencyDelivery {
                message,
                fallback_activated,
            },
            DeliveryError::Precondition(message) => ExportError::Validation(message),
            other => ExportError::Delivery {
                recipient,
                message: other.to_string(),
            },
        }
    }
}
