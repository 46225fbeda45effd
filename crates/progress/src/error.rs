//! Registry errors.

use clinexport_core::{ExportError, ExportId, ExportStatus};

/// Result alias for the registry.
pub type Result<T> = std::result::Result<T, ProgressError>;

/// Errors raised by the operation registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgressError {
    /// The export id is already registered
    #[error("export {0} is already registered")]
    Conflict(ExportId),

    /// No state for the export id
    #[error("export {0} not found")]
    NotFound(ExportId),

    /// The export already finished
    #[error("export {id} is already {status}")]
    Terminal {
        /// Export id
        id: ExportId,
        /// Final status
        status: ExportStatus,
    },
}

impl From<ProgressError> for ExportError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::NotFound(id) => ExportError::NotFound(id.to_string()),
            other => ExportError::Conflict(other.to_string()),
        }
    }
}
