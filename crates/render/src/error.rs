//! Render errors.

/// Result alias for rendering.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Errors raised while producing an artifact.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The render engine failed
    #[error("render engine error: {0}")]
    Engine(String),

    /// The artifact failed integrity checks
    #[error("integrity check failed: {0}")]
    Integrity(String),
}
