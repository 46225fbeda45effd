//! Export Orchestrator.
//!
//! Sequences validation, retrieval, privacy filtering, clinical
//! transformation, rendering, integrity checks and encryption for each
//! export request, tracking progress in an operation registry. Every stage
//! failure comes back as a well-formed [`ExportOperationResult`].
//!
//! [`ExportOperationResult`]: clinexport_core::ExportOperationResult

#![warn(missing_docs)]

pub mod config;
pub mod artifact;
pub mod retrieval;
pub mod sweep;
pub mod orchestrator;

pub use config::ExportConfig;
pub use artifact::TempArtifact;
pub use retrieval::{RetrievalOutcome, RetryPolicy};
pub use sweep::{sweep_expired_artifacts, SweepReport};
pub use orchestrator::{DownloadedArtifact, ExportOrchestrator};
