//! Format renderers for clinical exports.
//!
//! Both renderers consume [`ClinicalExportData`] only and are pure with
//! respect to it: PDF output varies solely in its creation-date field and
//! CSV output not at all. Each renderer re-validates what it produced
//! before reporting a [`GenerationResult`].
//!
//! [`ClinicalExportData`]: clinexport_core::ClinicalExportData
//! [`GenerationResult`]: clinexport_core::GenerationResult

#![warn(missing_docs)]

pub mod error;
pub mod document;
pub mod engine;
pub mod pdf;
pub mod csv_export;
pub mod integrity;

pub use error::{RenderError, Result};
pub use document::{Block, DocumentContent, Rgb, Section, StyleConfig};
pub use engine::{RenderEngine, RenderedArtifact, TextPdfEngine};
pub use pdf::{validate_pdf_structure, PdfReportRenderer};
pub use csv_export::{validate_csv_integrity, CsvExporter};
pub use integrity::{sha256_hex, verify_artifact, IntegrityReport};

use async_trait::async_trait;
use clinexport_core::{ClinicalExportData, ExportFormat, GenerationResult, RenderOptions};
use std::path::Path;

/// A renderer for one export format.
#[async_trait]
pub trait FormatRenderer: Send + Sync {
    /// Format produced.
    fn format(&self) -> ExportFormat;

    /// Render `data` to `output` and validate the written artifact.
    async fn render(
        &self,
        data: &ClinicalExportData,
        options: &RenderOptions,
        output: &Path,
    ) -> Result<GenerationResult>;
}
