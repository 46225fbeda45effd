//! Clinical Data Transformer.
//!
//! Turns filtered raw records into the canonical [`ClinicalExportData`]
//! shape, scores standardized questionnaires and validates the result
//! against clinical accuracy rules.
//!
//! [`ClinicalExportData`]: clinexport_core::ClinicalExportData

#![warn(missing_docs)]

pub mod scoring;
pub mod validation;
pub mod transformer;

pub use scoring::{crisis_level, severity_band, suicidal_ideation, QuestionnaireScore};
pub use validation::{
    ClinicalAccuracyValidation, ClinicalRule, ClinicalValidator, RuleViolation, ValidationLimits,
};
pub use transformer::{ClinicalDataTransformer, TransformOutput};
