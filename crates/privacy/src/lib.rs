//! Privacy & consent filtering.
//!
//! Consent validation, category pruning and the anonymization transforms
//! (pseudonymization, temporal shifting, generalization, noise injection)
//! applied to raw records before they reach the clinical transformer.

#![warn(missing_docs)]

pub mod consent;
pub mod anonymize;
pub mod filter;

pub use consent::{ConsentValidator, PrivacyError, Result};
pub use anonymize::AnonymizationContext;
pub use filter::{FilteredData, PrivacyFilter, RetrievalPlan};
