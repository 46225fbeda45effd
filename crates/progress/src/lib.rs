//! Export operation state tracking.
//!
//! Keeps one [`ExportOperationState`](clinexport_core::ExportOperationState)
//! per export id, enforces at-most-one registration, keeps progress
//! monotonic and notifies subscribers on every change.

#![warn(missing_docs)]

pub mod error;
pub mod registry;

pub use error::{ProgressError, Result};
pub use registry::{InMemoryOperationRegistry, OperationRegistry, ProgressCallback, StateFilter};
