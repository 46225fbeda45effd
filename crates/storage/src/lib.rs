//! Data access adapters for the clinical export pipeline.
//!
//! This crate provides read-only accessors over three storage classes (an
//! async key-value store, a reactive state store and an encrypted secure
//! store) and a JSON file backend that can play any of them.

#![warn(missing_docs)]

pub mod trait_;
pub mod adapter;
pub mod memory;
pub mod json_storage;

pub use trait_::{KeyValueStore, SecureStore, StateStore, StorageClass, StorageError, Result};
pub use adapter::{
    keys, AssessmentDataResult, CategoryEstimate, ClinicalDataSource, CrisisHistoryResult,
    MbctProgressResult, MoodTrackingResult, Snapshot, StoreBackedDataSource,
};
pub use memory::{InMemorySecureStore, InMemoryStateStore, InMemoryKeyValueStore};
pub use json_storage::JsonStorage;
