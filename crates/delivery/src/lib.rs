//! Secure delivery of export artifacts.
//!
//! Encrypts artifacts, issues download tokens, validates recipients and
//! shares files through a pluggable transport. Every share attempt is
//! written to an append-only audit log; emergency deliveries that fail
//! always trigger the emergency protocol.

#![warn(missing_docs)]

pub mod error;
pub mod encryption;
pub mod token;
pub mod audit;
pub mod recipient;
pub mod transport;
pub mod sharing;

pub use error::{DeliveryError, Result};
pub use encryption::{ArtifactEncryptor, EncryptionKey, ENCRYPTED_EXTENSION};
pub use token::TokenIssuer;
pub use audit::{AuditAction, AuditEntry, AuditLog};
pub use recipient::{ProviderCredentials, RecipientMetadata, ResearchConsent};
pub use transport::{EmergencyProtocol, FileDropTransport, LoggingEmergencyProtocol, SharingTransport};
pub use sharing::{SecureSharingService, SharingResult};
