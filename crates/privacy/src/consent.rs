//! Consent validation.

use clinexport_core::{
    AnonymizationLevel, DataCategory, ExportError, ExportPurpose, PrivacyConfiguration,
    RecipientType, Time, UserConsentRecord, UserId,
};
use std::collections::BTreeSet;

/// Error type for consent validation.
pub type Result<T> = std::result::Result<T, PrivacyError>;

/// Reasons a consent record cannot authorize an export.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PrivacyError {
    /// Consent belongs to someone else
    #[error("consent belongs to a different user")]
    UserMismatch,

    /// Consent was withdrawn
    #[error("consent has been revoked")]
    Revoked,

    /// Consent lapsed
    #[error("consent expired at {expired_at}")]
    Expired {
        /// Expiry time
        expired_at: Time,
    },

    /// Consent granted in the future
    #[error("consent is not yet in effect")]
    NotYetValid,

    /// Consent carries no signature
    #[error("consent record is not signed")]
    Unsigned,

    /// Recipient implied by the purpose is not approved
    #[error("consent does not approve sharing with {0}")]
    RecipientNotApproved(RecipientType),

    /// Privacy configuration conflicts with the purpose
    #[error("privacy configuration incompatible with request: {0}")]
    IncompatiblePrivacy(String),
}

impl PrivacyError {
    /// Convert into the export taxonomy, listing the categories that need
    /// fresh consent.
    pub fn into_export_error(self, requested: &BTreeSet<DataCategory>) -> ExportError {
        match self {
            PrivacyError::IncompatiblePrivacy(message) => ExportError::Validation(message),
            other => ExportError::ConsentValidation {
                message: other.to_string(),
                required_consents: requested.iter().copied().collect(),
            },
        }
    }
}

/// Validates a consent record against a request.
#[derive(Debug, Default, Clone)]
pub struct ConsentValidator;

impl ConsentValidator {
    /// Create a validator.
    pub fn new() -> Self {
        Self
    }

    /// Validate consent and privacy compatibility. Category coverage is not
    /// checked here: uncovered categories are omitted by the filter.
    pub fn validate(
        &self,
        consent: &UserConsentRecord,
        user_id: &UserId,
        privacy: &PrivacyConfiguration,
        purpose: ExportPurpose,
        now: Time,
    ) -> Result<()> {
        if &consent.user_id != user_id {
            return Err(PrivacyError::UserMismatch);
        }
        if consent.revoked {
            return Err(PrivacyError::Revoked);
        }
        if let Some(expired_at) = consent.expires_at {
            if now >= expired_at {
                return Err(PrivacyError::Expired { expired_at });
            }
        }
        if consent.granted_at > now {
            return Err(PrivacyError::NotYetValid);
        }
        if consent
            .signature
            .as_deref()
            .map_or(true, |s| s.trim().is_empty())
        {
            return Err(PrivacyError::Unsigned);
        }

        let recipient = purpose.recipient();
        if recipient != RecipientType::Emergency && !consent.approves(recipient) {
            return Err(PrivacyError::RecipientNotApproved(recipient));
        }

        if purpose == ExportPurpose::Research
            && privacy.anonymization.level != AnonymizationLevel::ResearchGrade
        {
            return Err(PrivacyError::IncompatiblePrivacy(format!(
                "research exports require research-grade anonymization, got {}",
                privacy.anonymization.level
            )));
        }

        Ok(())
    }
}
