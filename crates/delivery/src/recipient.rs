//! Recipient metadata and per-type preconditions.

use crate::error::{DeliveryError, Result};
use clinexport_core::{EmergencyContact, RecipientType, Time, UserId};
use serde::{Deserialize, Serialize};

/// Credentials presented by a healthcare provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    /// Professional license number
    pub license_number: String,
    /// Whether the credentials were verified upstream
    pub verified: bool,
}

/// Research participation consent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConsent {
    /// Study the consent was given for
    pub study_id: String,
    /// When it was given
    pub granted_at: Time,
    /// Withdrawn since
    #[serde(default)]
    pub revoked: bool,
}

/// Who an artifact is shared with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "recipient", rename_all = "kebab-case")]
pub enum RecipientMetadata {
    /// A clinician or practice
    HealthcareProvider {
        /// Provider id
        provider_id: String,
        /// Presented credentials
        credentials: Option<ProviderCredentials>,
    },
    /// The user themself
    Personal {
        /// Owner of the export
        user_id: UserId,
    },
    /// A research study
    Research {
        /// Study id
        study_id: String,
        /// Participation consent
        consent: Option<ResearchConsent>,
    },
    /// An emergency contact
    Emergency {
        /// Contact to reach
        contact: EmergencyContact,
    },
}

impl RecipientMetadata {
    /// Recipient type.
    pub fn recipient_type(&self) -> RecipientType {
        match self {
            RecipientMetadata::HealthcareProvider { .. } => RecipientType::HealthcareProvider,
            RecipientMetadata::Personal { .. } => RecipientType::Personal,
            RecipientMetadata::Research { .. } => RecipientType::Research,
            RecipientMetadata::Emergency { .. } => RecipientType::Emergency,
        }
    }

    /// Destination label used for routing, never containing contact details.
    pub fn destination(&self) -> String {
        match self {
            RecipientMetadata::HealthcareProvider { provider_id, .. } => {
                format!("provider-{}", provider_id)
            }
            RecipientMetadata::Personal { user_id } => format!("personal-{}", user_id),
            RecipientMetadata::Research { study_id, .. } => format!("research-{}", study_id),
            RecipientMetadata::Emergency { .. } => "emergency".to_string(),
        }
    }

    /// Check the precondition for this recipient type: verified credentials
    /// for providers, a live matching consent for research. Personal and
    /// emergency recipients have none.
    pub fn validate(&self) -> Result<()> {
        match self {
            RecipientMetadata::HealthcareProvider { credentials, .. } => match credentials {
                Some(c) if c.verified && !c.license_number.trim().is_empty() => Ok(()),
                Some(_) => Err(DeliveryError::Precondition(
                    "provider credentials are not verified".to_string(),
                )),
                None => Err(DeliveryError::Precondition(
                    "provider credentials are required".to_string(),
                )),
            },
            RecipientMetadata::Research { study_id, consent } => match consent {
                Some(c) if !c.revoked && &c.study_id == study_id => Ok(()),
                Some(_) => Err(DeliveryError::Precondition(
                    "research consent is revoked or for another study".to_string(),
                )),
                None => Err(DeliveryError::Precondition(
                    "research consent is required".to_string(),
                )),
            },
            RecipientMetadata::Personal { .. } | RecipientMetadata::Emergency { .. } => Ok(()),
        }
    }
}
