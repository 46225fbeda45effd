//! Data categories and recipient types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A category of therapeutic data that can be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataCategory {
    /// PHQ-9 / GAD-7 questionnaire results
    Assessments,
    /// Daily mood check-ins
    MoodTracking,
    /// MBCT session and practice logs
    MbctProgress,
    /// Crisis assessments and safety plans
    CrisisSafety,
}

impl DataCategory {
    /// Every category, in export order.
    pub const ALL: [DataCategory; 4] = [
        DataCategory::Assessments,
        DataCategory::MoodTracking,
        DataCategory::MbctProgress,
        DataCategory::CrisisSafety,
    ];

    /// Wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataCategory::Assessments => "assessments",
            DataCategory::MoodTracking => "mood-tracking",
            DataCategory::MbctProgress => "mbct-progress",
            DataCategory::CrisisSafety => "crisis-safety",
        }
    }

    /// Whether this category carries crisis / safety-plan content.
    pub fn is_crisis(&self) -> bool {
        matches!(self, DataCategory::CrisisSafety)
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assessments" => Ok(DataCategory::Assessments),
            "mood-tracking" | "mood" => Ok(DataCategory::MoodTracking),
            "mbct-progress" | "sessions" => Ok(DataCategory::MbctProgress),
            "crisis-safety" | "crisis" => Ok(DataCategory::CrisisSafety),
            other => Err(format!("unknown data category: {}", other)),
        }
    }
}

/// Who an export is shared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecipientType {
    /// A credentialed clinician
    HealthcareProvider,
    /// The user themselves
    Personal,
    /// A research study
    Research,
    /// Emergency contact or crisis service
    Emergency,
}

impl RecipientType {
    /// Whether artifacts for this recipient must be encrypted before delivery.
    pub fn requires_encryption(&self) -> bool {
        matches!(self, RecipientType::HealthcareProvider | RecipientType::Research)
    }
}

impl fmt::Display for RecipientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientType::HealthcareProvider => write!(f, "healthcare-provider"),
            RecipientType::Personal => write!(f, "personal"),
            RecipientType::Research => write!(f, "research"),
            RecipientType::Emergency => write!(f, "emergency"),
        }
    }
}
