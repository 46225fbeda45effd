//! User consent record.

use crate::category::{DataCategory, RecipientType};
use crate::id::UserId;
use crate::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A signed, timestamped statement of which categories and recipients a
/// user has approved for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConsentRecord {
    /// User the consent belongs to
    pub user_id: UserId,

    /// Categories the user agreed to share
    pub granted_categories: BTreeSet<DataCategory>,

    /// Recipient types the user agreed to share with
    pub approved_recipients: BTreeSet<RecipientType>,

    /// When consent was given
    pub granted_at: Time,

    /// When consent lapses (None = until revoked)
    #[serde(default)]
    pub expires_at: Option<Time>,

    /// Whether the user has withdrawn this consent
    #[serde(default)]
    pub revoked: bool,

    /// Signature over the consent payload
    #[serde(default)]
    pub signature: Option<String>,
}

impl UserConsentRecord {
    /// Create a consent record granted now with no expiry.
    pub fn new(user_id: UserId, categories: impl IntoIterator<Item = DataCategory>) -> Self {
        Self {
            user_id,
            granted_categories: categories.into_iter().collect(),
            approved_recipients: BTreeSet::new(),
            granted_at: chrono::Utc::now(),
            expires_at: None,
            revoked: false,
            signature: None,
        }
    }

    /// Approve a recipient type.
    pub fn with_recipient(mut self, recipient: RecipientType) -> Self {
        self.approved_recipients.insert(recipient);
        self
    }

    /// Set an expiry.
    pub fn with_expiry(mut self, expires_at: Time) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Attach a signature.
    pub fn signed(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Whether the consent has lapsed at `now`.
    pub fn is_expired(&self, now: Time) -> bool {
        self.expires_at.map_or(false, |expiry| now >= expiry)
    }

    /// Whether the consent is usable at `now`.
    pub fn is_active(&self, now: Time) -> bool {
        !self.revoked && !self.is_expired(now) && now >= self.granted_at
    }

    /// Whether the consent covers a category.
    pub fn covers(&self, category: DataCategory) -> bool {
        self.granted_categories.contains(&category)
    }

    /// Whether the consent approves a recipient type.
    pub fn approves(&self, recipient: RecipientType) -> bool {
        self.approved_recipients.contains(&recipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_expired_consent_is_inactive() {
        let now = Utc::now();
        let mut consent = UserConsentRecord::new(UserId::new("u1"), [DataCategory::Assessments]);
        consent.granted_at = now - Duration::days(10);
        consent.expires_at = Some(now - Duration::days(1));
        assert!(consent.is_expired(now));
        assert!(!consent.is_active(now));
    }

    #[test]
    fn test_revoked_consent_is_inactive() {
        let mut consent = UserConsentRecord::new(UserId::new("u1"), [DataCategory::Assessments]);
        consent.revoked = true;
        assert!(!consent.is_active(Utc::now()));
    }

    #[test]
    fn test_covers_only_granted_categories() {
        let consent = UserConsentRecord::new(UserId::new("u1"), [DataCategory::MoodTracking]);
        assert!(consent.covers(DataCategory::MoodTracking));
        assert!(!consent.covers(DataCategory::Assessments));
    }
}
