//! Clinical accuracy validation.

use crate::scoring::{crisis_level, MAX_ITEM_SCORE};
use clinexport_core::{
    AssessmentRecord, CrisisRecord, ExportError, MoodEntry, SessionRecord, Time,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance for comparing a stored total with the item sum.
pub const SCORE_TOLERANCE: f64 = 1e-3;

/// A clinical accuracy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClinicalRule {
    /// Total equals the sum of item scores
    ScoreMatchesItems,
    /// A total is stored alongside the answers
    TotalPresent,
    /// Answer count matches the questionnaire
    ItemCount,
    /// Every answer is within the item range
    ItemRange,
    /// Stored crisis flag agrees with the clinical cutoffs
    CrisisThreshold,
    /// Every record carries a timestamp
    TimestampPresent,
    /// Session durations are non-negative and bounded
    SessionDuration,
    /// Mood, energy and anxiety lie on the 1..=10 scale
    MoodScale,
}

impl ClinicalRule {
    /// Whether a violation of this rule blocks a clinically valid export.
    /// Scale drift on self-reported mood is reported but does not block,
    /// and neither is a missing total, which is scored from the answers.
    pub fn is_blocking(&self) -> bool {
        !matches!(self, ClinicalRule::MoodScale | ClinicalRule::TotalPresent)
    }
}

impl fmt::Display for ClinicalRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClinicalRule::ScoreMatchesItems => "score-matches-items",
            ClinicalRule::TotalPresent => "total-present",
            ClinicalRule::ItemCount => "item-count",
            ClinicalRule::ItemRange => "item-range",
            ClinicalRule::CrisisThreshold => "crisis-threshold",
            ClinicalRule::TimestampPresent => "timestamp-present",
            ClinicalRule::SessionDuration => "session-duration",
            ClinicalRule::MoodScale => "mood-scale",
        };
        f.write_str(name)
    }
}

/// A rule broken by one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleViolation {
    /// Rule broken
    pub rule: ClinicalRule,
    /// Offending record (as exported, so pseudonymized when anonymized)
    pub record_id: String,
    /// Description without clinical values
    pub message: String,
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.rule, self.record_id, self.message)
    }
}

/// Outcome of validating a whole export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalAccuracyValidation {
    /// No blocking violation found
    pub clinically_valid: bool,
    /// Every violation, blocking or not
    pub violations: Vec<RuleViolation>,
}

impl ClinicalAccuracyValidation {
    /// Build from a list of violations.
    pub fn from_violations(violations: Vec<RuleViolation>) -> Self {
        Self {
            clinically_valid: !violations.iter().any(|v| v.rule.is_blocking()),
            violations,
        }
    }

    /// Blocking violations only.
    pub fn blocking(&self) -> impl Iterator<Item = &RuleViolation> {
        self.violations.iter().filter(|v| v.rule.is_blocking())
    }

    /// Convert into an export error.
    pub fn to_error(&self) -> ExportError {
        ExportError::ClinicalAccuracy {
            violations: self.blocking().map(|v| v.to_string()).collect(),
        }
    }
}

/// Configurable bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationLimits {
    /// Longest plausible session, in minutes
    pub max_session_minutes: f64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_session_minutes: 240.0,
        }
    }
}

/// Per-record clinical rules.
#[derive(Debug, Clone, Default)]
pub struct ClinicalValidator {
    limits: ValidationLimits,
}

impl ClinicalValidator {
    /// Create a validator with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom limits.
    pub fn with_limits(mut self, limits: ValidationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Check a questionnaire.
    pub fn check_assessment(&self, record: &AssessmentRecord) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        let id = &record.id;

        let expected = record.kind.item_count();
        if record.answers.len() != expected {
            violations.push(violation(
                ClinicalRule::ItemCount,
                id,
                format!(
                    "{} expects {} items, found {}",
                    record.kind.label(),
                    expected,
                    record.answers.len()
                ),
            ));
        }
        if record.answers.iter().any(|a| *a > MAX_ITEM_SCORE) {
            violations.push(violation(
                ClinicalRule::ItemRange,
                id,
                format!("item answers must lie in 0..={}", MAX_ITEM_SCORE),
            ));
        }

        let item_sum: f64 = record.answers.iter().map(|a| f64::from(*a)).sum();
        let total = match record.total_score {
            Some(total) => {
                if (total - item_sum).abs() > SCORE_TOLERANCE {
                    violations.push(violation(
                        ClinicalRule::ScoreMatchesItems,
                        id,
                        "stored total differs from the sum of item scores".to_string(),
                    ));
                }
                total
            }
            None => {
                violations.push(violation(
                    ClinicalRule::TotalPresent,
                    id,
                    "no stored total; scored from item answers".to_string(),
                ));
                item_sum
            }
        };

        if let Some(stored) = record.crisis_flag {
            if stored != crisis_level(record.kind, total, &record.answers) {
                violations.push(violation(
                    ClinicalRule::CrisisThreshold,
                    id,
                    "stored crisis flag disagrees with clinical cutoffs".to_string(),
                ));
            }
        }

        check_timestamp(&mut violations, id, record.completed_at);
        violations
    }

    /// Check a mood check-in.
    pub fn check_mood(&self, record: &MoodEntry) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        let on_scale = |v: f64| (1.0..=10.0).contains(&v);
        let scales = [Some(record.mood), record.energy, record.anxiety];
        if scales.iter().flatten().any(|v| !on_scale(*v)) {
            violations.push(violation(
                ClinicalRule::MoodScale,
                &record.id,
                "mood scale values must lie in 1..=10".to_string(),
            ));
        }
        check_timestamp(&mut violations, &record.id, record.recorded_at);
        violations
    }

    /// Check an MBCT session.
    pub fn check_session(&self, record: &SessionRecord) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        let minutes = record.duration_minutes;
        if !minutes.is_finite() || minutes < 0.0 || minutes > self.limits.max_session_minutes {
            violations.push(violation(
                ClinicalRule::SessionDuration,
                &record.id,
                format!(
                    "duration must lie in 0..={} minutes",
                    self.limits.max_session_minutes
                ),
            ));
        }
        check_timestamp(&mut violations, &record.id, record.started_at);
        violations
    }

    /// Check a crisis assessment.
    pub fn check_crisis(&self, record: &CrisisRecord) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        check_timestamp(&mut violations, &record.id, record.recorded_at);
        violations
    }
}

fn violation(rule: ClinicalRule, record_id: &str, message: String) -> RuleViolation {
    RuleViolation {
        rule,
        record_id: record_id.to_string(),
        message,
    }
}

fn check_timestamp(violations: &mut Vec<RuleViolation>, id: &str, timestamp: Option<Time>) {
    if timestamp.is_none() {
        violations.push(violation(
            ClinicalRule::TimestampPresent,
            id,
            "record has no timestamp".to_string(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clinexport_core::{AssessmentKind, UserId};

    fn phq9(answers: Vec<u8>) -> AssessmentRecord {
        AssessmentRecord {
            id: "a1".to_string(),
            user_id: UserId::new("u1"),
            kind: AssessmentKind::Phq9,
            total_score: Some(answers.iter().map(|a| f64::from(*a)).sum()),
            answers,
            crisis_flag: None,
            completed_at: Some(Utc::now()),
        }
    }

    fn rules(violations: &[RuleViolation]) -> Vec<ClinicalRule> {
        violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn test_clean_assessment_passes() {
        let validator = ClinicalValidator::new();
        assert!(validator.check_assessment(&phq9(vec![1; 9])).is_empty());
    }

    #[test]
    fn test_total_mismatch_and_missing_timestamp() {
        let mut record = phq9(vec![1; 9]);
        record.total_score = Some(12.0);
        record.completed_at = None;
        let violations = ClinicalValidator::new().check_assessment(&record);
        assert_eq!(
            rules(&violations),
            vec![ClinicalRule::ScoreMatchesItems, ClinicalRule::TimestampPresent]
        );
    }

    #[test]
    fn test_total_within_tolerance_passes() {
        let mut record = phq9(vec![1; 9]);
        record.total_score = Some(9.0005);
        assert!(ClinicalValidator::new().check_assessment(&record).is_empty());
    }

    #[test]
    fn test_inconsistent_crisis_flag() {
        let mut record = phq9(vec![0, 0, 0, 0, 0, 0, 0, 0, 2]);
        record.crisis_flag = Some(false);
        let violations = ClinicalValidator::new().check_assessment(&record);
        assert_eq!(rules(&violations), vec![ClinicalRule::CrisisThreshold]);
    }

    #[test]
    fn test_wrong_item_count_and_range() {
        let violations = ClinicalValidator::new().check_assessment(&phq9(vec![4, 1, 1]));
        assert_eq!(
            rules(&violations),
            vec![ClinicalRule::ItemCount, ClinicalRule::ItemRange]
        );
    }

    #[test]
    fn test_missing_total_is_reported_not_blocking() {
        let mut record = phq9(vec![1; 9]);
        record.total_score = None;
        let violations = ClinicalValidator::new().check_assessment(&record);
        assert_eq!(rules(&violations), vec![ClinicalRule::TotalPresent]);

        let validation = ClinicalAccuracyValidation::from_violations(violations);
        assert!(validation.clinically_valid);
        assert_eq!(validation.blocking().count(), 0);
    }

    #[test]
    fn test_missing_total_still_checks_crisis_flag() {
        let mut record = phq9(vec![3, 3, 3, 3, 3, 3, 3, 3, 0]);
        record.total_score = None;
        record.crisis_flag = Some(false);
        let violations = ClinicalValidator::new().check_assessment(&record);
        assert_eq!(
            rules(&violations),
            vec![ClinicalRule::TotalPresent, ClinicalRule::CrisisThreshold]
        );
    }

    #[test]
    fn test_session_duration_bounds() {
        let mut session = SessionRecord {
            id: "s1".to_string(),
            user_id: UserId::new("u1"),
            practice: "body scan".to_string(),
            duration_minutes: -1.0,
            completed: true,
            notes: None,
            started_at: Some(Utc::now()),
        };
        let validator = ClinicalValidator::new();
        assert_eq!(rules(&validator.check_session(&session)), vec![ClinicalRule::SessionDuration]);
        session.duration_minutes = 241.0;
        assert_eq!(validator.check_session(&session).len(), 1);
        session.duration_minutes = 240.0;
        assert!(validator.check_session(&session).is_empty());
    }

    #[test]
    fn test_mood_scale_is_not_blocking() {
        let mood = MoodEntry {
            id: "m1".to_string(),
            user_id: UserId::new("u1"),
            mood: 11.0,
            energy: None,
            anxiety: None,
            notes: None,
            recorded_at: Some(Utc::now()),
        };
        let validation =
            ClinicalAccuracyValidation::from_violations(ClinicalValidator::new().check_mood(&mood));
        assert!(validation.clinically_valid);
        assert_eq!(validation.violations.len(), 1);
        assert_eq!(validation.blocking().count(), 0);
    }

    #[test]
    fn test_error_lists_blocking_violations() {
        let validation = ClinicalAccuracyValidation::from_violations(vec![violation(
            ClinicalRule::TimestampPresent,
            "a1",
            "record has no timestamp".to_string(),
        )]);
        assert!(!validation.clinically_valid);
        match validation.to_error() {
            ExportError::ClinicalAccuracy { violations } => {
                assert_eq!(violations, vec!["[timestamp-present] a1: record has no timestamp"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
