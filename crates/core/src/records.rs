//! Raw records as held by the storage backends.
//!
//! Adapters return these unfiltered; the privacy filter and the clinical
//! transformer turn them into the canonical export shape.

use crate::category::DataCategory;
use crate::id::UserId;
use crate::Time;
use serde::{Deserialize, Serialize};

/// Standardized questionnaire kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssessmentKind {
    /// Patient Health Questionnaire, 9 items
    Phq9,
    /// Generalized Anxiety Disorder scale, 7 items
    Gad7,
}

impl AssessmentKind {
    /// Number of items in the questionnaire.
    pub fn item_count(&self) -> usize {
        match self {
            AssessmentKind::Phq9 => 9,
            AssessmentKind::Gad7 => 7,
        }
    }

    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            AssessmentKind::Phq9 => "PHQ-9",
            AssessmentKind::Gad7 => "GAD-7",
        }
    }

    /// Total at or above which a response is crisis level.
    pub const fn crisis_cutoff(&self) -> f64 {
        match self {
            AssessmentKind::Phq9 => 20.0,
            AssessmentKind::Gad7 => 15.0,
        }
    }

    /// Index of the suicidal ideation item, if the questionnaire has one.
    pub const fn ideation_item(&self) -> Option<usize> {
        match self {
            AssessmentKind::Phq9 => Some(8),
            AssessmentKind::Gad7 => None,
        }
    }
}

/// A stored questionnaire response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    /// Record id
    pub id: String,
    /// Owner
    pub user_id: UserId,
    /// Questionnaire
    pub kind: AssessmentKind,
    /// Item answers, each 0..=3
    pub answers: Vec<u8>,
    /// Total stored alongside the answers, if any
    #[serde(default)]
    pub total_score: Option<f64>,
    /// Crisis flag stored alongside the answers, if any
    #[serde(default)]
    pub crisis_flag: Option<bool>,
    /// Completion time
    #[serde(default)]
    pub completed_at: Option<Time>,
}

impl AssessmentRecord {
    /// Whether the response reaches a crisis threshold by its stored flag,
    /// its stored total, its item sum or the ideation item.
    pub fn reaches_crisis_threshold(&self) -> bool {
        let item_sum: f64 = self.answers.iter().map(|a| f64::from(*a)).sum();
        let total = self.total_score.map_or(item_sum, |t| t.max(item_sum));
        let ideation = self
            .kind
            .ideation_item()
            .and_then(|i| self.answers.get(i))
            .map_or(false, |item| *item >= 1);
        self.crisis_flag == Some(true) || total >= self.kind.crisis_cutoff() || ideation
    }
}

/// A stored mood check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    /// Record id
    pub id: String,
    /// Owner
    pub user_id: UserId,
    /// Mood on a 1..=10 scale
    pub mood: f64,
    /// Energy on a 1..=10 scale
    #[serde(default)]
    pub energy: Option<f64>,
    /// Anxiety on a 1..=10 scale
    #[serde(default)]
    pub anxiety: Option<f64>,
    /// Free-text note
    #[serde(default)]
    pub notes: Option<String>,
    /// Check-in time
    #[serde(default)]
    pub recorded_at: Option<Time>,
}

/// A stored MBCT session / practice log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Record id
    pub id: String,
    /// Owner
    pub user_id: UserId,
    /// Practice name (e.g. body scan, breathing space)
    pub practice: String,
    /// Duration in minutes
    pub duration_minutes: f64,
    /// Whether the practice was completed
    pub completed: bool,
    /// Free-text reflection
    #[serde(default)]
    pub notes: Option<String>,
    /// Session start
    #[serde(default)]
    pub started_at: Option<Time>,
}

/// Emergency contact listed in a safety plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyContact {
    /// Contact name
    pub name: String,
    /// Phone number
    pub phone: String,
}

/// A personal safety plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyPlan {
    /// Personal warning signs
    pub warning_signs: Vec<String>,
    /// Coping strategies
    pub coping_strategies: Vec<String>,
    /// People to reach out to
    pub emergency_contacts: Vec<EmergencyContact>,
}

/// Coarse risk category used instead of crisis detail in research exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    /// No elevated risk indicators
    Low,
    /// Some risk indicators
    Elevated,
    /// Crisis-level risk
    High,
}

impl RiskCategory {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Low => "low",
            RiskCategory::Elevated => "elevated",
            RiskCategory::High => "high",
        }
    }
}

/// Content of a crisis record: full detail from storage, or a coarse category
/// once the privacy filter has reduced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CrisisContent {
    /// Full crisis assessment
    Detailed {
        /// Risk score 0..=10
        risk_score: f64,
        /// Whether suicidal ideation was reported
        suicidal_ideation: bool,
        /// Safety plan at the time of assessment
        #[serde(default)]
        safety_plan: Option<SafetyPlan>,
    },
    /// Coarse risk category only
    Coarse {
        /// Risk category
        risk: RiskCategory,
    },
}

/// A stored crisis assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisRecord {
    /// Record id
    pub id: String,
    /// Owner
    pub user_id: UserId,
    /// Assessment content
    pub content: CrisisContent,
    /// Assessment time
    #[serde(default)]
    pub recorded_at: Option<Time>,
}

impl CrisisContent {
    /// Risk category implied by the content.
    pub fn risk_category(&self) -> RiskCategory {
        match self {
            CrisisContent::Coarse { risk } => *risk,
            CrisisContent::Detailed {
                risk_score,
                suicidal_ideation,
                ..
            } => {
                if *suicidal_ideation || *risk_score >= 7.0 {
                    RiskCategory::High
                } else if *risk_score >= 4.0 {
                    RiskCategory::Elevated
                } else {
                    RiskCategory::Low
                }
            }
        }
    }
}

impl CrisisRecord {
    /// Risk category implied by the record.
    pub fn risk_category(&self) -> RiskCategory {
        self.content.risk_category()
    }
}

/// Raw data for one category. The closed set of per-category payloads that
/// flows from the adapters through the privacy filter into the transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "records", rename_all = "kebab-case")]
pub enum CategoryData {
    /// Questionnaire responses
    Assessments(Vec<AssessmentRecord>),
    /// Mood check-ins
    MoodTracking(Vec<MoodEntry>),
    /// MBCT sessions
    MbctProgress(Vec<SessionRecord>),
    /// Crisis assessments
    CrisisSafety(Vec<CrisisRecord>),
}

impl CategoryData {
    /// Category of the payload.
    pub fn category(&self) -> DataCategory {
        match self {
            CategoryData::Assessments(_) => DataCategory::Assessments,
            CategoryData::MoodTracking(_) => DataCategory::MoodTracking,
            CategoryData::MbctProgress(_) => DataCategory::MbctProgress,
            CategoryData::CrisisSafety(_) => DataCategory::CrisisSafety,
        }
    }

    /// Empty payload for a category.
    pub fn empty(category: DataCategory) -> Self {
        match category {
            DataCategory::Assessments => CategoryData::Assessments(Vec::new()),
            DataCategory::MoodTracking => CategoryData::MoodTracking(Vec::new()),
            DataCategory::MbctProgress => CategoryData::MbctProgress(Vec::new()),
            DataCategory::CrisisSafety => CategoryData::CrisisSafety(Vec::new()),
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        match self {
            CategoryData::Assessments(r) => r.len(),
            CategoryData::MoodTracking(r) => r.len(),
            CategoryData::MbctProgress(r) => r.len(),
            CategoryData::CrisisSafety(r) => r.len(),
        }
    }

    /// Whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append the records of another payload of the same category.
    /// Payloads of a different category are ignored and returned as `Err`.
    pub fn extend(&mut self, other: CategoryData) -> Result<(), CategoryData> {
        match (self, other) {
            (CategoryData::Assessments(a), CategoryData::Assessments(b)) => a.extend(b),
            (CategoryData::MoodTracking(a), CategoryData::MoodTracking(b)) => a.extend(b),
            (CategoryData::MbctProgress(a), CategoryData::MbctProgress(b)) => a.extend(b),
            (CategoryData::CrisisSafety(a), CategoryData::CrisisSafety(b)) => a.extend(b),
            (_, other) => return Err(other),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crisis(risk_score: f64, suicidal_ideation: bool) -> CrisisRecord {
        CrisisRecord {
            id: "c1".to_string(),
            user_id: UserId::new("u1"),
            content: CrisisContent::Detailed {
                risk_score,
                suicidal_ideation,
                safety_plan: None,
            },
            recorded_at: None,
        }
    }

    #[test]
    fn test_risk_category_thresholds() {
        assert_eq!(crisis(1.0, false).risk_category(), RiskCategory::Low);
        assert_eq!(crisis(5.0, false).risk_category(), RiskCategory::Elevated);
        assert_eq!(crisis(8.0, false).risk_category(), RiskCategory::High);
        assert_eq!(crisis(0.0, true).risk_category(), RiskCategory::High);
    }

    fn response(kind: AssessmentKind, answers: Vec<u8>) -> AssessmentRecord {
        AssessmentRecord {
            id: "a1".to_string(),
            user_id: UserId::new("u1"),
            kind,
            answers,
            total_score: None,
            crisis_flag: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_crisis_threshold_from_total_item_or_flag() {
        let phq = |answers: Vec<u8>| response(AssessmentKind::Phq9, answers);
        assert!(phq(vec![3, 3, 3, 3, 3, 3, 2, 0, 0]).reaches_crisis_threshold());
        assert!(phq(vec![0, 0, 0, 0, 0, 0, 0, 0, 1]).reaches_crisis_threshold());
        assert!(!phq(vec![2, 2, 2, 2, 2, 2, 2, 0, 0]).reaches_crisis_threshold());
        assert!(response(AssessmentKind::Gad7, vec![3, 3, 3, 3, 3, 0, 0]).reaches_crisis_threshold());

        let mut flagged = response(AssessmentKind::Gad7, vec![0; 7]);
        flagged.crisis_flag = Some(true);
        assert!(flagged.reaches_crisis_threshold());
    }

    #[test]
    fn test_extend_rejects_other_category() {
        let mut data = CategoryData::empty(DataCategory::MoodTracking);
        let other = CategoryData::empty(DataCategory::Assessments);
        assert!(data.extend(other).is_err());
    }

    #[test]
    fn test_category_data_is_tagged() {
        let data = CategoryData::empty(DataCategory::MbctProgress);
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["category"], "mbct-progress");
    }
}
