//! PHQ-9 and GAD-7 scoring.

use clinexport_core::{AssessmentKind, SeverityBand};

/// PHQ-9 crisis cutoff.
pub const PHQ9_CRISIS_SCORE: f64 = AssessmentKind::Phq9.crisis_cutoff();

/// GAD-7 crisis cutoff.
pub const GAD7_CRISIS_SCORE: f64 = AssessmentKind::Gad7.crisis_cutoff();

/// Highest value of a single questionnaire item.
pub const MAX_ITEM_SCORE: u8 = 3;

/// Scored questionnaire.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionnaireScore {
    /// Total score
    pub total: f64,
    /// Per-item scores
    pub items: Vec<f64>,
    /// Severity band of the total
    pub severity: SeverityBand,
    /// Crisis cutoff met
    pub is_crisis_level: bool,
    /// Suicidal ideation endorsed
    pub has_suicidal_ideation: bool,
}

impl QuestionnaireScore {
    /// Score a set of answers. When `stored_total` is present it is used as
    /// the total; validation compares it against the item sum separately.
    pub fn compute(kind: AssessmentKind, answers: &[u8], stored_total: Option<f64>) -> Self {
        let items: Vec<f64> = answers.iter().map(|a| f64::from(*a)).collect();
        let total = stored_total.unwrap_or_else(|| items.iter().sum());
        Self {
            severity: severity_band(kind, total),
            is_crisis_level: crisis_level(kind, total, answers),
            has_suicidal_ideation: suicidal_ideation(kind, answers),
            total,
            items,
        }
    }
}

/// Severity band for a total score.
pub fn severity_band(kind: AssessmentKind, total: f64) -> SeverityBand {
    match kind {
        AssessmentKind::Phq9 => match total {
            t if t < 5.0 => SeverityBand::Minimal,
            t if t < 10.0 => SeverityBand::Mild,
            t if t < 15.0 => SeverityBand::Moderate,
            t if t < 20.0 => SeverityBand::ModeratelySevere,
            _ => SeverityBand::Severe,
        },
        AssessmentKind::Gad7 => match total {
            t if t < 5.0 => SeverityBand::Minimal,
            t if t < 10.0 => SeverityBand::Mild,
            t if t < 15.0 => SeverityBand::Moderate,
            _ => SeverityBand::Severe,
        },
    }
}

/// Whether the item answers endorse suicidal ideation (PHQ-9 item 9 >= 1).
pub fn suicidal_ideation(kind: AssessmentKind, answers: &[u8]) -> bool {
    kind.ideation_item()
        .and_then(|i| answers.get(i))
        .map_or(false, |item| *item >= 1)
}

/// Crisis cutoff: PHQ-9 >= 20 or item 9 >= 1; GAD-7 >= 15.
pub fn crisis_level(kind: AssessmentKind, total: f64, answers: &[u8]) -> bool {
    match kind {
        AssessmentKind::Phq9 => total >= PHQ9_CRISIS_SCORE || suicidal_ideation(kind, answers),
        AssessmentKind::Gad7 => total >= GAD7_CRISIS_SCORE,
    }
}
