//! Canonical export shape.

use crate::scoring::QuestionnaireScore;
use crate::validation::{ClinicalAccuracyValidation, ClinicalValidator, RuleViolation};
use clinexport_core::{
    AssessmentResult, CategoryData, ClinicalExportData, Collection, CrisisEntry,
    ExportId, ExportSummary, MoodTracking, RiskCategory, TherapeuticSession, Time, TimeRange,
    ValidationStatus,
};
use clinexport_privacy::FilteredData;
use tracing::debug;

/// Canonical data plus its clinical validation.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// Canonical export data
    pub data: ClinicalExportData,
    /// Validation over every record
    pub validation: ClinicalAccuracyValidation,
}

/// Converts filtered records into [`ClinicalExportData`].
#[derive(Debug, Clone, Default)]
pub struct ClinicalDataTransformer {
    validator: ClinicalValidator,
}

impl ClinicalDataTransformer {
    /// Create a transformer with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a configured validator.
    pub fn with_validator(mut self, validator: ClinicalValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Build canonical data. Records are ordered by timestamp, untimed last.
    pub fn transform(
        &self,
        export_id: ExportId,
        time_range: TimeRange,
        filtered: FilteredData,
    ) -> TransformOutput {
        let mut data = ClinicalExportData {
            export_id,
            subject: filtered.subject.clone(),
            time_range: filtered
                .time_offset
                .map_or(time_range, |offset| time_range.shifted(offset)),
            anonymization: filtered.level,
            assessments: Collection::empty(),
            mood: Collection::empty(),
            sessions: Collection::empty(),
            crisis: None,
            omissions: filtered.omissions,
            summary: ExportSummary::default(),
        };
        let mut violations = Vec::new();
        let subject = filtered.subject;

        for dataset in filtered.datasets {
            match dataset {
                CategoryData::Assessments(records) => {
                    let checks: Vec<_> = records
                        .iter()
                        .map(|r| self.validator.check_assessment(r))
                        .collect();
                    let mut results: Vec<AssessmentResult> = records
                        .into_iter()
                        .map(|r| {
                            let score = QuestionnaireScore::compute(r.kind, &r.answers, r.total_score);
                            AssessmentResult {
                                record_id: r.id,
                                subject: subject.clone(),
                                kind: r.kind,
                                score: score.total,
                                subscale_scores: score.items,
                                severity: score.severity,
                                is_crisis_level: score.is_crisis_level,
                                has_suicidal_ideation: score.has_suicidal_ideation,
                                completed_at: r.completed_at,
                            }
                        })
                        .collect();
                    sort_by_time(&mut results, |r| (r.completed_at, r.record_id.as_str()));
                    data.assessments = collect(results, checks, &mut violations);
                }
                CategoryData::MoodTracking(records) => {
                    let checks: Vec<_> = records.iter().map(|r| self.validator.check_mood(r)).collect();
                    let mut results: Vec<MoodTracking> = records
                        .into_iter()
                        .map(|r| MoodTracking {
                            record_id: r.id,
                            subject: subject.clone(),
                            mood: r.mood,
                            energy: r.energy,
                            anxiety: r.anxiety,
                            notes: r.notes,
                            recorded_at: r.recorded_at,
                        })
                        .collect();
                    sort_by_time(&mut results, |r| (r.recorded_at, r.record_id.as_str()));
                    data.mood = collect(results, checks, &mut violations);
                }
                CategoryData::MbctProgress(records) => {
                    let checks: Vec<_> = records
                        .iter()
                        .map(|r| self.validator.check_session(r))
                        .collect();
                    let mut results: Vec<TherapeuticSession> = records
                        .into_iter()
                        .map(|r| TherapeuticSession {
                            record_id: r.id,
                            subject: subject.clone(),
                            practice: r.practice,
                            duration_minutes: r.duration_minutes,
                            completed: r.completed,
                            notes: r.notes,
                            started_at: r.started_at,
                        })
                        .collect();
                    sort_by_time(&mut results, |r| (r.started_at, r.record_id.as_str()));
                    data.sessions = collect(results, checks, &mut violations);
                }
                CategoryData::CrisisSafety(records) => {
                    let checks: Vec<_> = records
                        .iter()
                        .map(|r| self.validator.check_crisis(r))
                        .collect();
                    let mut results: Vec<CrisisEntry> = records
                        .into_iter()
                        .map(|r| CrisisEntry {
                            record_id: r.id,
                            subject: subject.clone(),
                            content: r.content,
                            recorded_at: r.recorded_at,
                        })
                        .collect();
                    sort_by_time(&mut results, |r| (r.recorded_at, r.record_id.as_str()));
                    data.crisis = Some(collect(results, checks, &mut violations));
                }
            }
        }

        data.summary = summarize(&data);
        let validation = ClinicalAccuracyValidation::from_violations(violations);
        debug!(
            "Transformed export {}: {} records, clinically valid: {}",
            export_id,
            data.record_count(),
            validation.clinically_valid
        );
        TransformOutput { data, validation }
    }
}

fn sort_by_time<T, F>(records: &mut [T], key: F)
where
    F: Fn(&T) -> (Option<Time>, &str),
{
    records.sort_by(|a, b| {
        let (ta, ia) = key(a);
        let (tb, ib) = key(b);
        ta.is_none()
            .cmp(&tb.is_none())
            .then(ta.cmp(&tb))
            .then(ia.cmp(ib))
    });
}

fn collect<T>(
    records: Vec<T>,
    checks: Vec<Vec<RuleViolation>>,
    violations: &mut Vec<RuleViolation>,
) -> Collection<T> {
    let total = checks.len();
    let clean = checks.iter().filter(|c| c.is_empty()).count();
    let any_blocking = checks.iter().flatten().any(|v| v.rule.is_blocking());
    let any_warning = checks.iter().any(|c| !c.is_empty());

    violations.extend(checks.into_iter().flatten());

    Collection {
        records,
        data_quality: if total == 0 { 1.0 } else { clean as f64 / total as f64 },
        validation_status: if any_blocking {
            ValidationStatus::Invalid
        } else if any_warning {
            ValidationStatus::Warnings
        } else {
            ValidationStatus::Valid
        },
    }
}

fn summarize(data: &ClinicalExportData) -> ExportSummary {
    let crisis_in_assessments = data.assessments.records.iter().any(|a| a.is_crisis_level);
    let crisis_in_history = data.crisis.as_ref().map_or(false, |c| {
        c.records
            .iter()
            .any(|e| e.content.risk_category() == RiskCategory::High)
    });
    ExportSummary {
        assessment_count: data.assessments.len(),
        mood_entry_count: data.mood.len(),
        session_count: data.sessions.len(),
        crisis_entry_count: data.crisis.as_ref().map_or(0, |c| c.len()),
        crisis_indicators_present: crisis_in_assessments || crisis_in_history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use clinexport_core::{
        AnonymizationLevel, AssessmentKind, AssessmentRecord, DataCategory, MoodEntry, Omission,
        OmissionReason, SessionRecord, SeverityBand, UserId,
    };

    fn at(day: u32) -> Option<Time> {
        Some(Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap())
    }

    fn range() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap(),
        )
    }

    fn phq9(id: &str, answers: Vec<u8>, day: u32) -> AssessmentRecord {
        AssessmentRecord {
            id: id.to_string(),
            user_id: UserId::new("u1"),
            kind: AssessmentKind::Phq9,
            total_score: Some(answers.iter().map(|a| f64::from(*a)).sum()),
            answers,
            crisis_flag: None,
            completed_at: at(day),
        }
    }

    fn filtered(datasets: Vec<CategoryData>) -> FilteredData {
        FilteredData {
            datasets,
            omissions: Vec::new(),
            subject: "u1".to_string(),
            time_offset: None,
            level: AnonymizationLevel::None,
        }
    }

    #[test]
    fn test_phq9_crisis_record_is_scored() {
        let output = ClinicalDataTransformer::new().transform(
            ExportId::new(),
            range(),
            filtered(vec![CategoryData::Assessments(vec![phq9(
                "a1",
                vec![3, 3, 3, 3, 3, 3, 3, 3, 1],
                2,
            )])]),
        );
        let result = &output.data.assessments.records[0];
        assert_eq!(result.score, 25.0);
        assert!(result.is_crisis_level);
        assert!(result.has_suicidal_ideation);
        assert_eq!(result.severity, SeverityBand::Severe);
        assert!(output.validation.clinically_valid);
        assert!(output.data.summary.crisis_indicators_present);
    }

    #[test]
    fn test_quality_and_status_per_collection() {
        let mut bad = phq9("a2", vec![1; 9], 3);
        bad.total_score = Some(30.0);
        let mood = MoodEntry {
            id: "m1".to_string(),
            user_id: UserId::new("u1"),
            mood: 12.0,
            energy: None,
            anxiety: None,
            notes: None,
            recorded_at: at(4),
        };
        let output = ClinicalDataTransformer::new().transform(
            ExportId::new(),
            range(),
            filtered(vec![
                CategoryData::Assessments(vec![phq9("a1", vec![0; 9], 2), bad]),
                CategoryData::MoodTracking(vec![mood]),
            ]),
        );
        assert_eq!(output.data.assessments.data_quality, 0.5);
        assert_eq!(output.data.assessments.validation_status, ValidationStatus::Invalid);
        assert_eq!(output.data.mood.validation_status, ValidationStatus::Warnings);
        assert!(!output.validation.clinically_valid);
        assert!(output.data.crisis.is_none());
    }

    #[test]
    fn test_records_sorted_untimed_last() {
        let mut untimed = phq9("a0", vec![0; 9], 1);
        untimed.completed_at = None;
        let output = ClinicalDataTransformer::new().transform(
            ExportId::new(),
            range(),
            filtered(vec![CategoryData::Assessments(vec![
                untimed,
                phq9("a2", vec![0; 9], 9),
                phq9("a1", vec![0; 9], 2),
            ])]),
        );
        let ids: Vec<_> = output
            .data
            .assessments
            .records
            .iter()
            .map(|r| r.record_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a1", "a2", "a0"]);
    }

    #[test]
    fn test_shifted_range_and_omissions_carried() {
        let mut input = filtered(vec![CategoryData::MbctProgress(vec![SessionRecord {
            id: "s1".to_string(),
            user_id: UserId::new("anon-1"),
            practice: "breathing space".to_string(),
            duration_minutes: 3.0,
            completed: true,
            notes: None,
            started_at: at(5),
        }])]);
        input.time_offset = Some(Duration::days(40));
        input.omissions.push(Omission {
            category: DataCategory::Assessments,
            reason: OmissionReason::ConsentNotGranted,
        });

        let output = ClinicalDataTransformer::new().transform(ExportId::new(), range(), input);
        assert_eq!(output.data.time_range, range().shifted(Duration::days(40)));
        assert_eq!(output.data.omissions.len(), 1);
        assert_eq!(output.data.summary.session_count, 1);
        assert_eq!(output.data.count(DataCategory::Assessments), 0);
    }
}
