//! CSV export in flat, normalized and hierarchical layouts.
//!
//! Every layout writes a rectangular file: the first row is a header and
//! every later row has the same number of fields. Typed columns are named
//! so that [`validate_csv_integrity`] can check them back.

use crate::error::{RenderError, Result};
use crate::FormatRenderer;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use clinexport_core::{
    ClinicalExportData, CrisisContent, CsvStructure, ExportFormat, GenerationResult,
    GenerationValidation, RenderOptions, SafetyPlan, Time,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::warn;

const MAX_REPORTED_ERRORS: usize = 20;

const FLAT_COLUMNS: [&str; 20] = [
    "category",
    "record_id",
    "subject",
    "timestamp",
    "instrument",
    "score",
    "severity",
    "is_crisis_level",
    "has_suicidal_ideation",
    "item_scores",
    "mood",
    "energy",
    "anxiety",
    "practice",
    "duration_minutes",
    "completed",
    "risk_category",
    "risk_score",
    "suicidal_ideation",
    "notes",
];

const HIERARCHY_COLUMNS: [&str; 7] = [
    "level",
    "node_type",
    "node_id",
    "parent_id",
    "label",
    "value",
    "timestamp",
];

/// Tables of the normalized layout and their columns. The first column of
/// each child table is the foreign key to its parent.
const TABLES: [(&str, &[&str]); 8] = [
    ("subject", &["subject_id", "anonymization", "time_range_start", "time_range_end"]),
    (
        "assessments",
        &[
            "assessment_id",
            "subject_id",
            "instrument",
            "score",
            "severity",
            "is_crisis_level",
            "has_suicidal_ideation",
            "completed_at",
        ],
    ),
    ("assessment_items", &["assessment_id", "item_number", "item_score"]),
    (
        "mood_entries",
        &["mood_id", "subject_id", "mood", "energy", "anxiety", "notes", "recorded_at"],
    ),
    (
        "sessions",
        &[
            "session_id",
            "subject_id",
            "practice",
            "duration_minutes",
            "completed",
            "notes",
            "started_at",
        ],
    ),
    (
        "crisis_entries",
        &[
            "crisis_id",
            "subject_id",
            "risk_category",
            "risk_score",
            "suicidal_ideation",
            "recorded_at",
        ],
    ),
    ("safety_plan_items", &["crisis_id", "item_type", "value"]),
    ("omissions", &["category", "reason"]),
];

fn normalized_width() -> usize {
    TABLES.iter().map(|(_, cols)| cols.len()).max().unwrap_or(0)
}

/// Column types checked on read-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Text,
    Number,
    Integer,
    Bool,
    Timestamp,
}

impl ColumnType {
    fn of(column: &str) -> Self {
        match column {
            "score" | "mood" | "energy" | "anxiety" | "duration_minutes" | "item_score"
            | "risk_score" => ColumnType::Number,
            "level" | "item_number" => ColumnType::Integer,
            "is_crisis_level" | "has_suicidal_ideation" | "completed" | "suicidal_ideation" => {
                ColumnType::Bool
            }
            "timestamp" | "completed_at" | "recorded_at" | "started_at" | "time_range_start"
            | "time_range_end" => ColumnType::Timestamp,
            _ => ColumnType::Text,
        }
    }

    fn parses(&self, value: &str) -> bool {
        match self {
            ColumnType::Text => true,
            ColumnType::Number => value.parse::<f64>().map_or(false, f64::is_finite),
            ColumnType::Integer => value.parse::<i64>().is_ok(),
            ColumnType::Bool => value.parse::<bool>().is_ok(),
            ColumnType::Timestamp => DateTime::parse_from_rfc3339(value).is_ok(),
        }
    }
}

/// Renders canonical export data as CSV.
#[derive(Debug, Default, Clone)]
pub struct CsvExporter;

impl CsvExporter {
    /// Create an exporter.
    pub fn new() -> Self {
        Self
    }

    /// Encode `data` in the given layout.
    pub fn render_bytes(&self, data: &ClinicalExportData, structure: CsvStructure) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        match structure {
            CsvStructure::Flat => write_flat(&mut writer, data)?,
            CsvStructure::Normalized => write_normalized(&mut writer, data)?,
            CsvStructure::Hierarchical => write_hierarchical(&mut writer, data)?,
        }

        writer
            .into_inner()
            .map_err(|e| RenderError::Io(e.into_error()))
    }
}

#[async_trait]
impl FormatRenderer for CsvExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    async fn render(
        &self,
        data: &ClinicalExportData,
        options: &RenderOptions,
        output: &Path,
    ) -> Result<GenerationResult> {
        let started = Instant::now();
        let bytes = self.render_bytes(data, options.csv_structure)?;
        tokio::fs::write(output, &bytes).await?;

        let validation = validate_csv_integrity(&bytes, options.csv_structure);
        if !validation.is_valid() {
            warn!("CSV validation failed: {}", validation.errors.join("; "));
        }

        Ok(GenerationResult {
            file_path: output.to_path_buf(),
            file_size: bytes.len() as u64,
            record_count: data.record_count(),
            page_count: None,
            generation_time_ms: started.elapsed().as_millis() as u64,
            validation,
        })
    }
}

type Writer = csv::Writer<Vec<u8>>;

fn write_flat(writer: &mut Writer, data: &ClinicalExportData) -> Result<()> {
    writer.write_record(FLAT_COLUMNS)?;
    let row = |fields: &[(&str, String)]| -> Vec<String> {
        FLAT_COLUMNS
            .iter()
            .map(|col| {
                fields
                    .iter()
                    .find(|(name, _)| name == col)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default()
            })
            .collect()
    };

    for a in &data.assessments.records {
        writer.write_record(row(&[
            ("category", "assessments".to_string()),
            ("record_id", a.record_id.clone()),
            ("subject", a.subject.clone()),
            ("timestamp", time(a.completed_at)),
            ("instrument", a.kind.label().to_string()),
            ("score", a.score.to_string()),
            ("severity", a.severity.as_str().to_string()),
            ("is_crisis_level", a.is_crisis_level.to_string()),
            ("has_suicidal_ideation", a.has_suicidal_ideation.to_string()),
            ("item_scores", join_scores(&a.subscale_scores)),
        ]))?;
    }
    for m in &data.mood.records {
        writer.write_record(row(&[
            ("category", "mood-tracking".to_string()),
            ("record_id", m.record_id.clone()),
            ("subject", m.subject.clone()),
            ("timestamp", time(m.recorded_at)),
            ("mood", m.mood.to_string()),
            ("energy", opt_number(m.energy)),
            ("anxiety", opt_number(m.anxiety)),
            ("notes", m.notes.clone().unwrap_or_default()),
        ]))?;
    }
    for s in &data.sessions.records {
        writer.write_record(row(&[
            ("category", "mbct-progress".to_string()),
            ("record_id", s.record_id.clone()),
            ("subject", s.subject.clone()),
            ("timestamp", time(s.started_at)),
            ("practice", s.practice.clone()),
            ("duration_minutes", s.duration_minutes.to_string()),
            ("completed", s.completed.to_string()),
            ("notes", s.notes.clone().unwrap_or_default()),
        ]))?;
    }
    for c in data.crisis.iter().flat_map(|c| c.records.iter()) {
        let mut fields = vec![
            ("category", "crisis-safety".to_string()),
            ("record_id", c.record_id.clone()),
            ("subject", c.subject.clone()),
            ("timestamp", time(c.recorded_at)),
            ("risk_category", c.content.risk_category().as_str().to_string()),
        ];
        if let CrisisContent::Detailed {
            risk_score,
            suicidal_ideation,
            ..
        } = &c.content
        {
            fields.push(("risk_score", risk_score.to_string()));
            fields.push(("suicidal_ideation", suicidal_ideation.to_string()));
        }
        writer.write_record(row(&fields))?;
    }
    Ok(())
}

fn write_normalized(writer: &mut Writer, data: &ClinicalExportData) -> Result<()> {
    let width = normalized_width();
    let mut header = vec!["table".to_string(), "row_type".to_string()];
    header.extend((1..=width).map(|i| format!("field_{}", i)));
    writer.write_record(&header)?;

    let table = |writer: &mut Writer, name: &str, rows: Vec<Vec<String>>| -> Result<()> {
        let columns = TABLES
            .iter()
            .find(|(t, _)| *t == name)
            .map(|(_, cols)| *cols)
            .unwrap_or(&[]);
        writer.write_record(padded(name, "header", columns.iter().map(|c| c.to_string()).collect(), width))?;
        for row in rows {
            writer.write_record(padded(name, "data", row, width))?;
        }
        Ok(())
    };

    table(
        writer,
        "subject",
        vec![vec![
            data.subject.clone(),
            data.anonymization.to_string(),
            time(Some(data.time_range.start)),
            time(Some(data.time_range.end)),
        ]],
    )?;

    if !data.assessments.is_empty() {
        table(
            writer,
            "assessments",
            data.assessments
                .records
                .iter()
                .map(|a| {
                    vec![
                        a.record_id.clone(),
                        a.subject.clone(),
                        a.kind.label().to_string(),
                        a.score.to_string(),
                        a.severity.as_str().to_string(),
                        a.is_crisis_level.to_string(),
                        a.has_suicidal_ideation.to_string(),
                        time(a.completed_at),
                    ]
                })
                .collect(),
        )?;
        table(
            writer,
            "assessment_items",
            data.assessments
                .records
                .iter()
                .flat_map(|a| {
                    a.subscale_scores.iter().enumerate().map(move |(i, score)| {
                        vec![a.record_id.clone(), (i + 1).to_string(), score.to_string()]
                    })
                })
                .collect(),
        )?;
    }

    if !data.mood.is_empty() {
        table(
            writer,
            "mood_entries",
            data.mood
                .records
                .iter()
                .map(|m| {
                    vec![
                        m.record_id.clone(),
                        m.subject.clone(),
                        m.mood.to_string(),
                        opt_number(m.energy),
                        opt_number(m.anxiety),
                        m.notes.clone().unwrap_or_default(),
                        time(m.recorded_at),
                    ]
                })
                .collect(),
        )?;
    }

    if !data.sessions.is_empty() {
        table(
            writer,
            "sessions",
            data.sessions
                .records
                .iter()
                .map(|s| {
                    vec![
                        s.record_id.clone(),
                        s.subject.clone(),
                        s.practice.clone(),
                        s.duration_minutes.to_string(),
                        s.completed.to_string(),
                        s.notes.clone().unwrap_or_default(),
                        time(s.started_at),
                    ]
                })
                .collect(),
        )?;
    }

    if let Some(crisis) = &data.crisis {
        let mut entries = Vec::new();
        let mut plan_items = Vec::new();
        for c in &crisis.records {
            let (score, ideation) = match &c.content {
                CrisisContent::Detailed {
                    risk_score,
                    suicidal_ideation,
                    safety_plan,
                } => {
                    if let Some(plan) = safety_plan {
                        for (kind, value) in plan_entries(plan) {
                            plan_items.push(vec![c.record_id.clone(), kind.to_string(), value]);
                        }
                    }
                    (risk_score.to_string(), suicidal_ideation.to_string())
                }
                CrisisContent::Coarse { .. } => (String::new(), String::new()),
            };
            entries.push(vec![
                c.record_id.clone(),
                c.subject.clone(),
                c.content.risk_category().as_str().to_string(),
                score,
                ideation,
                time(c.recorded_at),
            ]);
        }
        table(writer, "crisis_entries", entries)?;
        if !plan_items.is_empty() {
            table(writer, "safety_plan_items", plan_items)?;
        }
    }

    if !data.omissions.is_empty() {
        table(
            writer,
            "omissions",
            data.omissions
                .iter()
                .map(|o| vec![o.category.to_string(), o.note()])
                .collect(),
        )?;
    }
    Ok(())
}

fn write_hierarchical(writer: &mut Writer, data: &ClinicalExportData) -> Result<()> {
    writer.write_record(HIERARCHY_COLUMNS)?;
    let root = data.export_id.to_string();

    let node = |writer: &mut Writer,
                    level: u8,
                    node_type: &str,
                    node_id: &str,
                    parent: &str,
                    label: &str,
                    value: String,
                    timestamp: Option<Time>|
     -> Result<()> {
        writer.write_record([
            level.to_string(),
            node_type.to_string(),
            node_id.to_string(),
            parent.to_string(),
            label.to_string(),
            value,
            time(timestamp),
        ])?;
        Ok(())
    };

    node(writer, 0, "export", &root, "", &data.subject, data.anonymization.to_string(), None)?;

    if !data.assessments.is_empty() {
        let cat = "category:assessments";
        node(writer, 1, "category", cat, &root, "assessments", data.assessments.len().to_string(), None)?;
        for a in &data.assessments.records {
            node(writer, 2, "assessment", &a.record_id, cat, a.kind.label(), a.score.to_string(), a.completed_at)?;
            node(writer, 3, "severity", &format!("{}:severity", a.record_id), &a.record_id, "severity", a.severity.as_str().to_string(), None)?;
            node(writer, 3, "flag", &format!("{}:crisis", a.record_id), &a.record_id, "is_crisis_level", a.is_crisis_level.to_string(), None)?;
            node(writer, 3, "flag", &format!("{}:ideation", a.record_id), &a.record_id, "has_suicidal_ideation", a.has_suicidal_ideation.to_string(), None)?;
            for (i, score) in a.subscale_scores.iter().enumerate() {
                node(writer, 3, "item", &format!("{}:item{}", a.record_id, i + 1), &a.record_id, &format!("item_{}", i + 1), score.to_string(), None)?;
            }
        }
    }

    if !data.mood.is_empty() {
        let cat = "category:mood-tracking";
        node(writer, 1, "category", cat, &root, "mood-tracking", data.mood.len().to_string(), None)?;
        for m in &data.mood.records {
            node(writer, 2, "mood", &m.record_id, cat, "mood", m.mood.to_string(), m.recorded_at)?;
            if let Some(energy) = m.energy {
                node(writer, 3, "scale", &format!("{}:energy", m.record_id), &m.record_id, "energy", energy.to_string(), None)?;
            }
            if let Some(anxiety) = m.anxiety {
                node(writer, 3, "scale", &format!("{}:anxiety", m.record_id), &m.record_id, "anxiety", anxiety.to_string(), None)?;
            }
            if let Some(notes) = &m.notes {
                node(writer, 3, "note", &format!("{}:notes", m.record_id), &m.record_id, "notes", notes.clone(), None)?;
            }
        }
    }

    if !data.sessions.is_empty() {
        let cat = "category:mbct-progress";
        node(writer, 1, "category", cat, &root, "mbct-progress", data.sessions.len().to_string(), None)?;
        for s in &data.sessions.records {
            node(writer, 2, "session", &s.record_id, cat, &s.practice, s.duration_minutes.to_string(), s.started_at)?;
            node(writer, 3, "flag", &format!("{}:completed", s.record_id), &s.record_id, "completed", s.completed.to_string(), None)?;
            if let Some(notes) = &s.notes {
                node(writer, 3, "note", &format!("{}:notes", s.record_id), &s.record_id, "notes", notes.clone(), None)?;
            }
        }
    }

    if let Some(crisis) = &data.crisis {
        let cat = "category:crisis-safety";
        node(writer, 1, "category", cat, &root, "crisis-safety", crisis.len().to_string(), None)?;
        for c in &crisis.records {
            node(writer, 2, "crisis", &c.record_id, cat, "risk_category", c.content.risk_category().as_str().to_string(), c.recorded_at)?;
            if let CrisisContent::Detailed {
                risk_score,
                suicidal_ideation,
                safety_plan,
            } = &c.content
            {
                node(writer, 3, "score", &format!("{}:risk", c.record_id), &c.record_id, "risk_score", risk_score.to_string(), None)?;
                node(writer, 3, "flag", &format!("{}:ideation", c.record_id), &c.record_id, "suicidal_ideation", suicidal_ideation.to_string(), None)?;
                if let Some(plan) = safety_plan {
                    for (i, (kind, value)) in plan_entries(plan).into_iter().enumerate() {
                        node(writer, 3, kind, &format!("{}:plan{}", c.record_id, i + 1), &c.record_id, kind, value, None)?;
                    }
                }
            }
        }
    }

    for omission in &data.omissions {
        node(
            writer,
            1,
            "omission",
            &format!("omission:{}", omission.category),
            &root,
            omission.category.as_str(),
            omission.note(),
            None,
        )?;
    }
    Ok(())
}

/// Check a CSV artifact: non-empty, UTF-8, no truncated last line, every
/// row as wide as the header, and every typed column parseable.
pub fn validate_csv_integrity(bytes: &[u8], structure: CsvStructure) -> GenerationValidation {
    let mut validation = GenerationValidation::passed();
    let report = |validation: &mut GenerationValidation, message: String| {
        if validation.errors.len() < MAX_REPORTED_ERRORS {
            validation.errors.push(message);
        }
    };

    if bytes.is_empty() {
        validation.structure_valid = false;
        validation.integrity_maintained = false;
        report(&mut validation, "CSV file is empty".to_string());
        return validation;
    }

    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            validation.data_types_valid = false;
            validation.integrity_maintained = false;
            report(&mut validation, format!("CSV is not valid UTF-8: {}", e));
            return validation;
        }
    };
    if !text.ends_with('\n') {
        validation.integrity_maintained = false;
        report(&mut validation, "last line is truncated".to_string());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut header: Vec<String> = Vec::new();
    let mut table_columns: HashMap<String, Vec<String>> = HashMap::new();

    for (index, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                validation.structure_valid = false;
                report(&mut validation, format!("unreadable row {}: {}", index + 1, e));
                break;
            }
        };
        if index == 0 {
            header = record.iter().map(str::to_string).collect();
            continue;
        }
        if record.len() != header.len() {
            validation.structure_valid = false;
            report(
                &mut validation,
                format!(
                    "row {} has {} columns, header has {}",
                    index + 1,
                    record.len(),
                    header.len()
                ),
            );
            continue;
        }

        let fields: Vec<&str> = record.iter().collect();
        let (names, values): (Vec<String>, &[&str]) = match structure {
            CsvStructure::Normalized => {
                let (table, row_type) = (fields[0], fields.get(1).copied().unwrap_or_default());
                if row_type == "header" {
                    table_columns.insert(
                        table.to_string(),
                        fields[2..].iter().map(|f| f.to_string()).collect(),
                    );
                    continue;
                }
                match table_columns.get(table) {
                    Some(columns) => (columns.clone(), &fields[2..]),
                    None => {
                        validation.structure_valid = false;
                        report(&mut validation, format!("row {} precedes its table header", index + 1));
                        continue;
                    }
                }
            }
            _ => (header.clone(), &fields[..]),
        };

        for (name, value) in names.iter().zip(values) {
            if !value.is_empty() && !ColumnType::of(name).parses(value) {
                validation.data_types_valid = false;
                report(
                    &mut validation,
                    format!("row {}: column '{}' does not parse", index + 1, name),
                );
            }
        }
    }

    if header.is_empty() {
        validation.structure_valid = false;
        report(&mut validation, "CSV has no header row".to_string());
    }

    validation
}

fn padded(table: &str, row_type: &str, mut fields: Vec<String>, width: usize) -> Vec<String> {
    fields.resize(width, String::new());
    let mut row = Vec::with_capacity(width + 2);
    row.push(table.to_string());
    row.push(row_type.to_string());
    row.extend(fields);
    row
}

fn plan_entries(plan: &SafetyPlan) -> Vec<(&'static str, String)> {
    let mut entries = Vec::new();
    entries.extend(plan.warning_signs.iter().map(|w| ("warning_sign", w.clone())));
    entries.extend(plan.coping_strategies.iter().map(|c| ("coping_strategy", c.clone())));
    entries.extend(
        plan.emergency_contacts
            .iter()
            .map(|c| ("emergency_contact", format!("{} {}", c.name, c.phone))),
    );
    entries
}

fn time(t: Option<Time>) -> String {
    t.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn opt_number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn join_scores(scores: &[f64]) -> String {
    scores
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use clinexport_core::{
        AnonymizationLevel, AssessmentKind, AssessmentResult, Collection, CrisisEntry,
        DataCategory, EmergencyContact, ExportId, ExportSummary, MoodTracking, Omission,
        OmissionReason, RiskCategory, SeverityBand, TherapeuticSession, TimeRange,
    };

    fn data() -> ClinicalExportData {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mut assessments = Collection::empty();
        assessments.records.push(AssessmentResult {
            record_id: "a1".to_string(),
            subject: "u1".to_string(),
            kind: AssessmentKind::Phq9,
            score: 25.0,
            subscale_scores: vec![3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 1.0],
            severity: SeverityBand::Severe,
            is_crisis_level: true,
            has_suicidal_ideation: true,
            completed_at: Some(start + Duration::days(1)),
        });
        let mut mood = Collection::empty();
        mood.records.push(MoodTracking {
            record_id: "m1".to_string(),
            subject: "u1".to_string(),
            mood: 6.5,
            energy: None,
            anxiety: Some(3.0),
            notes: Some("walk, then \"tea\"\nfelt better".to_string()),
            recorded_at: Some(start + Duration::days(2)),
        });
        let mut sessions = Collection::empty();
        sessions.records.push(TherapeuticSession {
            record_id: "s1".to_string(),
            subject: "u1".to_string(),
            practice: "body scan".to_string(),
            duration_minutes: 30.0,
            completed: true,
            notes: None,
            started_at: Some(start + Duration::days(3)),
        });
        let mut crisis = Collection::empty();
        crisis.records.push(CrisisEntry {
            record_id: "c1".to_string(),
            subject: "u1".to_string(),
            content: CrisisContent::Detailed {
                risk_score: 8.0,
                suicidal_ideation: true,
                safety_plan: Some(SafetyPlan {
                    warning_signs: vec!["isolation".to_string()],
                    coping_strategies: vec![],
                    emergency_contacts: vec![EmergencyContact {
                        name: "Contact 1".to_string(),
                        phone: "[redacted]".to_string(),
                    }],
                }),
            },
            recorded_at: Some(start + Duration::days(4)),
        });
        crisis.records.push(CrisisEntry {
            record_id: "c2".to_string(),
            subject: "u1".to_string(),
            content: CrisisContent::Coarse {
                risk: RiskCategory::Elevated,
            },
            recorded_at: None,
        });
        ClinicalExportData {
            export_id: ExportId::new(),
            subject: "u1".to_string(),
            time_range: TimeRange::new(start, start + Duration::days(28)),
            anonymization: AnonymizationLevel::None,
            assessments,
            mood,
            sessions,
            crisis: Some(crisis),
            omissions: vec![Omission {
                category: DataCategory::MbctProgress,
                reason: OmissionReason::AccessDenied,
            }],
            summary: ExportSummary::default(),
        }
    }

    fn column_counts(bytes: &[u8]) -> Vec<usize> {
        csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes)
            .records()
            .map(|r| r.unwrap().len())
            .collect()
    }

    #[test]
    fn test_every_layout_is_rectangular_and_valid() {
        let exporter = CsvExporter::new();
        for structure in [CsvStructure::Flat, CsvStructure::Normalized, CsvStructure::Hierarchical] {
            let bytes = exporter.render_bytes(&data(), structure).unwrap();
            let counts = column_counts(&bytes);
            assert!(counts.len() > 1, "{:?} produced no rows", structure);
            assert!(counts.iter().all(|c| *c == counts[0]), "{:?} is ragged", structure);
            let validation = validate_csv_integrity(&bytes, structure);
            assert!(validation.is_valid(), "{:?}: {:?}", structure, validation.errors);
        }
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let exporter = CsvExporter::new();
        let data = data();
        for structure in [CsvStructure::Flat, CsvStructure::Normalized, CsvStructure::Hierarchical] {
            assert_eq!(
                exporter.render_bytes(&data, structure).unwrap(),
                exporter.render_bytes(&data, structure).unwrap()
            );
        }
    }

    #[test]
    fn test_flat_header_and_crisis_row() {
        let bytes = CsvExporter::new().render_bytes(&data(), CsvStructure::Flat).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("category,record_id,subject,timestamp,instrument,score"));
        assert!(text.contains("assessments,a1,u1,2024-02-02T00:00:00Z,PHQ-9,25,severe,true,true,3;3;3;3;3;3;3;3;1"));
        assert!(text.contains("crisis-safety,c2,u1,,"));
    }

    #[test]
    fn test_normalized_has_foreign_keyed_tables() {
        let bytes = CsvExporter::new().render_bytes(&data(), CsvStructure::Normalized).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("assessment_items,header,assessment_id,item_number,item_score"));
        assert!(text.contains("assessment_items,data,a1,9,1"));
        assert!(text.contains("safety_plan_items,data,c1,warning_sign,isolation"));
        assert!(text.contains("omissions,data,mbct-progress"));
    }

    #[test]
    fn test_hierarchical_parent_links() {
        let bytes = CsvExporter::new().render_bytes(&data(), CsvStructure::Hierarchical).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("1,category,category:assessments,"));
        assert!(text.contains("2,assessment,a1,category:assessments,PHQ-9,25,"));
        assert!(text.contains("3,item,a1:item9,a1,item_9,1,"));
    }

    #[test]
    fn test_empty_file_is_invalid() {
        let validation = validate_csv_integrity(b"", CsvStructure::Flat);
        assert!(!validation.is_valid());
        assert!(!validation.structure_valid);
    }

    #[test]
    fn test_ragged_truncated_and_mistyped_files_are_invalid() {
        let ragged = validate_csv_integrity(b"a,b\n1\n", CsvStructure::Flat);
        assert!(!ragged.structure_valid);

        let truncated = validate_csv_integrity(b"a,b\n1,2", CsvStructure::Flat);
        assert!(!truncated.integrity_maintained);

        let mistyped = validate_csv_integrity(b"score,completed\nhigh,yes\n", CsvStructure::Flat);
        assert!(!mistyped.data_types_valid);
        assert_eq!(mistyped.errors.len(), 2);

        let not_utf8 = validate_csv_integrity(&[b'a', b'\n', 0xff, b'\n'], CsvStructure::Flat);
        assert!(!not_utf8.data_types_valid);
    }
}
