//! Clinical PDF report.

use crate::document::{Block, DocumentContent, Section, StyleConfig};
use crate::engine::{RenderEngine, TextPdfEngine, ALT_MARKER, SECTION_MARKER, THEME_MARKER};
use crate::error::Result;
use crate::FormatRenderer;
use async_trait::async_trait;
use chrono::SecondsFormat;
use clinexport_core::{
    ClinicalExportData, CrisisContent, ExportFormat, GenerationResult, GenerationValidation,
    RenderOptions, Time,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Renders canonical export data as a themed PDF report.
#[derive(Clone)]
pub struct PdfReportRenderer {
    engine: Arc<dyn RenderEngine>,
}

impl Default for PdfReportRenderer {
    fn default() -> Self {
        Self::new(Arc::new(TextPdfEngine::new()))
    }
}

impl PdfReportRenderer {
    /// Create a renderer over an engine.
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self { engine }
    }

    /// Build the document for `data`. Apart from `generated_at`, the result
    /// depends only on `data` and `options`.
    pub fn build_document(
        &self,
        data: &ClinicalExportData,
        options: &RenderOptions,
        generated_at: Time,
    ) -> DocumentContent {
        let mut sections = vec![summary_section(data)];

        if !data.assessments.is_empty() {
            let mut section = Section::new("assessments", "Standardized Assessments");
            section.push(quality_line(data.assessments.data_quality));
            section.push(Block::Table {
                headers: strings(&["Date", "Instrument", "Score", "Severity", "Crisis", "Ideation"]),
                rows: data
                    .assessments
                    .records
                    .iter()
                    .map(|a| {
                        vec![
                            date(a.completed_at),
                            a.kind.label().to_string(),
                            number(a.score),
                            a.severity.as_str().to_string(),
                            yes_no(a.is_crisis_level),
                            yes_no(a.has_suicidal_ideation),
                        ]
                    })
                    .collect(),
            });
            if options.include_charts {
                let points: Vec<_> = data
                    .assessments
                    .records
                    .iter()
                    .map(|a| (format!("{} {}", a.kind.label(), day(a.completed_at)), a.score))
                    .collect();
                section.push(Block::Chart {
                    title: "Assessment scores over time".to_string(),
                    alt_text: format!(
                        "Bar chart of {} questionnaire totals in chronological order",
                        points.len()
                    ),
                    points,
                });
            }
            sections.push(section);
        }

        if !data.mood.is_empty() {
            let mut section = Section::new("mood-tracking", "Mood Tracking");
            section.push(quality_line(data.mood.data_quality));
            section.push(Block::Table {
                headers: strings(&["Date", "Mood", "Energy", "Anxiety", "Notes"]),
                rows: data
                    .mood
                    .records
                    .iter()
                    .map(|m| {
                        vec![
                            date(m.recorded_at),
                            number(m.mood),
                            m.energy.map(number).unwrap_or_default(),
                            m.anxiety.map(number).unwrap_or_default(),
                            m.notes.clone().unwrap_or_default(),
                        ]
                    })
                    .collect(),
            });
            if options.include_charts {
                let points: Vec<_> = data
                    .mood
                    .records
                    .iter()
                    .map(|m| (day(m.recorded_at), m.mood))
                    .collect();
                section.push(Block::Chart {
                    title: "Mood trend".to_string(),
                    alt_text: format!(
                        "Bar chart of {} mood ratings on a 1 to 10 scale in chronological order",
                        points.len()
                    ),
                    points,
                });
            }
            sections.push(section);
        }

        if !data.sessions.is_empty() {
            let mut section = Section::new("mbct-progress", "MBCT Practice");
            section.push(quality_line(data.sessions.data_quality));
            let completed = data.sessions.records.iter().filter(|s| s.completed).count();
            let minutes: f64 = data.sessions.records.iter().map(|s| s.duration_minutes).sum();
            section.push(Block::Paragraph(format!(
                "{} of {} sessions completed, {} minutes of practice in total.",
                completed,
                data.sessions.len(),
                number(minutes)
            )));
            section.push(Block::Table {
                headers: strings(&["Date", "Practice", "Minutes", "Completed"]),
                rows: data
                    .sessions
                    .records
                    .iter()
                    .map(|s| {
                        vec![
                            date(s.started_at),
                            s.practice.clone(),
                            number(s.duration_minutes),
                            yes_no(s.completed),
                        ]
                    })
                    .collect(),
            });
            sections.push(section);
        }

        if let Some(crisis) = &data.crisis {
            let mut section = Section::new("crisis-safety", "Crisis & Safety");
            if crisis.is_empty() {
                section.push(Block::Paragraph("No crisis assessments in this period.".to_string()));
            }
            for entry in &crisis.records {
                section.push(Block::Paragraph(match &entry.content {
                    CrisisContent::Detailed {
                        risk_score,
                        suicidal_ideation,
                        safety_plan,
                    } => {
                        let mut text = format!(
                            "{}: risk score {}, suicidal ideation {}.",
                            date(entry.recorded_at),
                            number(*risk_score),
                            yes_no(*suicidal_ideation)
                        );
                        if let Some(plan) = safety_plan {
                            text.push_str(&format!(
                                " Safety plan: {} warning signs, {} coping strategies, contacts: {}.",
                                plan.warning_signs.len(),
                                plan.coping_strategies.len(),
                                plan.emergency_contacts
                                    .iter()
                                    .map(|c| format!("{} ({})", c.name, c.phone))
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            ));
                        }
                        text
                    }
                    CrisisContent::Coarse { risk } => {
                        format!("{}: risk category {}.", date(entry.recorded_at), risk.as_str())
                    }
                }));
            }
            sections.push(section);
        }

        if !data.omissions.is_empty() {
            let mut section = Section::new("omissions", "Omitted Data");
            for omission in &data.omissions {
                section.push(Block::Paragraph(omission.note()));
            }
            sections.push(section);
        }

        DocumentContent {
            title: "Clinical Data Export".to_string(),
            metadata: vec![
                ("Export".to_string(), data.export_id.to_string()),
                ("Subject".to_string(), data.subject.clone()),
                (
                    "Period".to_string(),
                    format!(
                        "{} to {}",
                        data.time_range.start.format("%Y-%m-%d"),
                        data.time_range.end.format("%Y-%m-%d")
                    ),
                ),
                ("Anonymization".to_string(), data.anonymization.to_string()),
            ],
            generated_at,
            sections,
        }
    }
}

#[async_trait]
impl FormatRenderer for PdfReportRenderer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Pdf
    }

    async fn render(
        &self,
        data: &ClinicalExportData,
        options: &RenderOptions,
        output: &Path,
    ) -> Result<GenerationResult> {
        let started = Instant::now();
        let document = self.build_document(data, options, chrono::Utc::now());
        let style = StyleConfig::for_theme(options.theme);

        debug!("Rendering PDF with engine {}", self.engine.name());
        let artifact = self.engine.render(&document, &style).await?;
        tokio::fs::write(output, &artifact.bytes).await?;

        let validation = validate_pdf_structure(&artifact.bytes, &document, &style);
        if !validation.is_valid() {
            warn!("PDF validation failed: {}", validation.errors.join("; "));
        }

        Ok(GenerationResult {
            file_path: output.to_path_buf(),
            file_size: artifact.bytes.len() as u64,
            record_count: data.record_count(),
            page_count: artifact.page_count,
            generation_time_ms: started.elapsed().as_millis() as u64,
            validation,
        })
    }
}

/// Check engine output for structure and accessibility. Every check is a
/// gate: any failure makes the result invalid.
pub fn validate_pdf_structure(
    bytes: &[u8],
    document: &DocumentContent,
    style: &StyleConfig,
) -> GenerationValidation {
    let mut validation = GenerationValidation::passed();

    if bytes.is_empty() {
        validation.structure_valid = false;
        validation.integrity_maintained = false;
        validation.accessibility_compliant = false;
        validation.errors.push("PDF file is empty".to_string());
        return validation;
    }

    let text = String::from_utf8_lossy(bytes);
    if !text.starts_with("%PDF-") {
        validation.structure_valid = false;
        validation.errors.push("missing PDF header".to_string());
    }
    if !text.trim_end().ends_with("%%EOF") {
        validation.structure_valid = false;
        validation.integrity_maintained = false;
        validation.errors.push("missing end-of-file marker".to_string());
    }
    for marker in document.expected_markers() {
        if !text.contains(&format!("{} {}", SECTION_MARKER, marker)) {
            validation.structure_valid = false;
            validation.errors.push(format!("missing section marker '{}'", marker));
        }
    }

    if !style.meets_contrast() {
        validation.accessibility_compliant = false;
        validation.errors.push("text contrast below minimum ratio".to_string());
    }
    if !text.contains(&format!("{} {}", THEME_MARKER, style.contrast_class())) {
        validation.accessibility_compliant = false;
        validation.errors.push("contrast class not applied".to_string());
    }
    for chart in document.charts() {
        if let Block::Chart { title, alt_text, .. } = chart {
            let declared = !alt_text.trim().is_empty();
            if !declared || !text.contains(&format!("{} {}", ALT_MARKER, alt_text)) {
                validation.accessibility_compliant = false;
                validation.errors.push(format!("chart '{}' has no alt text", title));
            }
        }
    }

    validation
}

fn summary_section(data: &ClinicalExportData) -> Section {
    let summary = &data.summary;
    let mut section = Section::new("summary", "Summary");
    section.push(Block::Table {
        headers: strings(&["Category", "Records"]),
        rows: vec![
            vec!["Assessments".to_string(), summary.assessment_count.to_string()],
            vec!["Mood check-ins".to_string(), summary.mood_entry_count.to_string()],
            vec!["MBCT sessions".to_string(), summary.session_count.to_string()],
            vec!["Crisis assessments".to_string(), summary.crisis_entry_count.to_string()],
        ],
    });
    if summary.crisis_indicators_present {
        section.push(Block::Paragraph(
            "Crisis indicators are present in this period. Review the flagged records.".to_string(),
        ));
    }
    section
}

fn quality_line(quality: f64) -> Block {
    Block::Paragraph(format!("Data quality: {:.0}% of records passed validation.", quality * 100.0))
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn number(value: f64) -> String {
    value.to_string()
}

fn yes_no(flag: bool) -> String {
    let text = if flag { "yes" } else { "no" };
    text.to_string()
}

fn date(t: Option<Time>) -> String {
    t.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "unknown".to_string())
}

fn day(t: Option<Time>) -> String {
    t.map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RenderedArtifact;
    use chrono::{Duration, TimeZone, Utc};
    use clinexport_core::{
        AnonymizationLevel, Collection, DataCategory, ExportId, ExportSummary, MoodTracking,
        Omission, OmissionReason, ReportTheme, TimeRange,
    };

    fn sample_data() -> ClinicalExportData {
        let start = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let mut mood = Collection::empty();
        mood.records = (0..3)
            .map(|i| MoodTracking {
                record_id: format!("m{}", i),
                subject: "u1".to_string(),
                mood: 4.0 + i as f64,
                energy: Some(5.0),
                anxiety: None,
                notes: None,
                recorded_at: Some(start + Duration::days(i)),
            })
            .collect();
        ClinicalExportData {
            export_id: ExportId::new(),
            subject: "u1".to_string(),
            time_range: TimeRange::new(start, start + Duration::days(30)),
            anonymization: AnonymizationLevel::None,
            assessments: Collection::empty(),
            mood,
            sessions: Collection::empty(),
            crisis: None,
            omissions: vec![Omission {
                category: DataCategory::Assessments,
                reason: OmissionReason::ConsentNotGranted,
            }],
            summary: ExportSummary {
                mood_entry_count: 3,
                ..Default::default()
            },
        }
    }

    struct EmptyEngine;

    #[async_trait]
    impl RenderEngine for EmptyEngine {
        fn name(&self) -> &str {
            "empty"
        }

        async fn render(&self, _: &DocumentContent, _: &StyleConfig) -> Result<RenderedArtifact> {
            Ok(RenderedArtifact {
                bytes: Vec::new(),
                page_count: None,
            })
        }
    }

    #[tokio::test]
    async fn test_render_produces_valid_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        let result = PdfReportRenderer::default()
            .render(&sample_data(), &RenderOptions::default(), &path)
            .await
            .unwrap();
        assert!(result.validation.is_valid(), "{:?}", result.validation.errors);
        assert_eq!(result.record_count, 3);
        assert_eq!(result.file_size, std::fs::metadata(&path).unwrap().len());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("%%CLINEXPORT-SECTION omissions"));
        assert!(text.contains("assessments omitted: consent not granted"));
    }

    #[tokio::test]
    async fn test_empty_engine_output_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = PdfReportRenderer::new(Arc::new(EmptyEngine));
        let result = renderer
            .render(&sample_data(), &RenderOptions::default(), &dir.path().join("r.pdf"))
            .await
            .unwrap();
        assert!(!result.validation.is_valid());
        assert_eq!(result.file_size, 0);
    }

    #[tokio::test]
    async fn test_only_creation_date_varies() {
        let renderer = PdfReportRenderer::default();
        let data = sample_data();
        let options = RenderOptions::default();
        let style = StyleConfig::for_theme(options.theme);
        let strip = |bytes: Vec<u8>| {
            let text = String::from_utf8(bytes).unwrap();
            let start = text.find("/CreationDate (").unwrap();
            let end = start + text[start..].find(')').unwrap();
            format!("{}{}", &text[..start], &text[end..])
        };

        let a = renderer.build_document(&data, &options, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let b = renderer.build_document(&data, &options, Utc.with_ymd_and_hms(2025, 6, 7, 8, 9, 10).unwrap());
        let engine = TextPdfEngine::new();
        let bytes_a = engine.render(&a, &style).await.unwrap().bytes;
        let bytes_b = engine.render(&b, &style).await.unwrap().bytes;
        assert_eq!(bytes_a.len(), bytes_b.len());
        assert_ne!(bytes_a, bytes_b);
        assert_eq!(strip(bytes_a), strip(bytes_b));
    }

    #[test]
    fn test_missing_alt_text_fails_accessibility() {
        let renderer = PdfReportRenderer::default();
        let mut document =
            renderer.build_document(&sample_data(), &RenderOptions::default(), Utc::now());
        for section in &mut document.sections {
            for block in &mut section.blocks {
                if let Block::Chart { alt_text, .. } = block {
                    alt_text.clear();
                }
            }
        }
        let style = StyleConfig::for_theme(ReportTheme::Clinical);
        let bytes = b"%PDF-1.4\n%%CLINEXPORT-THEME clinical-aa\n%%EOF\n";
        let validation = validate_pdf_structure(bytes, &document, &style);
        assert!(!validation.accessibility_compliant);
        assert!(!validation.structure_valid);
    }

    #[test]
    fn test_charts_can_be_disabled() {
        let options = RenderOptions {
            include_charts: false,
            ..Default::default()
        };
        let document = PdfReportRenderer::default().build_document(&sample_data(), &options, Utc::now());
        assert_eq!(document.charts().count(), 0);
    }
}
