//! Render engine seam.
//!
//! The pipeline hands structured content to an engine and treats whatever
//! comes back as untrusted: renderers re-validate the bytes afterwards.

use crate::document::{Block, DocumentContent, StyleConfig};
use crate::error::Result;
use async_trait::async_trait;

/// Prefix of the section marker comments in PDF output.
pub const SECTION_MARKER: &str = "%%CLINEXPORT-SECTION";

/// Prefix of the chart text-alternative comments in PDF output.
pub const ALT_MARKER: &str = "%%CLINEXPORT-ALT";

/// Prefix of the contrast class comment in PDF output.
pub const THEME_MARKER: &str = "%%CLINEXPORT-THEME";

/// Bytes produced by an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArtifact {
    /// Artifact content
    pub bytes: Vec<u8>,
    /// Pages, when the engine knows
    pub page_count: Option<usize>,
}

/// Turns document content into a binary artifact.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &str;

    /// Render a document.
    async fn render(&self, document: &DocumentContent, style: &StyleConfig) -> Result<RenderedArtifact>;
}

const PAGE_WIDTH: u32 = 612;
const PAGE_HEIGHT: u32 = 792;
const MARGIN: u32 = 50;
const LINES_PER_PAGE: usize = 50;
const WRAP_AT: usize = 95;

/// Minimal single-font PDF 1.4 writer.
#[derive(Debug, Default, Clone)]
pub struct TextPdfEngine;

impl TextPdfEngine {
    /// Create an engine.
    pub fn new() -> Self {
        Self
    }
}

enum Line {
    Heading(String),
    Body(String),
    Comment(String),
}

#[async_trait]
impl RenderEngine for TextPdfEngine {
    fn name(&self) -> &str {
        "text-pdf"
    }

    async fn render(&self, document: &DocumentContent, style: &StyleConfig) -> Result<RenderedArtifact> {
        let pages = paginate(layout(document));
        let bytes = write_pdf(document, style, &pages);
        Ok(RenderedArtifact {
            bytes,
            page_count: Some(pages.len()),
        })
    }
}

fn layout(document: &DocumentContent) -> Vec<Line> {
    let mut lines = vec![Line::Heading(document.title.clone())];
    for (key, value) in &document.metadata {
        push_wrapped(&mut lines, format!("{}: {}", key, value));
    }
    lines.push(Line::Body(String::new()));

    for section in &document.sections {
        lines.push(Line::Comment(format!("{} {}", SECTION_MARKER, section.marker)));
        lines.push(Line::Heading(section.heading.clone()));
        for block in &section.blocks {
            match block {
                Block::Paragraph(text) => push_wrapped(&mut lines, text.clone()),
                Block::Table { headers, rows } => {
                    let header = headers.join(" | ");
                    let rule = "-".repeat(header.chars().count().min(WRAP_AT));
                    push_wrapped(&mut lines, header);
                    lines.push(Line::Body(rule));
                    for row in rows {
                        push_wrapped(&mut lines, row.join(" | "));
                    }
                }
                Block::Chart {
                    title,
                    alt_text,
                    points,
                } => {
                    lines.push(Line::Comment(format!("{} {}", ALT_MARKER, alt_text)));
                    push_wrapped(&mut lines, format!("Chart: {}", title));
                    for (label, value) in points {
                        let bar = "#".repeat(value.max(0.0).round() as usize);
                        lines.push(Line::Body(format!("{:>12} {:>5.1} {}", label, value, bar)));
                    }
                }
            }
        }
        lines.push(Line::Body(String::new()));
    }
    lines
}

fn push_wrapped(lines: &mut Vec<Line>, text: String) {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        lines.push(Line::Body(String::new()));
        return;
    }
    for chunk in chars.chunks(WRAP_AT) {
        lines.push(Line::Body(chunk.iter().collect()));
    }
}

// Comments do not take vertical space, so only visible lines count.
fn paginate(lines: Vec<Line>) -> Vec<Vec<Line>> {
    let mut pages = vec![Vec::new()];
    let mut visible = 0;
    for line in lines {
        let is_visible = !matches!(line, Line::Comment(_));
        if is_visible && visible == LINES_PER_PAGE {
            pages.push(Vec::new());
            visible = 0;
        }
        if is_visible {
            visible += 1;
        }
        if let Some(page) = pages.last_mut() {
            page.push(line);
        }
    }
    pages
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn content_stream(page: &[Line], style: &StyleConfig) -> String {
    let leading = u32::from(style.font_size) + 4;
    let mut s = format!("{} {}\n", THEME_MARKER, style.contrast_class());
    s.push_str(&format!(
        "{} rg 0 0 {} {} re f\n",
        style.background.pdf_operands(),
        PAGE_WIDTH,
        PAGE_HEIGHT
    ));
    s.push_str(&format!(
        "BT\n{} TL\n{} {} Td\n",
        leading,
        MARGIN,
        PAGE_HEIGHT - MARGIN
    ));
    for line in page {
        match line {
            Line::Comment(text) => {
                // Comments must not span lines.
                s.push_str(&text.replace(['\r', '\n'], " "));
                s.push('\n');
            }
            Line::Heading(text) => s.push_str(&format!(
                "{} rg /F2 {} Tf ({}) Tj T*\n",
                style.accent.pdf_operands(),
                style.font_size + 2,
                escape(text)
            )),
            Line::Body(text) => s.push_str(&format!(
                "{} rg /F1 {} Tf ({}) Tj T*\n",
                style.foreground.pdf_operands(),
                style.font_size,
                escape(text)
            )),
        }
    }
    s.push_str("ET\n");
    s
}

fn write_pdf(document: &DocumentContent, style: &StyleConfig, pages: &[Vec<Line>]) -> Vec<u8> {
    // 1 catalog, 2 pages, 3-4 fonts, 5 info, then a page and its content
    // stream per page.
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| 6 + 2 * i).collect();
    let kids: Vec<String> = page_ids.iter().map(|id| format!("{} 0 R", id)).collect();
    let created = document.generated_at.format("D:%Y%m%d%H%M%SZ");

    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold >>".to_string(),
        format!(
            "<< /Title ({}) /Producer (clinexport) /CreationDate ({}) >>",
            escape(&document.title),
            created
        ),
    ];
    for (page, id) in pages.iter().zip(&page_ids) {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
            PAGE_WIDTH,
            PAGE_HEIGHT,
            id + 1
        ));
        let stream = content_stream(page, style);
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}endstream",
            stream.len(),
            stream
        ));
    }

    let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_at = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        xref.push_str(&format!("{:010} 00000 n \n", offset));
    }
    out.extend_from_slice(xref.as_bytes());
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R /Info 5 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    out
}
