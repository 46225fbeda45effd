//! Structured document content handed to a render engine.

use clinexport_core::{ReportTheme, Time};

/// Minimum WCAG AA contrast ratio for body text.
pub const MIN_CONTRAST_RATIO: f64 = 4.5;

/// An sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// WCAG relative luminance.
    pub fn luminance(&self) -> f64 {
        fn channel(c: u8) -> f64 {
            let c = f64::from(c) / 255.0;
            if c <= 0.03928 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        }
        0.2126 * channel(self.0) + 0.7152 * channel(self.1) + 0.0722 * channel(self.2)
    }

    /// WCAG contrast ratio against another color.
    pub fn contrast_ratio(&self, other: &Rgb) -> f64 {
        let (a, b) = (self.luminance(), other.luminance());
        let (hi, lo) = if a > b { (a, b) } else { (b, a) };
        (hi + 0.05) / (lo + 0.05)
    }

    /// Fill color operands for a PDF content stream.
    pub fn pdf_operands(&self) -> String {
        format!(
            "{:.3} {:.3} {:.3}",
            f64::from(self.0) / 255.0,
            f64::from(self.1) / 255.0,
            f64::from(self.2) / 255.0
        )
    }
}

/// Styling applied by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleConfig {
    /// Theme the style was derived from
    pub theme: ReportTheme,
    /// Body text color
    pub foreground: Rgb,
    /// Page color
    pub background: Rgb,
    /// Heading color
    pub accent: Rgb,
    /// Body font size in points
    pub font_size: u8,
}

impl StyleConfig {
    /// Style for a theme.
    pub fn for_theme(theme: ReportTheme) -> Self {
        match theme {
            ReportTheme::Clinical => Self {
                theme,
                foreground: Rgb(0x1a, 0x1a, 0x1a),
                background: Rgb(0xff, 0xff, 0xff),
                accent: Rgb(0x1f, 0x4e, 0x79),
                font_size: 10,
            },
            ReportTheme::HighContrast => Self {
                theme,
                foreground: Rgb(0x00, 0x00, 0x00),
                background: Rgb(0xff, 0xff, 0xff),
                accent: Rgb(0x00, 0x00, 0x00),
                font_size: 12,
            },
        }
    }

    /// Contrast class name written into the artifact.
    pub fn contrast_class(&self) -> &'static str {
        match self.theme {
            ReportTheme::Clinical => "clinical-aa",
            ReportTheme::HighContrast => "high-contrast-aaa",
        }
    }

    /// Whether body and heading text meet the minimum contrast.
    pub fn meets_contrast(&self) -> bool {
        self.foreground.contrast_ratio(&self.background) >= MIN_CONTRAST_RATIO
            && self.accent.contrast_ratio(&self.background) >= MIN_CONTRAST_RATIO
    }
}

/// A content block.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Running text
    Paragraph(String),
    /// A table with a header row
    Table {
        /// Column headers
        headers: Vec<String>,
        /// Rows, each as wide as `headers`
        rows: Vec<Vec<String>>,
    },
    /// A chart with its text alternative
    Chart {
        /// Chart title
        title: String,
        /// Text alternative for assistive technology
        alt_text: String,
        /// Labelled data points
        points: Vec<(String, f64)>,
    },
}

/// A titled document section.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Stable marker written into the artifact
    pub marker: String,
    /// Heading text
    pub heading: String,
    /// Section content
    pub blocks: Vec<Block>,
}

impl Section {
    /// Empty section.
    pub fn new(marker: impl Into<String>, heading: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            heading: heading.into(),
            blocks: Vec::new(),
        }
    }

    /// Append a block.
    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }
}

/// A whole document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentContent {
    /// Document title
    pub title: String,
    /// Key/value pairs shown under the title
    pub metadata: Vec<(String, String)>,
    /// Generation time, written to a single metadata field
    pub generated_at: Time,
    /// Sections in order
    pub sections: Vec<Section>,
}

impl DocumentContent {
    /// Markers every rendering must contain.
    pub fn expected_markers(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.marker.as_str())
    }

    /// Every chart in the document.
    pub fn charts(&self) -> impl Iterator<Item = &Block> {
        self.sections
            .iter()
            .flat_map(|s| s.blocks.iter())
            .filter(|b| matches!(b, Block::Chart { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_themes_meet_contrast() {
        assert!(StyleConfig::for_theme(ReportTheme::Clinical).meets_contrast());
        assert!(StyleConfig::for_theme(ReportTheme::HighContrast).meets_contrast());
    }

    #[test]
    fn test_contrast_ratio_extremes() {
        let black = Rgb(0, 0, 0);
        let white = Rgb(255, 255, 255);
        assert!((black.contrast_ratio(&white) - 21.0).abs() < 1e-6);
        assert!((white.contrast_ratio(&white) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_low_contrast_style_fails() {
        let mut style = StyleConfig::for_theme(ReportTheme::Clinical);
        style.foreground = Rgb(0xcc, 0xcc, 0xcc);
        assert!(!style.meets_contrast());
    }
}
