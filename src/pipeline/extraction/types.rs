use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Axis-aligned bounding box in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Smallest box covering both `self` and `other`. Edges past `u32::MAX`
    /// are clamped there.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        BoundingBox {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }
}

/// Where a text block sits on the page. Opaque to everything but output rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoundingRegion {
    /// Tesseract-style box.
    Box(BoundingBox),
    /// Detector polygon (PaddleOCR `dt_polys`), one point per corner.
    Polygon(Vec<[f64; 2]>),
    /// A label standing in for geometry ("Line 3", "bbox_0").
    Label(String),
}

impl fmt::Display for BoundingRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundingRegion::Box(b) => write!(f, "[{}, {}, {}, {}]", b.x, b.y, b.width, b.height),
            BoundingRegion::Polygon(points) => {
                let rendered: Vec<String> = points
                    .iter()
                    .map(|[x, y]| format!("[{x}, {y}]"))
                    .collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            BoundingRegion::Label(label) => f.write_str(label),
        }
    }
}

/// One detected line of text with its recognition confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrBlock {
    pub region: Option<BoundingRegion>,
    pub text: String,
    /// Recognition confidence in [0, 1].
    pub confidence: f32,
}

impl OcrBlock {
    pub fn new(region: Option<BoundingRegion>, text: &str, confidence: f32) -> Self {
        Self {
            region,
            text: text.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// The three input modalities plus literal text from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Image,
    Pdf,
    PlainText,
    RawText,
}

impl InputKind {
    /// True when no OCR ran to produce the text.
    pub fn is_pre_extracted(self) -> bool {
        matches!(self, InputKind::PlainText | InputKind::RawText)
    }
}

/// What a document is read from.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentInput {
    File(PathBuf),
    RawText(String),
}

impl DocumentInput {
    /// Name recorded in metadata.
    pub fn display_name(&self) -> String {
        match self {
            DocumentInput::File(path) => path.display().to_string(),
            DocumentInput::RawText(_) => "raw_text".to_string(),
        }
    }
}

/// Normalised output of the text source adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceText {
    pub raw_text: String,
    /// Reading order as emitted by the OCR engine; pages concatenated.
    pub blocks: Vec<OcrBlock>,
    pub kind: InputKind,
    pub page_count: usize,
}

/// Which OCR collaborator to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngineKind {
    /// `tesseract` CLI, TSV output.
    #[default]
    Tesseract,
    /// A PaddleOCR wrapper command that prints its raw result as JSON.
    Paddle,
}

/// OCR collaborator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub engine: OcrEngineKind,
    /// Executable to run; defaults per engine when absent.
    pub command: Option<String>,
    pub language: String,
    /// Rasterization resolution for PDF pages.
    pub pdf_dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: OcrEngineKind::Tesseract,
            command: None,
            language: "eng".to_string(),
            pdf_dpi: 300,
        }
    }
}

/// OCR collaborator abstraction (allows mocking for tests).
///
/// Implementations hide every detail of the engine's result format and
/// return blocks in reading order.
pub trait OcrEngine {
    fn recognize(&self, image_path: &Path) -> Result<Vec<OcrBlock>, ExtractionError>;
}

/// PDF → page image rasterization.
pub trait PdfRasterizer {
    fn page_count(&self, pdf_path: &Path) -> Result<usize, ExtractionError>;

    /// Render one page (0-based) into `out_dir` and return the image path.
    fn render_page(
        &self,
        pdf_path: &Path,
        page_index: usize,
        dpi: u32,
        out_dir: &Path,
    ) -> Result<PathBuf, ExtractionError>;
}

/// Text source adapter abstraction.
pub trait TextSource {
    fn read(&self, input: &DocumentInput) -> Result<SourceText, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_union_covers_both() {
        let a = BoundingBox { x: 10, y: 10, width: 20, height: 5 };
        let b = BoundingBox { x: 35, y: 8, width: 10, height: 10 };
        assert_eq!(a.union(&b), BoundingBox { x: 10, y: 8, width: 35, height: 10 });
    }

    #[test]
    fn box_union_clamps_oversized_edges() {
        let a = BoundingBox { x: u32::MAX - 5, y: 10, width: 100, height: 5 };
        let b = BoundingBox { x: 100, y: u32::MAX, width: 10, height: 10 };
        let u = a.union(&b);
        assert_eq!(u.x, 100);
        assert_eq!(u.width, u32::MAX - 100);
        assert_eq!(u.y, 10);
        assert_eq!(u.height, u32::MAX - 10);
    }

    #[test]
    fn region_display_forms() {
        let b = BoundingRegion::Box(BoundingBox { x: 1, y: 2, width: 3, height: 4 });
        assert_eq!(b.to_string(), "[1, 2, 3, 4]");
        let p = BoundingRegion::Polygon(vec![[0.0, 1.5], [2.0, 3.0]]);
        assert_eq!(p.to_string(), "[[0, 1.5], [2, 3]]");
        assert_eq!(BoundingRegion::Label("Line 2".into()).to_string(), "Line 2");
    }

    #[test]
    fn block_confidence_clamped() {
        assert_eq!(OcrBlock::new(None, "x", 1.7).confidence, 1.0);
        assert_eq!(OcrBlock::new(None, "x", -0.2).confidence, 0.0);
    }

    #[test]
    fn pre_extracted_kinds() {
        assert!(InputKind::PlainText.is_pre_extracted());
        assert!(InputKind::RawText.is_pre_extracted());
        assert!(!InputKind::Pdf.is_pre_extracted());
    }

    #[test]
    fn ocr_config_defaults() {
        let cfg = OcrConfig::default();
        assert_eq!(cfg.engine, OcrEngineKind::Tesseract);
        assert_eq!(cfg.pdf_dpi, 300);
        assert!(cfg.command.is_none());
    }
}
