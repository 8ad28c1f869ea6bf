use std::path::Path;

use super::types::{
    BoundingRegion, DocumentInput, InputKind, OcrBlock, OcrEngine, PdfRasterizer, SourceText,
    TextSource,
};
use super::ExtractionError;

/// Image extensions accepted when none are configured.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif"];

pub const DEFAULT_PDF_DPI: u32 = 300;

/// Concrete text source adapter.
/// Uses trait objects for OCR and PDF rasterization, enabling dependency injection.
pub struct DocumentTextSource {
    ocr_engine: Box<dyn OcrEngine + Send + Sync>,
    pdf_rasterizer: Box<dyn PdfRasterizer + Send + Sync>,
    image_extensions: Vec<String>,
    pdf_dpi: u32,
}

impl DocumentTextSource {
    pub fn new(
        ocr_engine: Box<dyn OcrEngine + Send + Sync>,
        pdf_rasterizer: Box<dyn PdfRasterizer + Send + Sync>,
    ) -> Self {
        Self {
            ocr_engine,
            pdf_rasterizer,
            image_extensions: DEFAULT_IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            pdf_dpi: DEFAULT_PDF_DPI,
        }
    }

    /// Replace the accepted image extensions (compared case-insensitively, without the dot).
    pub fn with_image_extensions(mut self, extensions: &[String]) -> Self {
        self.image_extensions = extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_pdf_dpi(mut self, dpi: u32) -> Self {
        self.pdf_dpi = dpi;
        self
    }

    /// Map a file path to its modality, rejecting anything that is not an
    /// accepted image type, `.pdf` or `.txt`.
    pub fn classify(&self, path: &Path) -> Result<InputKind, ExtractionError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(InputKind::Pdf),
            "txt" => Ok(InputKind::PlainText),
            ext if self.image_extensions.iter().any(|known| known == ext) => Ok(InputKind::Image),
            _ => Err(ExtractionError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }

    fn read_image(&self, path: &Path) -> Result<SourceText, ExtractionError> {
        let blocks = self.ocr_engine.recognize(path)?;
        Ok(SourceText {
            raw_text: join_block_text(&blocks),
            blocks,
            kind: InputKind::Image,
            page_count: 1,
        })
    }

    /// Rasterize and OCR page by page. Each page image lives in its own
    /// temporary directory, removed before the next page starts.
    fn read_pdf(&self, path: &Path) -> Result<SourceText, ExtractionError> {
        let page_count = self.pdf_rasterizer.page_count(path)?;
        let mut raw_text = String::new();
        let mut blocks = Vec::new();

        for page_index in 0..page_count {
            let page_dir = tempfile::Builder::new()
                .prefix("autopolicy-page-")
                .tempdir()?;

            let page_result = self
                .pdf_rasterizer
                .render_page(path, page_index, self.pdf_dpi, page_dir.path())
                .and_then(|image| self.ocr_engine.recognize(&image));

            let dir_path = page_dir.path().to_path_buf();
            if let Err(e) = page_dir.close() {
                tracing::warn!(
                    page = page_index + 1,
                    dir = %dir_path.display(),
                    error = %e,
                    "Failed to remove temporary page image"
                );
            }

            let page_blocks = page_result?;
            if page_index > 0 {
                raw_text.push_str(&page_separator(page_index + 1));
            }
            raw_text.push_str(&join_block_text(&page_blocks));

            tracing::debug!(
                page = page_index + 1,
                blocks = page_blocks.len(),
                "OCR complete for PDF page"
            );
            blocks.extend(page_blocks);
        }

        Ok(SourceText {
            raw_text,
            blocks,
            kind: InputKind::Pdf,
            page_count,
        })
    }

    fn read_plain_text(&self, path: &Path) -> Result<SourceText, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let text =
            String::from_utf8(bytes).map_err(|e| ExtractionError::EncodingError(e.to_string()))?;
        Ok(pre_extracted(text, InputKind::PlainText))
    }
}

impl TextSource for DocumentTextSource {
    fn read(&self, input: &DocumentInput) -> Result<SourceText, ExtractionError> {
        let path = match input {
            DocumentInput::RawText(text) => return Ok(pre_extracted(text.clone(), InputKind::RawText)),
            DocumentInput::File(path) => path,
        };

        if !path.is_file() {
            return Err(ExtractionError::FileNotFound(path.clone()));
        }

        let kind = self.classify(path)?;
        tracing::info!(path = %path.display(), kind = ?kind, "Reading document");

        let source = match kind {
            InputKind::Image => self.read_image(path)?,
            InputKind::Pdf => self.read_pdf(path)?,
            InputKind::PlainText | InputKind::RawText => self.read_plain_text(path)?,
        };

        tracing::info!(
            kind = ?source.kind,
            pages = source.page_count,
            blocks = source.blocks.len(),
            text_length = source.raw_text.len(),
            "Text source complete"
        );
        Ok(source)
    }
}

/// Marker placed before page `page_number` (2 and up) in concatenated PDF text.
pub fn page_separator(page_number: usize) -> String {
    format!("\n--- PAGE {page_number} ---\n")
}

/// Blocks for text that needs no OCR: one per non-empty trimmed line,
/// full confidence, labelled `Line <n>`.
pub fn text_blocks(text: &str) -> Vec<OcrBlock> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| {
            OcrBlock::new(Some(BoundingRegion::Label(format!("Line {}", i + 1))), line, 1.0)
        })
        .collect()
}

fn pre_extracted(text: String, kind: InputKind) -> SourceText {
    SourceText {
        blocks: text_blocks(&text),
        raw_text: text,
        kind,
        page_count: 1,
    }
}

fn join_block_text(blocks: &[OcrBlock]) -> String {
    blocks
        .iter()
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
