//! PDF page rasterization through Poppler's command-line tools.
//!
//! `pdfinfo` reports the page count, `pdftoppm` renders one page at a time
//! to PNG inside a caller-owned directory.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::types::PdfRasterizer;
use super::ExtractionError;

/// Poppler-backed rasterizer.
pub struct PopplerRasterizer {
    pdfinfo: String,
    pdftoppm: String,
}

impl Default for PopplerRasterizer {
    fn default() -> Self {
        Self {
            pdfinfo: "pdfinfo".to_string(),
            pdftoppm: "pdftoppm".to_string(),
        }
    }
}

impl PopplerRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the executables (non-standard install locations).
    pub fn with_commands(pdfinfo: &str, pdftoppm: &str) -> Self {
        Self {
            pdfinfo: pdfinfo.to_string(),
            pdftoppm: pdftoppm.to_string(),
        }
    }
}

impl PdfRasterizer for PopplerRasterizer {
    fn page_count(&self, pdf_path: &Path) -> Result<usize, ExtractionError> {
        let output = Command::new(&self.pdfinfo)
            .arg(pdf_path)
            .output()
            .map_err(|e| {
                ExtractionError::PdfRasterization(format!("{} failed to start: {e}", self.pdfinfo))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::PdfRasterization(format!(
                "{} failed for {}: {}",
                self.pdfinfo,
                pdf_path.display(),
                stderr.trim()
            )));
        }

        parse_pdfinfo_pages(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ExtractionError::PdfRasterization(format!(
                "no page count reported for {}",
                pdf_path.display()
            ))
        })
    }

    fn render_page(
        &self,
        pdf_path: &Path,
        page_index: usize,
        dpi: u32,
        out_dir: &Path,
    ) -> Result<PathBuf, ExtractionError> {
        // pdftoppm pages are 1-based
        let page_number = (page_index + 1).to_string();
        let prefix = out_dir.join(format!("page_{page_number}"));

        let output = Command::new(&self.pdftoppm)
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(&page_number)
            .arg("-l")
            .arg(&page_number)
            .arg("-png")
            .arg("-singlefile")
            .arg(pdf_path)
            .arg(&prefix)
            .output()
            .map_err(|e| {
                ExtractionError::PdfRasterization(format!("{} failed to start: {e}", self.pdftoppm))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::PdfRasterization(format!(
                "{} failed for page {page_number}: {}",
                self.pdftoppm,
                stderr.trim()
            )));
        }

        let image_path = prefix.with_extension("png");
        if !image_path.exists() {
            return Err(ExtractionError::PdfRasterization(format!(
                "{} did not produce {}",
                self.pdftoppm,
                image_path.display()
            )));
        }

        tracing::debug!(page = page_index + 1, dpi, path = %image_path.display(), "Rendered PDF page");
        Ok(image_path)
    }
}

/// Read the `Pages:` line of `pdfinfo` output.
pub fn parse_pdfinfo_pages(info: &str) -> Option<usize> {
    info.lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// Rasterizer that writes placeholder page files, for tests without Poppler.
pub struct MockPdfRasterizer {
    pub pages: usize,
}

impl PdfRasterizer for MockPdfRasterizer {
    fn page_count(&self, _pdf_path: &Path) -> Result<usize, ExtractionError> {
        Ok(self.pages)
    }

    fn render_page(
        &self,
        _pdf_path: &Path,
        page_index: usize,
        _dpi: u32,
        out_dir: &Path,
    ) -> Result<PathBuf, ExtractionError> {
        if page_index >= self.pages {
            return Err(ExtractionError::PdfRasterization(format!(
                "page {} out of range ({} pages)",
                page_index + 1,
                self.pages
            )));
        }
        let path = out_dir.join(format!("page_{}.png", page_index + 1));
        std::fs::write(&path, b"")?;
        Ok(path)
    }
}
