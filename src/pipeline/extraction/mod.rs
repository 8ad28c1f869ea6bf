pub mod types;
pub mod filter;
pub mod ocr;
pub mod pdf_renderer;
pub mod orchestrator;

pub use types::*;
pub use filter::*;
pub use ocr::*;
pub use pdf_renderer::*;
pub use orchestrator::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Unsupported file type '{extension}' for {path} (expected an image, .pdf or .txt)")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("Failed to start OCR command '{command}': {reason}")]
    OcrLaunch { command: String, reason: String },

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("Unrecognized OCR output: {0}")]
    OcrOutput(String),

    #[error("PDF rasterization failed: {0}")]
    PdfRasterization(String),

    #[error("Text encoding error: {0}")]
    EncodingError(String),
}

impl ExtractionError {
    /// Input-validation failures: reported without producing a document.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ExtractionError::FileNotFound(_) | ExtractionError::UnsupportedFormat { .. }
        )
    }
}
