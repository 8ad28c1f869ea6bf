//! Result persistence: the JSON result file and a human-readable raw OCR dump,
//! both stamped with the same local timestamp.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::Local;

use super::processor::{ProcessingError, ProcessingOutput};
use crate::config::{raw_data_dir, results_dir};

const RULE: &str = "==================================================";

/// Paths written for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPaths {
    pub result_json: PathBuf,
    pub raw_dump: PathBuf,
}

/// Writes results under `<root>/Results/JSON` and `<root>/raw_data`.
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Save with the current local time as the file stamp.
    pub fn save(&self, output: &ProcessingOutput) -> Result<SavedPaths, ProcessingError> {
        let now = Local::now();
        self.save_stamped(
            output,
            &now.format("%Y%m%d_%H%M%S").to_string(),
            &now.format("%Y-%m-%d %H:%M:%S").to_string(),
        )
    }

    /// Save using a fixed file stamp (`YYYYmmdd_HHMMSS`) and display time.
    pub fn save_stamped(
        &self,
        output: &ProcessingOutput,
        stamp: &str,
        display_time: &str,
    ) -> Result<SavedPaths, ProcessingError> {
        let json_dir = results_dir(&self.root);
        let dump_dir = raw_data_dir(&self.root);
        create_dir(&json_dir)?;
        create_dir(&dump_dir)?;

        let raw_dump = dump_dir.join(format!("raw_{stamp}.txt"));
        write_file(&raw_dump, &render_raw_dump(output, display_time))?;

        let result_json = json_dir.join(format!("insurance_data_{stamp}.json"));
        let body = serde_json::to_string_pretty(&output.document).map_err(|e| {
            ProcessingError::Storage {
                path: result_json.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        write_file(&result_json, &body)?;

        tracing::info!(
            result = %result_json.display(),
            raw_dump = %raw_dump.display(),
            "Results saved"
        );

        Ok(SavedPaths {
            result_json,
            raw_dump,
        })
    }
}

/// Plain-text dump of the text source output.
pub fn render_raw_dump(output: &ProcessingOutput, display_time: &str) -> String {
    let mut dump = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(dump, "Image: {}", output.source_name);
    let _ = writeln!(dump, "Extraction Time: {display_time}");
    let _ = writeln!(dump, "OCR Confidence: {:.2}%", output.metrics.ocr_confidence * 100.0);
    let _ = writeln!(dump, "Total Text Blocks: {}", output.source.blocks.len());
    let _ = writeln!(dump, "{RULE}\nRAW OCR TEXT:\n{RULE}");
    let _ = writeln!(dump, "{}", output.source.raw_text);
    let _ = writeln!(dump, "{RULE}\nDETAILED OCR RESULTS:\n{RULE}");

    for (i, block) in output.source.blocks.iter().enumerate() {
        let position = block
            .region
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown".to_string());
        let _ = writeln!(
            dump,
            "Block {}: {} (confidence: {:.2}%)",
            i + 1,
            block.text,
            f64::from(block.confidence) * 100.0
        );
        let _ = writeln!(dump, "  Position: {position}\n");
    }
    dump
}

fn create_dir(dir: &Path) -> Result<(), ProcessingError> {
    std::fs::create_dir_all(dir).map_err(|e| ProcessingError::Storage {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })
}

fn write_file(path: &Path, content: &str) -> Result<(), ProcessingError> {
    std::fs::write(path, content).map_err(|e| ProcessingError::Storage {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
