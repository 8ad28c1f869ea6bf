//! Pipeline configuration.
//!
//! One value carries every per-deployment choice: target schema, prompt
//! budget, completion endpoint and decoding options, OCR collaborator, and
//! text filtering. It is loaded once (file, then CLI overrides) and passed
//! by reference into the constructors that need it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::extraction::orchestrator::DEFAULT_IMAGE_EXTENSIONS;
use crate::pipeline::extraction::types::OcrConfig;
use crate::pipeline::structuring::ollama_types::{
    validate_base_url, validate_model_name, CompletionConfig,
};
use crate::pipeline::structuring::prompt::{DEFAULT_PROMPT_MAX_CHARS, FAST_PROMPT_MAX_CHARS};
use crate::pipeline::structuring::schema::SchemaVariant;

/// Length of the `raw_ocr_text` preview in the output document.
pub const DEFAULT_RAW_TEXT_PREVIEW_CHARS: usize = 500;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub schema_variant: SchemaVariant,
    /// Character budget for document text inside the prompt.
    pub prompt_max_chars: usize,
    /// Apply the keyword/digit line filter before prompting.
    pub filter_text: bool,
    pub raw_text_preview_chars: usize,
    pub completion: CompletionConfig,
    pub ocr: OcrConfig,
    /// Accepted image extensions, without the dot.
    pub image_extensions: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema_variant: SchemaVariant::Flat,
            prompt_max_chars: DEFAULT_PROMPT_MAX_CHARS,
            filter_text: true,
            raw_text_preview_chars: DEFAULT_RAW_TEXT_PREVIEW_CHARS,
            completion: CompletionConfig::default(),
            ocr: OcrConfig::default(),
            image_extensions: DEFAULT_IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl PipelineConfig {
    /// Load from a JSON file; absent fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Short prompt and small output budget for small local models.
    pub fn fast_profile() -> Self {
        let mut config = Self::default();
        config.apply_fast_profile();
        config
    }

    /// Shrink prompt and decoding budgets in place.
    pub fn apply_fast_profile(&mut self) {
        self.prompt_max_chars = FAST_PROMPT_MAX_CHARS;
        self.completion.options.num_predict = Some(600);
        self.completion.options.num_ctx = Some(1024);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_base_url(&self.completion.base_url).map_err(ConfigError::Invalid)?;
        validate_model_name(&self.completion.model).map_err(ConfigError::Invalid)?;
        if self.prompt_max_chars == 0 {
            return Err(ConfigError::Invalid("prompt_max_chars must be positive".into()));
        }
        if self.ocr.pdf_dpi == 0 {
            return Err(ConfigError::Invalid("ocr.pdf_dpi must be positive".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
