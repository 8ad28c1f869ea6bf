//! Document Processing Orchestrator.
//!
//! Single entry point that drives one document through the pipeline:
//! text source → filter → prompt → completion → normalise → score →
//! metadata and timing attachment.
//!
//! Uses trait-based DI for the collaborators (TextSource, LlmClient)
//! so the orchestrator remains fully testable with mock implementations.

use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::config::DOCUMENT_TYPE;
use crate::pipeline::extraction::filter::filter_relevant_lines;
use crate::pipeline::extraction::ocr::build_ocr_engine;
use crate::pipeline::extraction::orchestrator::DocumentTextSource;
use crate::pipeline::extraction::pdf_renderer::PopplerRasterizer;
use crate::pipeline::extraction::types::{
    DocumentInput, InputKind, OcrBlock, OcrEngineKind, SourceText, TextSource,
};
use crate::pipeline::extraction::ExtractionError;
use crate::pipeline::structuring::confidence::{mean_ocr_confidence, score_document};
use crate::pipeline::structuring::ollama::OllamaClient;
use crate::pipeline::structuring::parser::normalize_response;
use crate::pipeline::structuring::prompt::{build_extraction_prompt, truncate_chars};
use crate::pipeline::structuring::sanitize::sanitize_for_prompt;
use crate::pipeline::structuring::types::{
    CompletenessMetrics, ExtractionDocument, LlmClient, NormalizeOutcome,
};
use crate::pipeline::structuring::StructuringError;
use crate::pipeline_config::{ConfigError, PipelineConfig};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that end a document's processing without an output document.
///
/// Completion and parse failures are absent on purpose: they degrade to the
/// fallback document instead.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Completion client setup failed: {0}")]
    Structuring(#[from] StructuringError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to save results to {path}: {reason}")]
    Storage { path: String, reason: String },
}

impl ProcessingError {
    /// Missing or unsupported input file.
    pub fn is_input_error(&self) -> bool {
        matches!(self, ProcessingError::Extraction(e) if e.is_input_error())
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Wall-clock seconds per stage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StageTimings {
    pub ocr_time_seconds: f64,
    pub ai_processing_time_seconds: f64,
    pub total_time_seconds: f64,
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone)]
pub struct ProcessingOutput {
    /// Final output document, derived fields attached.
    pub document: ExtractionDocument,
    pub source: SourceText,
    pub metrics: CompletenessMetrics,
    /// False when the fallback document was substituted.
    pub succeeded: bool,
    pub timings: StageTimings,
    pub source_name: String,
}

/// The three fields printed by `--summary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub policy_number: String,
    pub policy_holder: String,
    pub insurer: String,
}

impl DocumentSummary {
    /// Read the summary from either schema variant; missing fields are empty.
    pub fn from_document(document: &ExtractionDocument) -> Self {
        Self {
            policy_number: first_text(
                document,
                &["policy_number", "policy_information.policy_number"],
            ),
            policy_holder: first_text(
                document,
                &["policyholder_details.full_name", "policy_holder.full_name"],
            ),
            insurer: first_text(
                document,
                &[
                    "policy_information.insurance_company",
                    "policy_information.insurer",
                    "insurer",
                ],
            ),
        }
    }
}

/// First non-empty string found at any of `paths`; annotated leaves are unwrapped.
fn first_text(document: &ExtractionDocument, paths: &[&str]) -> String {
    paths
        .iter()
        .filter_map(|path| document.pointer(path))
        .map(|v| match v.get("value") {
            Some(inner) => inner,
            None => v,
        })
        .filter_map(Value::as_str)
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default()
        .to_string()
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives one document at a time through the pipeline. Holds no per-document
/// state, so one instance can process documents one after another.
pub struct DocumentProcessor {
    source: Box<dyn TextSource + Send + Sync>,
    llm: Box<dyn LlmClient + Send + Sync>,
    config: PipelineConfig,
}

impl DocumentProcessor {
    pub fn new(
        source: Box<dyn TextSource + Send + Sync>,
        llm: Box<dyn LlmClient + Send + Sync>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            llm,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Filter, sanitise and embed document text in the extraction prompt.
    pub fn build_prompt(&self, raw_text: &str) -> String {
        let filtered = if self.config.filter_text {
            filter_relevant_lines(raw_text)
        } else {
            raw_text.to_string()
        };
        let cleaned = sanitize_for_prompt(&filtered);
        build_extraction_prompt(&cleaned, self.config.schema_variant, self.config.prompt_max_chars)
    }

    /// Run the full pipeline on one input.
    ///
    /// Only text source failures (bad input, OCR failure) are errors. A
    /// failed or unusable completion still yields a schema-complete document.
    pub fn process(&self, input: &DocumentInput) -> Result<ProcessingOutput, ProcessingError> {
        let total_start = Instant::now();
        let source_name = input.display_name();
        let variant = self.config.schema_variant;

        // Step 1: text source
        let ocr_start = Instant::now();
        let source = self.source.read(input)?;
        let ocr_time_seconds = if source.kind.is_pre_extracted() {
            0.0
        } else {
            ocr_start.elapsed().as_secs_f64()
        };
        let ocr_confidence = mean_ocr_confidence(&source.blocks);

        tracing::info!(
            doc = %source_name,
            blocks = source.blocks.len(),
            ocr_confidence,
            elapsed_ms = (ocr_time_seconds * 1000.0) as u64,
            "Processing: text source complete"
        );

        // Steps 2-3: filter + prompt
        let prompt = self.build_prompt(&source.raw_text);

        // Steps 4-5: completion + normalisation
        let ai_start = Instant::now();
        let response = match self.llm.generate(&prompt) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    doc = %source_name,
                    error = %e,
                    "Completion failed, continuing with empty response"
                );
                String::new()
            }
        };
        let outcome = normalize_response(&response, variant);
        let ai_processing_time_seconds = ai_start.elapsed().as_secs_f64();

        let normalization = match &outcome {
            NormalizeOutcome::Parsed { repaired: false, .. } => "parsed",
            NormalizeOutcome::Parsed { repaired: true, .. } => "repaired",
            NormalizeOutcome::Fallback { .. } => "fallback",
        };
        let (mut document, succeeded) = outcome.into_parts();

        // Step 6: scoring
        let metrics = score_document(&document, ocr_confidence);

        // Step 7: derived fields
        document.insert("text_blocks", text_blocks_value(&source.blocks));
        document.insert(
            "raw_ocr_text",
            Value::String(preview(&source.raw_text, self.config.raw_text_preview_chars)),
        );
        let metadata = self.metadata(&document, &source_name, source.kind);
        document.insert("document_metadata", metadata);
        document.insert(
            "accuracy_metrics",
            serde_json::to_value(&metrics).unwrap_or(Value::Null),
        );

        let timings = StageTimings {
            ocr_time_seconds,
            ai_processing_time_seconds,
            total_time_seconds: total_start.elapsed().as_secs_f64(),
        };
        document.insert(
            "processing_metrics",
            json!({
                "ocr_time_seconds": timings.ocr_time_seconds,
                "ai_processing_time_seconds": timings.ai_processing_time_seconds,
                "total_time_seconds": timings.total_time_seconds,
                "raw_text_processing": source.kind.is_pre_extracted(),
                "normalization": normalization,
            }),
        );

        tracing::info!(
            doc = %source_name,
            succeeded,
            normalization,
            completeness = metrics.extraction_completeness,
            total_ms = (timings.total_time_seconds * 1000.0) as u64,
            "Processing complete"
        );

        Ok(ProcessingOutput {
            document,
            source,
            metrics,
            succeeded,
            timings,
            source_name,
        })
    }

    /// Metadata block. Entries the model filled under `document_metadata`
    /// are kept unless they collide with the ones set here.
    fn metadata(&self, document: &ExtractionDocument, source_name: &str, kind: InputKind) -> Value {
        let mut metadata = match document.get("document_metadata") {
            Some(Value::Object(existing)) => existing.clone(),
            _ => Map::new(),
        };
        let entries = [
            ("document_id", Value::String(Uuid::new_v4().to_string())),
            ("filename", Value::String(source_name.to_string())),
            (
                "extraction_timestamp",
                Value::String(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
            ),
            ("document_language", Value::String("en".into())),
            ("document_type", Value::String(DOCUMENT_TYPE.into())),
            (
                "processing_method",
                Value::String(processing_method(kind, self.config.ocr.engine).into()),
            ),
            (
                "schema_variant",
                Value::String(self.config.schema_variant.as_str().into()),
            ),
        ];
        for (key, value) in entries {
            metadata.insert(key.to_string(), value);
        }
        Value::Object(metadata)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn processing_method(kind: InputKind, engine: OcrEngineKind) -> &'static str {
    match (kind, engine) {
        (InputKind::RawText, _) => "raw_text",
        (InputKind::PlainText, _) => "text_file",
        (_, OcrEngineKind::Tesseract) => "tesseract_ocr",
        (_, OcrEngineKind::Paddle) => "paddle_ocr",
    }
}

/// `[{text, confidence, bbox}]`; blocks without a region get `Block <n>`.
fn text_blocks_value(blocks: &[OcrBlock]) -> Value {
    Value::Array(
        blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let bbox = block
                    .region
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| format!("Block {}", i + 1));
                json!({
                    "text": block.text,
                    "confidence": block.confidence,
                    "bbox": bbox,
                })
            })
            .collect(),
    )
}

/// First `max_chars` characters, with `...` appended when text was cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let head = truncate_chars(text, max_chars);
    if head.len() < text.len() {
        format!("{head}...")
    } else {
        head.to_string()
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build a `DocumentProcessor` with production collaborators.
///
/// - OCR: Tesseract or PaddleOCR command per `config.ocr`
/// - PDF: Poppler (`pdfinfo`, `pdftoppm`)
/// - LLM: `OllamaClient` on `config.completion`
pub fn build_processor(config: &PipelineConfig) -> Result<DocumentProcessor, ProcessingError> {
    config.validate()?;

    let source = DocumentTextSource::new(
        build_ocr_engine(&config.ocr),
        Box::new(PopplerRasterizer::new()),
    )
    .with_image_extensions(&config.image_extensions)
    .with_pdf_dpi(config.ocr.pdf_dpi);

    let llm = OllamaClient::new(&config.completion)?;
    tracing::info!(
        model = %llm.model(),
        url = %llm.base_url(),
        schema = config.schema_variant.as_str(),
        "Document processor configured"
    );

    Ok(DocumentProcessor::new(
        Box::new(source),
        Box::new(llm),
        config.clone(),
    ))
}
