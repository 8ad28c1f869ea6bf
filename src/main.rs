use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use autopolicy_lib::config;
use autopolicy_lib::pipeline::extraction::types::DocumentInput;
use autopolicy_lib::pipeline::processor::{build_processor, DocumentSummary, ProcessingOutput};
use autopolicy_lib::pipeline::storage::ResultStore;
use autopolicy_lib::pipeline::structuring::ollama::{has_model, OllamaClient};
use autopolicy_lib::pipeline::structuring::schema::SchemaVariant;
use autopolicy_lib::pipeline::structuring::types::LlmClient;
use autopolicy_lib::pipeline_config::PipelineConfig;

#[derive(Parser)]
#[command(
    name = "autopolicy",
    version,
    about = "Extract structured fields from scanned auto-insurance documents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every subcommand that talks to the completion service.
#[derive(Args)]
struct EndpointArgs {
    /// Pipeline configuration file (JSON); defaults apply to absent fields
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Completion service base URL
    #[arg(long, env = "AUTOPOLICY_LLM_URL", value_name = "URL")]
    llm_url: Option<String>,

    /// Model name
    #[arg(long, env = "AUTOPOLICY_MODEL")]
    model: Option<String>,

    /// Completion request timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract one document (image, PDF or .txt) or literal text into JSON on stdout
    Extract {
        /// Path to an image, PDF or pre-extracted .txt file
        #[arg(required_unless_present = "raw_text", conflicts_with = "raw_text")]
        input_file: Option<PathBuf>,

        /// Process this text directly instead of a file
        #[arg(long, value_name = "TEXT")]
        raw_text: Option<String>,

        /// Target schema: flat or annotated
        #[arg(long)]
        schema: Option<SchemaVariant>,

        /// Send the full text to the model instead of keyword-relevant lines
        #[arg(long)]
        no_filter: bool,

        /// Shorter prompt and output budget for small models
        #[arg(long)]
        fast: bool,

        /// Also save results under DIR/Results/JSON and DIR/raw_data
        #[arg(short = 'o', long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Save results under the per-user data directory (ignored with --output-dir)
        #[arg(long)]
        save: bool,

        /// Print policy number, holder and insurer to stderr
        #[arg(long)]
        summary: bool,

        /// Print single-line JSON
        #[arg(long)]
        compact: bool,

        #[command(flatten)]
        endpoint: EndpointArgs,
    },
    /// Check that the completion service answers and the model is installed
    Check {
        #[command(flatten)]
        endpoint: EndpointArgs,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    autopolicy_lib::init_tracing();
    tracing::debug!("{} v{}", config::APP_NAME, config::APP_VERSION);

    let result = match cli.command {
        Commands::Extract {
            input_file,
            raw_text,
            schema,
            no_filter,
            fast,
            output_dir,
            save,
            summary,
            compact,
            endpoint,
        } => {
            let input = match (input_file, raw_text) {
                (_, Some(text)) => Ok(DocumentInput::RawText(text)),
                (Some(path), None) => Ok(DocumentInput::File(path)),
                (None, None) => Err(anyhow::anyhow!("an input file or --raw-text is required")),
            };
            input.and_then(|input| {
                let mut config = load_config(&endpoint)?;
                if let Some(schema) = schema {
                    config.schema_variant = schema;
                }
                if no_filter {
                    config.filter_text = false;
                }
                if fast {
                    config.apply_fast_profile();
                }
                let output_dir = output_dir.or_else(|| save.then(config::app_data_dir));
                extract(&config, &input, output_dir, summary, compact)
            })
        }
        Commands::Check { endpoint } => load_config(&endpoint).and_then(|config| check(&config)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(args: &EndpointArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(url) = &args.llm_url {
        config.completion.base_url = url.clone();
    }
    if let Some(model) = &args.model {
        config.completion.model = model.clone();
    }
    if let Some(timeout) = args.timeout {
        config.completion.timeout_secs = timeout;
    }
    config.validate()?;
    Ok(config)
}

fn extract(
    config: &PipelineConfig,
    input: &DocumentInput,
    output_dir: Option<PathBuf>,
    summary: bool,
    compact: bool,
) -> anyhow::Result<()> {
    let processor = build_processor(config)?;
    let output = processor
        .process(input)
        .with_context(|| format!("cannot process {}", input.display_name()))?;

    let store = output_dir.map(|dir| ResultStore::new(&dir));
    emit(&output, store.as_ref(), summary, compact, &mut std::io::stdout().lock())
}

/// Write the document to `out`, then persist it. A failed save is reported
/// on stderr without turning a completed extraction into an error exit.
fn emit(
    output: &ProcessingOutput,
    store: Option<&ResultStore>,
    summary: bool,
    compact: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if summary {
        let s = DocumentSummary::from_document(&output.document);
        eprintln!("Policy number: {}", or_na(&s.policy_number));
        eprintln!("Policy holder: {}", or_na(&s.policy_holder));
        eprintln!("Insurer:       {}", or_na(&s.insurer));
        eprintln!(
            "Completeness:  {:.1}%  OCR confidence: {:.1}%",
            output.metrics.extraction_completeness,
            output.metrics.ocr_confidence * 100.0
        );
    }

    let json = if compact {
        serde_json::to_string(&output.document)?
    } else {
        serde_json::to_string_pretty(&output.document)?
    };
    writeln!(out, "{json}")?;
    out.flush()?;

    if let Some(store) = store {
        match store.save(output) {
            Ok(saved) => {
                eprintln!("Results saved to {}", saved.result_json.display());
                eprintln!("Raw OCR text saved to {}", saved.raw_dump.display());
            }
            Err(e) => eprintln!("Warning: results not saved: {e}"),
        }
    }
    Ok(())
}

fn check(config: &PipelineConfig) -> anyhow::Result<()> {
    let client = OllamaClient::new(&config.completion)?;
    let models = client
        .list_models()
        .with_context(|| format!("completion service at {} did not answer", client.base_url()))?;

    if !has_model(&models, client.model()) {
        bail!(
            "model '{}' is not installed at {} (available: {})",
            client.model(),
            client.base_url(),
            if models.is_empty() { "none".to_string() } else { models.join(", ") }
        );
    }

    println!("{} ok: {} available at {}", config::APP_NAME, client.model(), client.base_url());
    Ok(())
}

fn or_na(value: &str) -> &str {
    if value.is_empty() {
        "N/A"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use autopolicy_lib::pipeline::extraction::types::{InputKind, SourceText};
    use autopolicy_lib::pipeline::processor::StageTimings;
    use autopolicy_lib::pipeline::structuring::types::{CompletenessMetrics, ExtractionDocument};

    use super::*;

    fn output() -> ProcessingOutput {
        ProcessingOutput {
            document: ExtractionDocument::from_value(json!({"policy_number": "AP-77"})).unwrap(),
            source: SourceText {
                raw_text: "Policy Number: AP-77".into(),
                blocks: Vec::new(),
                kind: InputKind::RawText,
                page_count: 1,
            },
            metrics: CompletenessMetrics::default(),
            succeeded: true,
            timings: StageTimings::default(),
            source_name: "raw_text".into(),
        }
    }

    #[test]
    fn emit_writes_compact_json() {
        let mut out = Vec::new();
        emit(&output(), None, false, true, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"policy_number\":\"AP-77\"}\n");
    }

    #[test]
    fn failed_save_still_emits_document() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();
        let store = ResultStore::new(&blocker);

        let mut out = Vec::new();
        emit(&output(), Some(&store), false, false, &mut out).unwrap();
        let printed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["policy_number"], "AP-77");
    }

    #[test]
    fn successful_save_writes_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let mut out = Vec::new();
        emit(&output(), Some(&store), true, false, &mut out).unwrap();
        let saved = std::fs::read_dir(dir.path().join("Results/JSON")).unwrap().count();
        assert_eq!(saved, 1);
    }
}
