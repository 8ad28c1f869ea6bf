//! Ollama wire types, completion configuration, and endpoint validators.
//!
//! These types formalize the two Ollama HTTP contracts the completion
//! client speaks: single-shot `/api/generate` and streaming `/api/chat`.

use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Configuration
// ──────────────────────────────────────────────

/// Default completion host (local Ollama).
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Default extraction model.
pub const DEFAULT_MODEL: &str = "llama3.2:3b";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Upper bound for a caller-supplied timeout.
pub const MAX_TIMEOUT_SECS: u64 = 600;

/// Which Ollama endpoint the completion client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionEndpoint {
    /// `/api/generate` with `stream: false`, reads `{response}`.
    #[default]
    Generate,
    /// `/api/chat` with `stream: true`, concatenates NDJSON `message.content` until `done`.
    ChatStream,
}

/// Decoding parameters sent as Ollama `options`.
///
/// Extraction wants deterministic output: temperature 0, bounded output length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    /// Sampling temperature. 0.0 for deterministic extraction.
    pub temperature: f32,
    /// Top-p (nucleus) sampling threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens in the generated response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
    /// Context window size. None = model default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
    /// Stop sequences.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: None,
            num_predict: Some(800),
            num_ctx: Some(1024),
            repeat_penalty: Some(1.0),
            stop: Vec::new(),
        }
    }
}

/// Everything the completion client needs, passed in at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub endpoint: CompletionEndpoint,
    pub options: GenerationOptions,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            endpoint: CompletionEndpoint::Generate,
            options: GenerationOptions::default(),
        }
    }
}

impl CompletionConfig {
    /// Timeout clamped to `1..=MAX_TIMEOUT_SECS`.
    pub fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.clamp(1, MAX_TIMEOUT_SECS)
    }
}

// ──────────────────────────────────────────────
// Wire types
// ──────────────────────────────────────────────

/// Request body for Ollama `/api/generate`.
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    pub options: &'a GenerationOptions,
}

/// Response body from Ollama `/api/generate` (non-streaming).
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
}

/// Request body for Ollama `/api/chat`.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub stream: bool,
    pub options: &'a GenerationOptions,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

/// One NDJSON line of a streaming `/api/chat` response.
#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChatChunkMessage>,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatChunkMessage {
    #[serde(default)]
    pub content: String,
}

/// Response body from Ollama `/api/tags`.
#[derive(Debug, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
pub struct TagModel {
    pub name: String,
}

// ──────────────────────────────────────────────
// Validators
// ──────────────────────────────────────────────

/// Validate that a base URL is an http(s) URL with a host.
///
/// Remote hosts are allowed; the completion service may run off-box.
pub fn validate_base_url(url: &str) -> Result<(), String> {
    let after_scheme = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| format!("completion URL must start with http:// or https://: {url}"))?;

    let host = after_scheme.split('/').next().unwrap_or("");
    if host.is_empty() || host.starts_with(':') {
        return Err(format!("completion URL has no host: {url}"));
    }
    Ok(())
}

/// Validate a model name against the Ollama naming convention.
///
/// Format: `[namespace/]model[:tag]`, one optional namespace segment.
pub fn validate_model_name(name: &str) -> Result<(), String> {
    let valid = regex::Regex::new(
        r"^[a-zA-Z0-9][a-zA-Z0-9._-]*(/[a-zA-Z0-9][a-zA-Z0-9._-]*)?(:[a-zA-Z0-9._-]+)?$",
    )
    .map_err(|e| e.to_string())?;

    if !valid.is_match(name) {
        return Err(format!("invalid model name: '{name}'"));
    }
    Ok(())
}
