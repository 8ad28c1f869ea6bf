use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::StructuringError;

/// One extracted insurance document: a JSON object conforming to the
/// configured schema variant, plus any derived fields appended later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ExtractionDocument(Map<String, Value>);

impl ExtractionDocument {
    /// Wrap a JSON value; `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a derived field, replacing any value the model produced under that key.
    pub fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    /// Insert `value` only when `key` is absent. Returns true when inserted.
    pub fn insert_missing(&mut self, key: &str, value: Value) -> bool {
        if self.0.contains_key(key) {
            return false;
        }
        self.0.insert(key.to_string(), value);
        true
    }

    /// Look up a nested value by a dotted path (`"policy_information.policy_number"`).
    pub fn pointer(&self, dotted: &str) -> Option<&Value> {
        let mut parts = dotted.split('.');
        let first = parts.next()?;
        parts.try_fold(self.0.get(first)?, |node, key| node.get(key))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

/// How the normaliser arrived at its document.
///
/// Both variants carry a schema-conforming document; callers branch on the
/// tag for logging and metrics only.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    /// The model output parsed as a JSON object.
    Parsed {
        document: ExtractionDocument,
        /// True when the single-quote repair pass was needed.
        repaired: bool,
        /// Declared top-level keys the model omitted and the skeleton filled in.
        filled_keys: Vec<String>,
    },
    /// The model output was unusable; the deterministic fallback was substituted.
    Fallback {
        document: ExtractionDocument,
        reason: String,
    },
}

impl NormalizeOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, NormalizeOutcome::Parsed { .. })
    }

    pub fn document(&self) -> &ExtractionDocument {
        match self {
            NormalizeOutcome::Parsed { document, .. } | NormalizeOutcome::Fallback { document, .. } => {
                document
            }
        }
    }

    pub fn into_document(self) -> ExtractionDocument {
        match self {
            NormalizeOutcome::Parsed { document, .. } | NormalizeOutcome::Fallback { document, .. } => {
                document
            }
        }
    }

    /// `(document, succeeded)` pair.
    pub fn into_parts(self) -> (ExtractionDocument, bool) {
        let succeeded = self.succeeded();
        (self.into_document(), succeeded)
    }
}

/// Completeness and confidence figures derived from one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CompletenessMetrics {
    /// Mean OCR block confidence, 0.0 when no blocks.
    pub ocr_confidence: f64,
    /// Filled leaf fields as a percentage of all leaf fields (0-100).
    pub extraction_completeness: f64,
    /// Dotted field path → confidence label, for filled fields only.
    pub field_accuracy_estimates: BTreeMap<String, String>,
}

/// Completion collaborator abstraction (allows mocking).
pub trait LlmClient {
    /// Send one prompt and return the full completion text.
    fn generate(&self, prompt: &str) -> Result<String, StructuringError>;

    fn is_model_available(&self, model: &str) -> Result<bool, StructuringError>;

    fn list_models(&self) -> Result<Vec<String>, StructuringError>;
}
