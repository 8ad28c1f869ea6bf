use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::types::{CompletenessMetrics, ExtractionDocument};
use crate::pipeline::extraction::types::OcrBlock;

/// Top-level sections that describe the document rather than hold extracted data.
const EXCLUDED_TOP_LEVEL_KEYS: &[&str] = &["confidence_assessment", "document_metadata"];

/// Score a document: leaf-field completeness plus the supplied OCR confidence.
///
/// A leaf is a mapping with exactly the keys `value` and `confidence`. On the
/// flat schema there are no such leaves, so completeness is 0.
pub fn score_document(document: &ExtractionDocument, ocr_confidence: f64) -> CompletenessMetrics {
    let mut tally = FieldTally::default();

    for (key, value) in document.as_map() {
        if EXCLUDED_TOP_LEVEL_KEYS.contains(&key.as_str()) {
            continue;
        }
        tally.visit(key, value);
    }

    let extraction_completeness = if tally.total_fields == 0 {
        0.0
    } else {
        tally.filled_fields as f64 / tally.total_fields as f64 * 100.0
    };

    CompletenessMetrics {
        ocr_confidence,
        extraction_completeness,
        field_accuracy_estimates: tally.estimates,
    }
}

/// Mean confidence over OCR blocks, 0.0 for an empty sequence.
pub fn mean_ocr_confidence(blocks: &[OcrBlock]) -> f64 {
    if blocks.is_empty() {
        return 0.0;
    }
    let sum: f64 = blocks.iter().map(|b| f64::from(b.confidence)).sum();
    sum / blocks.len() as f64
}

#[derive(Default)]
struct FieldTally {
    total_fields: usize,
    filled_fields: usize,
    estimates: BTreeMap<String, String>,
}

impl FieldTally {
    fn visit(&mut self, path: &str, value: &Value) {
        let Value::Object(map) = value else {
            return;
        };

        if let Some((leaf_value, confidence)) = as_leaf(map) {
            self.total_fields += 1;
            if is_filled(leaf_value) {
                self.filled_fields += 1;
                self.estimates
                    .insert(path.to_string(), confidence_label(confidence));
            }
            return;
        }

        for (key, child) in map {
            self.visit(&format!("{path}.{key}"), child);
        }
    }
}

fn as_leaf(map: &Map<String, Value>) -> Option<(&Value, &Value)> {
    if map.len() != 2 {
        return None;
    }
    Some((map.get("value")?, map.get("confidence")?))
}

/// Non-empty string, `true`, a non-zero number, or a non-empty container.
fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn confidence_label(confidence: &Value) -> String {
    match confidence {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
