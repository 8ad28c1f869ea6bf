//! Model-output normaliser: turns free-form completion text into a
//! schema-conforming `ExtractionDocument`.
//!
//! Stages, each consuming the previous stage's output:
//! trim → unwrap code fence → balanced-brace candidate → strict parse →
//! single-quote repair → deterministic fallback.
//!
//! Nothing in here returns an error. Every failure ends in the fallback
//! document of the configured schema variant.

use serde_json::Value;

use super::schema::{SchemaVariant, FALLBACK_MESSAGE};
use super::types::{ExtractionDocument, NormalizeOutcome};

const FENCE: &str = "```";

/// Normalise raw model text into a document of `variant`.
pub fn normalize_response(raw: &str, variant: SchemaVariant) -> NormalizeOutcome {
    let unfenced = strip_code_fence(raw.trim());
    let candidate = extract_json_candidate(unfenced);

    tracing::debug!(
        raw_len = raw.len(),
        candidate_len = candidate.len(),
        "Normalising model response"
    );

    let (value, repaired) = match parse_candidate(candidate) {
        Some(parsed) => parsed,
        None => {
            tracing::warn!(
                candidate_len = candidate.len(),
                "Model output is not parseable JSON, using fallback document"
            );
            return fallback(variant, FALLBACK_MESSAGE);
        }
    };

    let Some(mut document) = ExtractionDocument::from_value(value) else {
        tracing::warn!("Model output parsed but is not a JSON object, using fallback document");
        return fallback(variant, "Model output is not a JSON object");
    };

    let filled_keys = fill_missing_keys(&mut document, variant);
    if !filled_keys.is_empty() {
        tracing::info!(
            filled = filled_keys.len(),
            keys = ?filled_keys,
            "Model output omitted declared keys, filled from skeleton"
        );
    }
    if repaired {
        tracing::info!("Model output parsed after single-quote repair");
    }

    NormalizeOutcome::Parsed {
        document,
        repaired,
        filled_keys,
    }
}

/// `(document, succeeded)` form of [`normalize_response`].
pub fn normalize(raw: &str, variant: SchemaVariant) -> (ExtractionDocument, bool) {
    normalize_response(raw, variant).into_parts()
}

/// Return the content of the first fenced code block, or `text` unchanged
/// when there is no fence or the fence is never closed.
///
/// An optional language tag directly after the opening marker is skipped.
pub fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find(FENCE) else {
        return text;
    };
    let after_open = &text[open + FENCE.len()..];
    let tag_len: usize = after_open
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '.'))
        .map(char::len_utf8)
        .sum();
    let body = &after_open[tag_len..];

    match body.find(FENCE) {
        Some(close) => body[..close].trim(),
        None => text,
    }
}

/// Locate the JSON candidate: from the first `{` to the brace that returns
/// the depth counter to zero (inclusive), or to the end of the text when the
/// braces never balance. Text with no `{` or no `}` is returned whole.
///
/// Braces inside string literals are counted like any other.
pub fn extract_json_candidate(text: &str) -> &str {
    if !(text.contains('{') && text.contains('}')) {
        return text.trim();
    }
    let Some(start) = text.find('{') else {
        return text.trim();
    };

    let mut depth: usize = 0;
    for (offset, c) in text[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &text[start..start + offset + c.len_utf8()];
                }
            }
            _ => {}
        }
    }
    &text[start..]
}

/// Strict parse, then exactly one single-quote → double-quote repair pass.
///
/// The repair is applied to the whole candidate and will also rewrite
/// apostrophes inside values ("O'Brien").
fn parse_candidate(candidate: &str) -> Option<(Value, bool)> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => Some((value, false)),
        Err(strict_err) => {
            tracing::debug!(error = %strict_err, "Strict JSON parse failed, trying quote repair");
            let repaired = candidate.replace('\'', "\"");
            match serde_json::from_str::<Value>(&repaired) {
                Ok(value) => Some((value, true)),
                Err(repair_err) => {
                    tracing::debug!(error = %repair_err, "Quote repair failed");
                    None
                }
            }
        }
    }
}

/// Insert skeleton values for declared top-level keys the model left out.
fn fill_missing_keys(document: &mut ExtractionDocument, variant: SchemaVariant) -> Vec<String> {
    let skeleton = variant.skeleton();
    let mut filled = Vec::new();
    for (key, value) in skeleton.as_map() {
        if document.insert_missing(key, value.clone()) {
            filled.push(key.clone());
        }
    }
    filled
}

fn fallback(variant: SchemaVariant, reason: &str) -> NormalizeOutcome {
    NormalizeOutcome::Fallback {
        document: variant.fallback_document(reason),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::structuring::schema::{is_fallback_document, EXTRACTION_ERROR_KEY};
    use serde_json::json;

    fn assert_schema_complete(doc: &ExtractionDocument, variant: SchemaVariant) {
        for key in variant.declared_keys() {
            assert!(doc.contains_key(&key), "missing declared key {key}");
        }
    }

    #[test]
    fn candidate_from_fenced_block_inside_prose() {
        let raw = "Sure! ```json\n{\"a\":{\"b\":1}}\n``` done";
        let unfenced = strip_code_fence(raw.trim());
        assert_eq!(extract_json_candidate(unfenced), r#"{"a":{"b":1}}"#);
    }

    #[test]
    fn candidate_stops_at_balanced_brace() {
        let text = r#"Result: {"a": {"b": 1}} and then {"c": 2}"#;
        assert_eq!(extract_json_candidate(text), r#"{"a": {"b": 1}}"#);
    }

    #[test]
    fn candidate_runs_to_end_when_unbalanced() {
        let text = r#"prefix {"a": {"b": 1}"#;
        assert_eq!(extract_json_candidate(text), r#"{"a": {"b": 1}"#);
    }

    #[test]
    fn candidate_is_whole_text_without_braces() {
        assert_eq!(extract_json_candidate("  not json at all "), "not json at all");
    }

    #[test]
    fn candidate_is_whole_text_with_only_opening_brace() {
        assert_eq!(extract_json_candidate("{ nope"), "{ nope");
    }

    #[test]
    fn fence_without_language_tag() {
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn unclosed_fence_returns_input() {
        let text = "```json\n{\"a\":1}";
        assert_eq!(strip_code_fence(text), text);
        let (doc, ok) = normalize(text, SchemaVariant::Flat);
        assert!(ok);
        assert_eq!(doc.get("a"), Some(&json!(1)));
    }

    #[test]
    fn no_fence_returns_input() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn quote_repair_parses_single_quoted_object() {
        let outcome = normalize_response("{'a': 'x'}", SchemaVariant::Flat);
        match &outcome {
            NormalizeOutcome::Parsed { repaired, .. } => assert!(*repaired),
            other => panic!("expected parsed outcome, got {other:?}"),
        }
        assert_eq!(outcome.document().get("a"), Some(&json!("x")));
    }

    #[test]
    fn quote_repair_corrupts_apostrophes() {
        // Documented limitation: the apostrophe in O'Brien breaks the repaired text.
        let (doc, ok) = normalize("{'name': 'O'Brien'}", SchemaVariant::Flat);
        assert!(!ok);
        assert!(is_fallback_document(&doc));
    }

    #[test]
    fn unparseable_text_yields_fallback() {
        let outcome = normalize_response("not json at all", SchemaVariant::Flat);
        assert!(!outcome.succeeded());
        let doc = outcome.document();
        assert_schema_complete(doc, SchemaVariant::Flat);
        assert!(doc.contains_key(EXTRACTION_ERROR_KEY));
    }

    #[test]
    fn empty_response_yields_fallback() {
        for variant in [SchemaVariant::Flat, SchemaVariant::Annotated] {
            let (doc, ok) = normalize("", variant);
            assert!(!ok);
            assert_schema_complete(&doc, variant);
            assert!(is_fallback_document(&doc));
        }
    }

    #[test]
    fn non_object_json_yields_fallback() {
        let (doc, ok) = normalize("[1, 2, 3]", SchemaVariant::Flat);
        assert!(!ok);
        assert!(is_fallback_document(&doc));
        let (_, ok) = normalize("42", SchemaVariant::Flat);
        assert!(!ok);
    }

    #[test]
    fn missing_declared_keys_are_filled() {
        let outcome = normalize_response(r#"{"policy_number": "AP-1"}"#, SchemaVariant::Flat);
        let NormalizeOutcome::Parsed { document, filled_keys, .. } = outcome else {
            panic!("expected parsed outcome");
        };
        assert_eq!(document.get("policy_number"), Some(&json!("AP-1")));
        assert_schema_complete(&document, SchemaVariant::Flat);
        assert!(filled_keys.contains(&"billing_information".to_string()));
        assert!(!filled_keys.contains(&"policy_number".to_string()));
    }

    #[test]
    fn model_values_are_never_overwritten() {
        let raw = r#"{"insured_vehicle": {"vin": "1HGCM82633A004352"}, "extra": true}"#;
        let (doc, ok) = normalize(raw, SchemaVariant::Flat);
        assert!(ok);
        assert_eq!(doc.pointer("insured_vehicle.vin"), Some(&json!("1HGCM82633A004352")));
        assert!(doc.pointer("insured_vehicle.make").is_none());
        assert_eq!(doc.get("extra"), Some(&json!(true)));
    }

    #[test]
    fn normalisation_is_idempotent() {
        let raw = "Here you go:\n```json\n{\"policy_number\": \"GX-99\", \"insured_vehicle\": {\"make\": \"Honda\"}}\n```";
        for variant in [SchemaVariant::Flat, SchemaVariant::Annotated] {
            let (first, _) = normalize(raw, variant);
            let serialized = serde_json::to_string(&first).unwrap();
            let (second, ok) = normalize(&serialized, variant);
            assert!(ok);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn fallback_is_idempotent_too() {
        let (first, _) = normalize("garbage", SchemaVariant::Annotated);
        let (second, _) = normalize(&serde_json::to_string(&first).unwrap(), SchemaVariant::Annotated);
        assert_eq!(first, second);
    }

    #[test]
    fn arbitrary_inputs_always_schema_complete() {
        let inputs = [
            "",
            "}{",
            "{{{{",
            "}}}}",
            "```",
            "``````",
            "```json\n```",
            "{\"a\": [1, 2, {\"b\": }",
            "null",
            "\"string\"",
            "{'a': \"mixed'}",
            "ünïcödé {\"k\": \"välue\"} ✓",
            "{\"policy_number\": null}",
        ];
        for input in inputs {
            for variant in [SchemaVariant::Flat, SchemaVariant::Annotated] {
                let (doc, _) = normalize(input, variant);
                assert_schema_complete(&doc, variant);
            }
        }
    }

    #[test]
    fn unicode_before_brace_is_sliced_correctly() {
        let (doc, ok) = normalize("ünïcödé {\"k\": \"välue\"} ✓", SchemaVariant::Flat);
        assert!(ok);
        assert_eq!(doc.get("k"), Some(&json!("välue")));
    }

    #[test]
    fn annotated_response_parses() {
        let raw = r#"{"policy_information": {"policy_number": {"value": "P-77", "confidence": "high"}}}"#;
        let (doc, ok) = normalize(raw, SchemaVariant::Annotated);
        assert!(ok);
        assert_eq!(
            doc.pointer("policy_information.policy_number.value"),
            Some(&json!("P-77"))
        );
        assert!(doc.contains_key("vehicle_information"));
    }
}
