//! Keyword/digit line filter that trims OCR text down to lines likely to
//! carry policy fields before it is sent to the model.

use std::sync::LazyLock;

use regex::Regex;

/// Below this many surviving lines the filter gives up and returns the input.
pub const MIN_FILTERED_LINES: usize = 5;

/// Domain terms that mark a line as field-bearing (matched case-insensitively).
pub const FIELD_KEYWORDS: &[&str] = &[
    "policy",
    "effective",
    "expir",
    "vehicle",
    "coverage",
    "agent",
    "address",
    "vin",
    "date",
    "name",
    "phone",
    "email",
    "insured",
    "driver",
    "license",
    "premium",
    "deductible",
    "liability",
    "collision",
    "comprehensive",
    "billing",
    "payment",
    "discount",
    "make",
    "model",
    "year",
];

static KEYWORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = FIELD_KEYWORDS
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)(?:{alternation})")).unwrap()
});

/// Keep lines that mention a field keyword, or that contain a digit and are
/// longer than 3 characters once trimmed. Falls back to the unfiltered text
/// when fewer than [`MIN_FILTERED_LINES`] lines survive.
pub fn filter_relevant_lines(raw_text: &str) -> String {
    let kept: Vec<&str> = raw_text.lines().filter(|line| is_relevant_line(line)).collect();

    if kept.len() < MIN_FILTERED_LINES {
        tracing::debug!(
            kept = kept.len(),
            floor = MIN_FILTERED_LINES,
            "Too few relevant lines, keeping unfiltered text"
        );
        return raw_text.to_string();
    }

    tracing::debug!(
        kept = kept.len(),
        total = raw_text.lines().count(),
        "Filtered OCR text to relevant lines"
    );
    kept.join("\n")
}

/// Single-line relevance test.
pub fn is_relevant_line(line: &str) -> bool {
    if KEYWORD_PATTERN.is_match(line) {
        return true;
    }
    let trimmed = line.trim();
    trimmed.chars().count() > 3 && trimmed.chars().any(|c| c.is_ascii_digit())
}
