// Clean OCR text before it is embedded in the extraction prompt.
// Strips invisible Unicode, drops instruction-like lines, normalizes whitespace.

/// Sanitize text for the completion prompt.
pub fn sanitize_for_prompt(raw: &str) -> String {
    let cleaned = remove_invisible_chars(raw);
    let (kept, removed) = remove_instruction_lines(&cleaned);

    if removed > 0 {
        // Count only: document text stays out of the logs.
        tracing::warn!(removed_lines = removed, "Instruction-like lines removed from document text");
    }

    normalize_whitespace(&kept)
}

/// Remove zero-width, bidi-control and other non-whitespace control characters.
fn remove_invisible_chars(text: &str) -> String {
    text.chars()
        .filter(|c| {
            if matches!(*c, ' ' | '\n' | '\t' | '\r') {
                return true;
            }
            if matches!(
                *c,
                '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}'..='\u{2064}' | '\u{FEFF}'
            ) {
                return false;
            }
            !c.is_control()
        })
        .collect()
}

fn is_role_marker(lower: &str) -> bool {
    const MARKERS: &[&str] = &[
        "system:",
        "assistant:",
        "user:",
        "[system]",
        "[assistant]",
        "[inst]",
        "[/inst]",
        "<<sys>>",
        "note to ai:",
    ];
    MARKERS.iter().any(|m| lower.starts_with(m))
}

fn is_override_attempt(lower: &str) -> bool {
    const PHRASES: &[&str] = &[
        "ignore previous instructions",
        "ignore all instructions",
        "ignore the above instructions",
        "disregard your instructions",
        "disregard all instructions",
        "forget your instructions",
        "new instructions:",
    ];
    PHRASES.iter().any(|p| lower.contains(p))
}

/// Returns (kept text, removed line count).
fn remove_instruction_lines(text: &str) -> (String, usize) {
    let mut kept: Vec<&str> = Vec::new();
    let mut removed = 0usize;

    for line in text.lines() {
        let lower = line.trim().to_lowercase();
        if is_role_marker(&lower) || is_override_attempt(&lower) {
            removed += 1;
            continue;
        }
        kept.push(line);
    }

    (kept.join("\n"), removed)
}

/// Trim each line, collapse runs of blank lines, drop leading/trailing blanks.
fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut prev_blank = true;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_blank {
                lines.push("");
            }
            prev_blank = true;
        } else {
            lines.push(trimmed);
            prev_blank = false;
        }
    }

    while lines.last() == Some(&"") {
        lines.pop();
    }

    lines.join("\n")
}
