use super::schema::SchemaVariant;

/// Default prompt text budget, in characters.
pub const DEFAULT_PROMPT_MAX_CHARS: usize = 1800;

/// Budget used by the fast profile (small models, short context).
pub const FAST_PROMPT_MAX_CHARS: usize = 700;

/// Build the extraction prompt for one document.
///
/// The text is cut at a hard character boundary (not word or line aware)
/// before the skeleton of `variant` is embedded verbatim.
pub fn build_extraction_prompt(filtered_text: &str, variant: SchemaVariant, max_chars: usize) -> String {
    let text = truncate_chars(filtered_text, max_chars);
    let field_rules = match variant {
        SchemaVariant::Flat => "Use an empty string for any field not present in the text.",
        SchemaVariant::Annotated => {
            "For every field set \"value\" to the text found (empty string if absent) \
             and \"confidence\" to high, medium or low."
        }
    };

    format!(
        "Extract insurance data from this auto insurance document text and return structured JSON:\n\
         \n\
         {text}\n\
         \n\
         Return this exact structure with data from the text:\n\
         {skeleton}\n\
         \n\
         Extract values after colons. Take policy dates from the \"Effective:\" line. {field_rules} \
         Return only JSON.",
        skeleton = variant.skeleton_json(),
    )
}

/// First `max_chars` Unicode scalar values of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
