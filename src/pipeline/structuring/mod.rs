pub mod types;
pub mod schema;
pub mod sanitize;
pub mod prompt;
pub mod parser;
pub mod confidence;
pub mod ollama;
pub mod ollama_types;

pub use types::*;
pub use schema::*;
pub use sanitize::*;
pub use prompt::*;
pub use parser::*;
pub use confidence::*;
pub use ollama::*;
pub use ollama_types::*;

use thiserror::Error;

/// Failures of the completion collaborator.
///
/// None of these escape the processing pipeline: the processor logs them and
/// routes to the fallback document.
#[derive(Error, Debug)]
pub enum StructuringError {
    #[error("Completion service is not reachable at {0}")]
    OllamaConnection(String),

    #[error("Completion service returned error (status {status}): {body}")]
    OllamaError { status: u16, body: String },

    #[error("Completion request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Completion stream ended before a done marker")]
    StreamIncomplete,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
