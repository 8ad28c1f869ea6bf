use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "AutoPolicy";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Document type stamped into every result's metadata.
pub const DOCUMENT_TYPE: &str = "auto_insurance_policy";

/// Default `tracing` filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "autopolicy=info,autopolicy_lib=info,warn"
}

/// Get the application data directory.
/// ~/AutoPolicy/ on all platforms; falls back to the working directory
/// when no home directory can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Directory for extracted JSON results under an output root.
pub fn results_dir(root: &std::path::Path) -> PathBuf {
    root.join("Results").join("JSON")
}

/// Directory for raw OCR dumps under an output root.
pub fn raw_data_dir(root: &std::path::Path) -> PathBuf {
    root.join("raw_data")
}
