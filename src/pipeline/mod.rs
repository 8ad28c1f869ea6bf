pub mod extraction;
pub mod structuring;
pub mod processor; // Document Processing Orchestrator
pub mod storage; // JSON result + raw OCR dump
