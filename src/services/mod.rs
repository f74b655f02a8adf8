pub mod document;
pub mod evaluation;
pub mod exporter;
pub mod extractor;
pub mod fallback;
pub mod jobs;
pub mod llm;
pub mod pipeline;
pub mod retry;
pub mod schema_detector;
pub mod text;
