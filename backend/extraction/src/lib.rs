pub mod extractor;
pub mod gemini;

pub use extractor::FieldExtractor;
pub use gemini::{parse_fields, GeminiExtractor, DEFAULT_MODEL};
