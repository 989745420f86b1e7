pub mod error;
pub mod types;

pub use error::ScanError;
pub use types::{
    now_scan_date, ExtractionOutcome, LetterFields, LetterRecord, NewLetter, TokenUsage,
};
