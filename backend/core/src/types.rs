use chrono::Local;
use serde::{Deserialize, Serialize};

/// The fields the vision model is asked to read off a letter or
/// envelope. Every field is nullable: the model answers `null` for
/// anything it cannot find, and absent keys deserialize the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterFields {
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_address: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub recipient_address: Option<String>,
    /// `YYYY-MM-DD` when a postmark or dateline is legible.
    #[serde(default)]
    pub send_date: Option<String>,
}

/// A letter row about to be persisted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewLetter {
    pub scan_date: String,
    pub fields: LetterFields,
}

/// One persisted scan result. Rows are append-only: never updated,
/// never deleted, ids never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterRecord {
    pub id: i64,
    pub scan_date: String,
    pub send_date: Option<String>,
    pub sender_name: Option<String>,
    pub sender_address: Option<String>,
    pub recipient_name: Option<String>,
    pub recipient_address: Option<String>,
}

/// Token accounting reported by the provider alongside an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_token_count: u32,
    pub candidates_token_count: u32,
    pub total_token_count: u32,
}

/// What one extraction call yields: the parsed fields, plus usage
/// accounting when the provider reports it.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub fields: LetterFields,
    pub usage: Option<TokenUsage>,
}

/// Server-side scan timestamp: local time at second granularity.
pub fn now_scan_date() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
