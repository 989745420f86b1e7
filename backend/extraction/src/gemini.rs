/// Gemini-backed field extraction.
///
/// Sends the letter image plus a fixed instruction to the Gemini
/// `generateContent` endpoint and parses the JSON the model answers
/// with. The connectivity probe reuses the list-models endpoint.
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, info};

use mailscan_core::{ExtractionOutcome, LetterFields, ScanError, TokenUsage};

use crate::extractor::FieldExtractor;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Instruction sent with every image. The model is told to answer with
/// a bare JSON object, but fenced answers still show up in practice;
/// see [`strip_json_fence`].
const EXTRACTION_PROMPT: &str = "\
Analyze this image of a letter/envelope. Extract the following information in JSON format:
- sender_name: The name of the sender.
- sender_address: The address of the sender.
- recipient_name: The name of the recipient.
- recipient_address: The address of the recipient.
- send_date: The date the letter was sent (if visible on postmark or letter). Format as YYYY-MM-DD if possible, else null.

If a field is not found, use null.
Return ONLY the JSON.";

pub struct GeminiExtractor {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiExtractor {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl FieldExtractor for GeminiExtractor {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn extract(&self, image: &[u8]) -> Result<ExtractionOutcome, ScanError> {
        info!("[Extraction] Reading letter fields via Gemini {}", self.model);
        let b64 = STANDARD.encode(image);
        let url = format!(
            "{API_BASE}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [
                { "text": EXTRACTION_PROMPT },
                { "inlineData": { "mimeType": "image/jpeg", "data": b64 } }
            ]}]
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScanError::Provider(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ScanError::Provider(format!(
                "Gemini extraction error: {}",
                resp.text().await.unwrap_or_default()
            )));
        }
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ScanError::Provider(e.to_string()))?;
        parse_generate_response(&json)
    }

    async fn probe(&self) -> Result<(), ScanError> {
        debug!("[Extraction] Probing Gemini model listing");
        let url = format!("{API_BASE}/models?key={}", self.api_key);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScanError::Provider(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ScanError::Provider(format!(
                "Gemini status probe failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Pull the answer text and usage accounting out of a `generateContent`
/// response body, then parse the text as letter fields.
fn parse_generate_response(json: &serde_json::Value) -> Result<ExtractionOutcome, ScanError> {
    let text = json["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| ScanError::Provider("Gemini response carried no candidate text".into()))?;

    let fields = parse_fields(text)?;
    let usage = parse_usage(&json["usageMetadata"]);
    Ok(ExtractionOutcome { fields, usage })
}

/// Parse the model's text answer, stripping a JSON code fence first.
/// On failure the raw, untouched text travels with the error.
pub fn parse_fields(text: &str) -> Result<LetterFields, ScanError> {
    serde_json::from_str(strip_json_fence(text)).map_err(|e| ScanError::UnparsableResponse {
        message: e.to_string(),
        raw: text.to_string(),
    })
}

/// Strip a leading ```json fence and a trailing ``` fence.
///
/// Deliberately narrow: untagged fences and surrounding whitespace are
/// left alone and fail JSON parsing instead.
fn strip_json_fence(text: &str) -> &str {
    let text = text.strip_prefix("```json").unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text)
}

fn parse_usage(meta: &serde_json::Value) -> Option<TokenUsage> {
    Some(TokenUsage {
        prompt_token_count: meta.get("promptTokenCount")?.as_u64()? as u32,
        candidates_token_count: meta.get("candidatesTokenCount")?.as_u64()? as u32,
        total_token_count: meta.get("totalTokenCount")?.as_u64()? as u32,
    })
}
