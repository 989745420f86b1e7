use async_trait::async_trait;

use mailscan_core::{ExtractionOutcome, ScanError};

/// Turns raw image bytes into best-effort letter fields.
///
/// The HTTP handlers only ever talk to this trait, so tests substitute
/// a deterministic stub for the live Gemini client.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    /// Identifier of the model answering extractions.
    fn model_id(&self) -> &str;

    /// Extract letter fields from a JPEG-compatible image.
    async fn extract(&self, image: &[u8]) -> Result<ExtractionOutcome, ScanError>;

    /// Lightweight connectivity check against the provider.
    async fn probe(&self) -> Result<(), ScanError>;
}
