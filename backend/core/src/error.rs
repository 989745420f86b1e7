use thiserror::Error;

/// Top-level error type for the mailscan runtime.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("extraction provider error: {0}")]
    Provider(String),

    /// The provider answered, but the answer was not valid JSON even
    /// after fence-stripping. The untouched text travels with the error
    /// so the drift can be diagnosed from the response body.
    #[error("failed to parse AI response: {message}")]
    UnparsableResponse { message: String, raw: String },

    #[error("storage error: {0}")]
    Storage(String),
}
