use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use mailscan_core::{now_scan_date, LetterFields, LetterRecord, NewLetter, ScanError, TokenUsage};
use mailscan_extraction::FieldExtractor;
use mailscan_store::LetterStore;

/// Shared application state for API handlers.
pub struct AppState {
    pub store: Arc<LetterStore>,
    /// Present only when a Gemini API key is configured.
    pub extractor: Option<Arc<dyn FieldExtractor>>,
    /// Model identifier reported by the status endpoint.
    pub model: String,
}

/// Build the Axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/scan", post(scan_letter))
        .route("/api/history", get(get_history))
        .route("/api/status", get(get_status))
        .with_state(state)
}

/// Wrapper turning `ScanError` into a JSON `{error}` response body.
#[derive(Debug)]
pub struct ApiError(pub ScanError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ScanError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self.0 {
            // Unparsable model output travels with the raw text attached.
            ScanError::UnparsableResponse { raw, .. } => {
                json!({ "error": self.0.to_string(), "raw_response": raw })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    /// Raw base64, or a `data:<mime>;base64,<payload>` URI.
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    #[serde(flatten)]
    pub fields: LetterFields,
    pub id: i64,
    pub scan_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub model: String,
    pub gemini_connected: bool,
}

/// Health check endpoint.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "mailscan",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Handler for `POST /api/scan`: decode the image, extract fields via
/// the provider, persist a row, and echo the enriched record back.
/// Nothing is persisted on any failure path.
pub async fn scan_letter(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, ApiError> {
    let Some(extractor) = state.extractor.as_ref() else {
        return Err(ScanError::Config(
            "Gemini API key not configured. Set GEMINI_API_KEY.".into(),
        )
        .into());
    };

    let image = match req.image.as_deref() {
        Some(s) if !s.is_empty() => s,
        _ => return Err(ScanError::BadRequest("No image provided".into()).into()),
    };

    // Drop a data-URI header if present (e.g. "data:image/jpeg;base64,").
    let b64 = if image.contains(',') {
        image.split(',').nth(1).unwrap_or("")
    } else {
        image
    };

    let image_bytes = STANDARD
        .decode(b64)
        .map_err(|e| ScanError::BadRequest(format!("image is not valid base64: {e}")))?;

    let outcome = extractor.extract(&image_bytes).await.map_err(|e| {
        tracing::error!(error = %e, "Extraction failed");
        e
    })?;

    let letter = NewLetter {
        scan_date: now_scan_date(),
        fields: outcome.fields.clone(),
    };
    let id = state.store.insert(&letter).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to persist letter");
        e
    })?;

    Ok(Json(ScanResponse {
        fields: outcome.fields,
        id,
        scan_date: letter.scan_date,
        usage: outcome.usage,
    }))
}

/// Handler for `GET /api/history`: every scanned letter, newest first.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LetterRecord>>, ApiError> {
    let letters = state.store.list_all().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to fetch history");
        e
    })?;
    Ok(Json(letters))
}

/// Handler for `GET /api/status`: model id plus provider connectivity.
/// Probe failures swallow to `false`; this endpoint never errors.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    let gemini_connected = match state.extractor.as_ref() {
        Some(extractor) => match extractor.probe().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Gemini status probe failed");
                false
            }
        },
        None => false,
    };
    Json(StatusReport {
        model: state.model.clone(),
        gemini_connected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mailscan_core::ExtractionOutcome;

    const ANSWER: &str = r#"{"sender_name":"Alice","sender_address":null,"recipient_name":"Bob","recipient_address":"1 Main St","send_date":"2024-01-05"}"#;

    /// Deterministic extractor: replies with canned model text, routed
    /// through the same parsing path as the live client.
    struct StubExtractor {
        text: String,
        usage: Option<TokenUsage>,
        reachable: bool,
    }

    impl StubExtractor {
        fn answering(text: impl Into<String>) -> Self {
            Self {
                text: text.into(),
                usage: None,
                reachable: true,
            }
        }
    }

    #[async_trait]
    impl FieldExtractor for StubExtractor {
        fn model_id(&self) -> &str {
            "stub-model"
        }

        async fn extract(&self, _image: &[u8]) -> Result<ExtractionOutcome, ScanError> {
            Ok(ExtractionOutcome {
                fields: mailscan_extraction::parse_fields(&self.text)?,
                usage: self.usage,
            })
        }

        async fn probe(&self) -> Result<(), ScanError> {
            if self.reachable {
                Ok(())
            } else {
                Err(ScanError::Provider("probe refused".into()))
            }
        }
    }

    fn test_state(extractor: Option<Arc<dyn FieldExtractor>>) -> Arc<AppState> {
        Arc::new(AppState {
            store: Arc::new(LetterStore::in_memory().expect("in-memory db")),
            extractor,
            model: "gemini-2.0-flash".into(),
        })
    }

    fn scan_request(image: Option<&str>) -> Json<ScanRequest> {
        Json(ScanRequest {
            image: image.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn scan_persists_and_echoes_the_record() {
        let state = test_state(Some(Arc::new(StubExtractor {
            text: ANSWER.into(),
            usage: Some(TokenUsage {
                prompt_token_count: 301,
                candidates_token_count: 42,
                total_token_count: 343,
            }),
            reachable: true,
        })));

        let Json(resp) = scan_letter(
            State(state.clone()),
            scan_request(Some("data:image/jpeg;base64,AAAA")),
        )
        .await
        .expect("scan should succeed");

        assert_eq!(resp.id, 1);
        assert_eq!(resp.fields.sender_name.as_deref(), Some("Alice"));
        assert_eq!(resp.fields.sender_address, None);
        assert_eq!(resp.fields.recipient_address.as_deref(), Some("1 Main St"));
        assert_eq!(resp.fields.send_date.as_deref(), Some("2024-01-05"));
        assert_eq!(resp.usage.unwrap().total_token_count, 343);
        assert!(chrono_ok(&resp.scan_date));
        assert_eq!(state.store.count().await.unwrap(), 1);

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["sender_name"], "Alice");
        assert!(json["sender_address"].is_null());
        assert_eq!(json["usage"]["prompt_token_count"], 301);
    }

    fn chrono_ok(stamp: &str) -> bool {
        stamp.len() == 19 && stamp.as_bytes()[4] == b'-' && stamp.as_bytes()[10] == b' '
    }

    #[tokio::test]
    async fn scan_ids_strictly_increase() {
        let state = test_state(Some(Arc::new(StubExtractor::answering(ANSWER))));

        let mut last = 0;
        for _ in 0..3 {
            let Json(resp) = scan_letter(State(state.clone()), scan_request(Some("AAAA")))
                .await
                .expect("scan should succeed");
            assert!(resp.id > last);
            last = resp.id;
        }
    }

    #[tokio::test]
    async fn scan_usage_is_omitted_when_absent() {
        let state = test_state(Some(Arc::new(StubExtractor::answering(ANSWER))));

        let Json(resp) = scan_letter(State(state), scan_request(Some("AAAA")))
            .await
            .expect("scan should succeed");
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("usage").is_none());
    }

    #[tokio::test]
    async fn fenced_answer_scans_like_unfenced() {
        let plain_state = test_state(Some(Arc::new(StubExtractor::answering(ANSWER))));
        let fenced_state = test_state(Some(Arc::new(StubExtractor::answering(format!(
            "```json{ANSWER}```"
        )))));

        let Json(plain) = scan_letter(State(plain_state), scan_request(Some("AAAA")))
            .await
            .expect("plain scan");
        let Json(fenced) = scan_letter(State(fenced_state), scan_request(Some("AAAA")))
            .await
            .expect("fenced scan");

        assert_eq!(plain.fields, fenced.fields);
    }

    #[tokio::test]
    async fn missing_image_is_rejected_without_insert() {
        let state = test_state(Some(Arc::new(StubExtractor::answering(ANSWER))));

        let err = scan_letter(State(state.clone()), scan_request(None))
            .await
            .expect_err("scan must fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_image_is_rejected_without_insert() {
        let state = test_state(Some(Arc::new(StubExtractor::answering(ANSWER))));

        let err = scan_letter(State(state.clone()), scan_request(Some("")))
            .await
            .expect_err("scan must fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_credential_is_a_config_error_without_insert() {
        let state = test_state(None);

        let err = scan_letter(State(state.clone()), scan_request(Some("AAAA")))
            .await
            .expect_err("scan must fail");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(err.0, ScanError::Config(_)));
        assert_eq!(state.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unparsable_answer_surfaces_raw_text_without_insert() {
        let state = test_state(Some(Arc::new(StubExtractor::answering(
            "Sorry, I cannot read this image.",
        ))));

        let err = scan_letter(State(state.clone()), scan_request(Some("AAAA")))
            .await
            .expect_err("scan must fail");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(state.store.count().await.unwrap(), 0);

        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["raw_response"], "Sorry, I cannot read this image.");
        assert!(body["error"].as_str().unwrap().contains("parse"));
    }

    #[tokio::test]
    async fn invalid_base64_is_a_client_error() {
        let state = test_state(Some(Arc::new(StubExtractor::answering(ANSWER))));

        let err = scan_letter(State(state), scan_request(Some("!!not-base64!!")))
            .await
            .expect_err("scan must fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn history_orders_newest_scan_first() {
        let state = test_state(None);
        for (scan_date, sender) in [
            ("2024-01-01 09:00:00", "old"),
            ("2024-03-01 09:00:00", "new"),
            ("2024-02-01 09:00:00", "mid"),
        ] {
            state
                .store
                .insert(&NewLetter {
                    scan_date: scan_date.into(),
                    fields: LetterFields {
                        sender_name: Some(sender.into()),
                        ..Default::default()
                    },
                })
                .await
                .unwrap();
        }

        let Json(history) = get_history(State(state)).await.expect("history");
        let senders: Vec<_> = history
            .iter()
            .filter_map(|l| l.sender_name.as_deref())
            .collect();
        assert_eq!(senders, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn status_without_credential_is_disconnected() {
        let Json(report) = get_status(State(test_state(None))).await;
        assert_eq!(report.model, "gemini-2.0-flash");
        assert!(!report.gemini_connected);
    }

    #[tokio::test]
    async fn status_swallows_probe_failures() {
        let state = test_state(Some(Arc::new(StubExtractor {
            text: ANSWER.into(),
            usage: None,
            reachable: false,
        })));
        let Json(report) = get_status(State(state)).await;
        assert!(!report.gemini_connected);
    }

    #[tokio::test]
    async fn status_reports_connected_when_probe_succeeds() {
        let state = test_state(Some(Arc::new(StubExtractor::answering(ANSWER))));
        let Json(report) = get_status(State(state)).await;
        assert!(report.gemini_connected);
    }
}
