//! Error classification and dialect-aware HTTP error responses.
//!
//! The upstream communicates failure detail only through message text, so
//! classification is substring matching. Both predicates live here so they
//! can be replaced in one place if the provider ever grows typed errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::selector::SelectError;

const PERMANENT_NEEDLES: &[&str] = &[
    "404",
    "not found",
    "no endpoints found",
    "model not available",
    "model does not exist",
];

const RATE_LIMIT_NEEDLES: &[&str] = &[
    "rate limit",
    "429",
    "too many requests",
    "quota exceeded",
];

/// Whether an upstream error means the model is gone for good (as opposed to
/// being temporarily overloaded).
pub fn is_permanent_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    PERMANENT_NEEDLES.iter().any(|needle| lower.contains(needle))
}

pub fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_NEEDLES.iter().any(|needle| lower.contains(needle))
}

/// Which error body shape the client expects: Ollama clients get
/// `{"error": "..."}`, OpenAI clients `{"error": {"message": "..."}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub dialect: Dialect,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            status,
            message: message.into(),
            dialect,
        }
    }

    pub fn bad_request(message: impl Into<String>, dialect: Dialect) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, dialect)
    }

    pub fn not_found(message: impl Into<String>, dialect: Dialect) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, dialect)
    }

    pub fn internal(message: impl Into<String>, dialect: Dialect) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, dialect)
    }

    /// Map a selection failure to its HTTP status: catalog exhaustion is a
    /// 503 (try again later), anything else is a plain 500.
    pub fn from_select(err: SelectError, dialect: Dialect) -> Self {
        let status = match &err {
            SelectError::NoModelsAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SelectError::AllAttemptsFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string(), dialect)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.dialect {
            Dialect::Ollama => json!({ "error": self.message }),
            Dialect::OpenAi => json!({ "error": { "message": self.message } }),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_errors_match_known_shapes() {
        assert!(is_permanent_error("upstream returned 404: no such model"));
        assert!(is_permanent_error("Model Not Found"));
        assert!(is_permanent_error("No endpoints found for this model"));
        assert!(is_permanent_error("model not available right now"));
        assert!(is_permanent_error("the model does not exist"));
        assert!(!is_permanent_error("connection reset by peer"));
        assert!(!is_permanent_error("upstream returned 500: boom"));
    }

    #[test]
    fn rate_limit_errors_match_known_shapes() {
        assert!(is_rate_limit_error("upstream returned 429: slow down"));
        assert!(is_rate_limit_error("Rate Limit exceeded"));
        assert!(is_rate_limit_error("too many requests"));
        assert!(is_rate_limit_error("quota exceeded for today"));
        assert!(!is_rate_limit_error("timeout waiting for headers"));
    }

    #[test]
    fn rate_limit_and_permanent_are_disjoint_for_common_cases() {
        assert!(!is_permanent_error("upstream returned 429: rate limit"));
        assert!(!is_rate_limit_error("upstream returned 404: not found"));
    }

    #[tokio::test]
    async fn error_bodies_follow_the_dialect() {
        let ollama = ApiError::bad_request("bad", Dialect::Ollama).into_response();
        assert_eq!(ollama.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(ollama.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "bad");

        let openai = ApiError::not_found("gone", Dialect::OpenAi).into_response();
        assert_eq!(openai.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(openai.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["message"], "gone");
    }
}
