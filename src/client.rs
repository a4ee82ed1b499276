//! Typed calls to the upstream OpenAI-compatible provider.
//!
//! Errors are passed up verbatim; classifying them as permanent or transient
//! is the selector's job, not ours.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::{Value, json};
use url::Url;

use crate::models::{ChatCompletion, ChatDelta, ChatMessage, ModelList, UpstreamModel};
use crate::sse;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1/";

/// The catalog fetch is bounded; chat requests are not (streams can be long).
const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(10);

/// Streaming handle: a lazy finite sequence of content deltas. Dropping it
/// releases the underlying connection.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, UpstreamError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid upstream payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The provider surface the rest of the proxy sees. Implemented by
/// [`OpenRouterClient`] and mocked in tests.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    async fn list_models(&self) -> Result<Vec<UpstreamModel>, UpstreamError>;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<ChatCompletion, UpstreamError>;

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<ChatStream, UpstreamError>;

    async fn model_details(&self, name: &str) -> Result<Value, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl OpenRouterClient {
    pub fn new(api_key: String) -> Self {
        let base_url = Url::parse(OPENROUTER_BASE_URL).expect("static base URL parses");
        Self::with_base_url(api_key, base_url)
    }

    pub fn with_base_url(api_key: String, base_url: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> Url {
        self.base_url.join(path).expect("static relative path joins")
    }
}

#[async_trait]
impl Provider for OpenRouterClient {
    async fn list_models(&self) -> Result<Vec<UpstreamModel>, UpstreamError> {
        let response = self
            .http
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .timeout(LIST_MODELS_TIMEOUT)
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let list: ModelList = response.json().await?;
        Ok(list.data)
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<ChatCompletion, UpstreamError> {
        let response = self
            .http
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model,
                "messages": messages,
                "stream": false,
            }))
            .send()
            .await?;
        let response = error_for_status(response).await?;
        Ok(response.json().await?)
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<ChatStream, UpstreamError> {
        let response = self
            .http
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model,
                "messages": messages,
                "stream": true,
            }))
            .send()
            .await?;
        let response = error_for_status(response).await?;
        Ok(sse::delta_stream(response.bytes_stream()))
    }

    /// Model details for `/api/show`: the provider only exposes them through
    /// the full listing, so find the matching entry and return it verbatim.
    async fn model_details(&self, name: &str) -> Result<Value, UpstreamError> {
        let response = self
            .http
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .timeout(LIST_MODELS_TIMEOUT)
            .send()
            .await?;
        let response = error_for_status(response).await?;
        let body: Value = response.json().await?;

        body.get("data")
            .and_then(Value::as_array)
            .and_then(|models| {
                models.iter().find(|entry| {
                    entry
                        .get("id")
                        .and_then(Value::as_str)
                        .is_some_and(|id| id == name || crate::models::display_name(id) == name)
                })
            })
            .cloned()
            .ok_or_else(|| UpstreamError::Api {
                status: 404,
                message: format!("model '{name}' not found"),
            })
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UpstreamError::Api {
        status: status.as_u16(),
        message: extract_error_message(&body),
    })
}

/// Providers wrap failures as `{"error": {"message": ...}}`; fall back to the
/// raw body when the shape differs.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.trim().to_owned())
}
