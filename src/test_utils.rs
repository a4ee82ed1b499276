//! Shared mock provider and fixtures for unit and integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{Value, json};

use crate::AppContext;
use crate::catalog::Catalog;
use crate::client::{ChatStream, Provider, UpstreamError};
use crate::failures::FailureStore;
use crate::filter::ModelFilter;
use crate::limiter::GlobalRateLimiter;
use crate::models::{
    ChatChoice, ChatCompletion, ChatDelta, ChatMessage, Pricing, TopProvider, UpstreamModel, Usage,
};
use crate::permanent::PermanentFailureTracker;

/// A zero-priced upstream model listing entry.
pub fn free_model(id: &str, context_length: u64) -> UpstreamModel {
    UpstreamModel {
        id: id.to_owned(),
        context_length,
        supported_parameters: vec![],
        top_provider: TopProvider { context_length: 0 },
        pricing: Pricing {
            prompt: "0".to_owned(),
            completion: "0".to_owned(),
        },
    }
}

/// An [`AppContext`] wired for tests: free mode, in-memory failure store,
/// empty filter, fresh tracker and limiter.
pub fn test_context(catalog: &[&str]) -> AppContext {
    AppContext {
        free_mode: true,
        tool_use_only: false,
        catalog: Catalog::new(catalog.iter().map(|id| (*id).to_owned()).collect()),
        filter: ModelFilter::default(),
        failures: FailureStore::open_in_memory(Duration::from_secs(300), Duration::from_secs(60))
            .expect("in-memory store opens"),
        permanent: PermanentFailureTracker::new(),
        limiter: GlobalRateLimiter::new(),
    }
}

/// Scripted behavior for one model.
#[derive(Debug, Clone)]
pub enum ChatScript {
    /// Unary replies return this content; streaming replies yield it in the
    /// given delta chunks followed by the finish reason.
    Reply {
        content: String,
        finish_reason: String,
    },
    /// Streaming deltas, optionally followed by a mid-stream error.
    Stream {
        deltas: Vec<ChatDelta>,
        error: Option<String>,
    },
    /// Both unary and streaming calls fail with this status/message.
    Fail { status: u16, message: String },
}

#[derive(Debug, Default)]
struct MockInner {
    models: Vec<UpstreamModel>,
    scripts: HashMap<String, ChatScript>,
    fail_listing: bool,
    calls: Vec<String>,
}

/// A [`Provider`] driven entirely by scripts. Unscripted models fail with a
/// permanent-looking 404.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    inner: Arc<Mutex<MockInner>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_upstream_model(self, model: UpstreamModel) -> Self {
        self.inner.lock().unwrap().models.push(model);
        self
    }

    pub fn with_free_models(self, ids: &[(&str, u64)]) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            for (id, context_length) in ids {
                inner.models.push(free_model(id, *context_length));
            }
        }
        self
    }

    pub fn with_reply(self, model: &str, content: &str) -> Self {
        self.inner.lock().unwrap().scripts.insert(
            model.to_owned(),
            ChatScript::Reply {
                content: content.to_owned(),
                finish_reason: "stop".to_owned(),
            },
        );
        self
    }

    pub fn with_stream(self, model: &str, deltas: Vec<ChatDelta>) -> Self {
        self.inner.lock().unwrap().scripts.insert(
            model.to_owned(),
            ChatScript::Stream {
                deltas,
                error: None,
            },
        );
        self
    }

    pub fn with_script(self, model: &str, script: ChatScript) -> Self {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert(model.to_owned(), script);
        self
    }

    pub fn with_failure(self, model: &str, status: u16, message: &str) -> Self {
        self.with_script(
            model,
            ChatScript::Fail {
                status,
                message: message.to_owned(),
            },
        )
    }

    pub fn fail_listing(self) -> Self {
        self.inner.lock().unwrap().fail_listing = true;
        self
    }

    /// Models passed to `chat`/`chat_stream`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    fn script_for(&self, model: &str) -> Option<ChatScript> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(model.to_owned());
        inner.scripts.get(model).cloned()
    }
}

fn unary_completion(content: &str, finish_reason: &str) -> ChatCompletion {
    ChatCompletion {
        id: "upstream-id".to_owned(),
        object: "chat.completion".to_owned(),
        created: 1_700_000_000,
        model: "upstream-model".to_owned(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_owned(),
                content: Value::String(content.to_owned()),
                extra: serde_json::Map::new(),
            },
            finish_reason: Some(finish_reason.to_owned()),
        }],
        usage: Usage {
            prompt_tokens: 2,
            completion_tokens: 3,
            total_tokens: 5,
        },
        extra: serde_json::Map::new(),
    }
}

fn not_found(model: &str) -> UpstreamError {
    UpstreamError::Api {
        status: 404,
        message: format!("no endpoints found for {model}"),
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn list_models(&self) -> Result<Vec<UpstreamModel>, UpstreamError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_listing {
            return Err(UpstreamError::Api {
                status: 503,
                message: "listing unavailable".to_owned(),
            });
        }
        Ok(inner.models.clone())
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        model: &str,
    ) -> Result<ChatCompletion, UpstreamError> {
        match self.script_for(model) {
            Some(ChatScript::Reply {
                content,
                finish_reason,
            }) => Ok(unary_completion(&content, &finish_reason)),
            Some(ChatScript::Stream { deltas, error }) => {
                if let Some(message) = error {
                    return Err(UpstreamError::Api {
                        status: 500,
                        message,
                    });
                }
                let content: String = deltas.iter().map(|delta| delta.content.as_str()).collect();
                Ok(unary_completion(&content, "stop"))
            }
            Some(ChatScript::Fail { status, message }) => {
                Err(UpstreamError::Api { status, message })
            }
            None => Err(not_found(model)),
        }
    }

    async fn chat_stream(
        &self,
        _messages: &[ChatMessage],
        model: &str,
    ) -> Result<ChatStream, UpstreamError> {
        match self.script_for(model) {
            Some(ChatScript::Reply {
                content,
                finish_reason,
            }) => {
                let items = vec![
                    Ok(ChatDelta {
                        content,
                        finish_reason: None,
                    }),
                    Ok(ChatDelta {
                        content: String::new(),
                        finish_reason: Some(finish_reason),
                    }),
                ];
                Ok(Box::pin(stream::iter(items)))
            }
            Some(ChatScript::Stream { deltas, error }) => {
                let mut items: Vec<Result<ChatDelta, UpstreamError>> =
                    deltas.into_iter().map(Ok).collect();
                if let Some(message) = error {
                    items.push(Err(UpstreamError::Api {
                        status: 500,
                        message,
                    }));
                }
                Ok(Box::pin(stream::iter(items)))
            }
            Some(ChatScript::Fail { status, message }) => {
                Err(UpstreamError::Api { status, message })
            }
            None => Err(not_found(model)),
        }
    }

    async fn model_details(&self, name: &str) -> Result<Value, UpstreamError> {
        let inner = self.inner.lock().unwrap();
        inner
            .models
            .iter()
            .find(|model| {
                model.id == name || crate::models::display_name(&model.id) == name
            })
            .map(|model| {
                json!({
                    "id": model.id,
                    "context_length": model.context_length,
                    "supported_parameters": model.supported_parameters,
                })
            })
            .ok_or_else(|| not_found(name))
    }
}
