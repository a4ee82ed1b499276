//! HTTP surface: the Ollama-compatible routes plus the OpenAI-compatible
//! pair, with request validation and error mapping.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, instrument};

use crate::AppState;
use crate::client::{ChatStream, Provider, UpstreamError};
use crate::errors::{ApiError, Dialect};
use crate::filter::supports_tools;
use crate::models::{
    ChatCompletion, ChatMessage, ListModelResponse, Model, OllamaChatRequest, OpenAiChatRequest,
    ShowRequest, TagModel, TagsResponse, display_name,
};
use crate::selector;
use crate::transcode;

pub async fn root() -> &'static str {
    "Ollama is running"
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /api/tags`: the models this proxy is currently willing to serve.
#[instrument(skip(state))]
pub async fn api_tags<P: Provider>(
    State(state): State<AppState<P>>,
) -> Result<Json<TagsResponse>, ApiError> {
    let ctx = &state.ctx;
    let now = Utc::now().to_rfc3339();
    let mut models = Vec::new();

    if ctx.free_mode {
        for id in ctx.catalog.iter() {
            if skip_for_failures(&state, id) {
                continue;
            }
            let display = display_name(id);
            if !ctx.filter.matches(display) {
                continue;
            }
            models.push(TagModel::new(display, "free", now.clone()));
        }
    } else {
        let upstream = state
            .provider
            .list_models()
            .await
            .map_err(|err| ApiError::internal(err.to_string(), Dialect::Ollama))?;
        let family = if ctx.tool_use_only { "tool-enabled" } else { "free" };
        for model in &upstream {
            if ctx.tool_use_only && !supports_tools(&model.supported_parameters) {
                continue;
            }
            let display = display_name(&model.id);
            if !ctx.filter.matches(display) {
                continue;
            }
            models.push(TagModel::new(display, family, now.clone()));
        }
    }

    Ok(Json(TagsResponse { models }))
}

/// `POST /api/show`: pass the provider's model details through.
#[instrument(skip(state, body))]
pub async fn api_show<P: Provider>(
    State(state): State<AppState<P>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request: ShowRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("Invalid JSON payload", Dialect::Ollama))?;
    if request.name.is_empty() {
        return Err(ApiError::bad_request("Model name is required", Dialect::Ollama));
    }
    let details = state
        .provider
        .model_details(&request.name)
        .await
        .map_err(|err| ApiError::internal(err.to_string(), Dialect::Ollama))?;
    Ok(Json(details))
}

/// `POST /api/chat`: Ollama dialect, NDJSON streaming by default.
#[instrument(skip(state, body))]
pub async fn api_chat<P: Provider>(
    State(state): State<AppState<P>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: OllamaChatRequest = serde_json::from_slice(&body).map_err(|err| {
        ApiError::bad_request(format!("Invalid JSON payload: {err}"), Dialect::Ollama)
    })?;
    validate_chat(&request.model, &request.messages, Dialect::Ollama)?;

    let streaming = request.stream.unwrap_or(true);
    info!(model = %request.model, streaming, "chat request");

    if streaming {
        let (stream, model) =
            open_stream(&state, &request.messages, &request.model, Dialect::Ollama).await?;
        info!(%model, "using model");
        Ok(transcode::ndjson_response(model, stream))
    } else {
        let (response, model) =
            run_chat(&state, &request.messages, &request.model, Dialect::Ollama).await?;
        if response.choices.is_empty() {
            return Err(ApiError::internal("No response from model", Dialect::Ollama));
        }
        info!(%model, "used model");
        Ok(Json(transcode::ollama_unary(&response, &model)).into_response())
    }
}

/// `POST /v1/chat/completions`: OpenAI dialect, SSE when `stream` is set.
#[instrument(skip(state, body))]
pub async fn chat_completions<P: Provider>(
    State(state): State<AppState<P>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: OpenAiChatRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("Invalid JSON payload", Dialect::OpenAi))?;
    validate_chat(&request.model, &request.messages, Dialect::OpenAi)?;
    info!(model = %request.model, stream = request.stream, "openai chat request");

    if request.stream {
        let (stream, model) =
            open_stream(&state, &request.messages, &request.model, Dialect::OpenAi).await?;
        info!(%model, "using model");
        Ok(transcode::sse_response(model, stream))
    } else {
        let (response, model) =
            run_chat(&state, &request.messages, &request.model, Dialect::OpenAi).await?;
        info!(%model, "used model");
        Ok(Json(transcode::restamp_completion(response, &model)).into_response())
    }
}

/// `GET /v1/models`: same visibility rules as `/api/tags`, OpenAI shape.
#[instrument(skip(state))]
pub async fn v1_models<P: Provider>(
    State(state): State<AppState<P>>,
) -> Result<Json<ListModelResponse>, ApiError> {
    let ctx = &state.ctx;
    let created = Utc::now().timestamp();
    let mut data = Vec::new();

    if ctx.free_mode {
        for id in ctx.catalog.iter() {
            if skip_for_failures(&state, id) {
                continue;
            }
            let display = display_name(id);
            if !ctx.filter.matches(display) {
                continue;
            }
            data.push(openai_model(display, created));
        }
    } else {
        let upstream = state
            .provider
            .list_models()
            .await
            .map_err(|err| ApiError::internal(err.to_string(), Dialect::OpenAi))?;
        for model in &upstream {
            if ctx.tool_use_only && !supports_tools(&model.supported_parameters) {
                continue;
            }
            let display = display_name(&model.id);
            if !ctx.filter.matches(display) {
                continue;
            }
            data.push(openai_model(display, created));
        }
    }

    Ok(Json(ListModelResponse {
        object: "list",
        data,
    }))
}

fn openai_model(display: &str, created: i64) -> Model {
    Model {
        id: display.to_owned(),
        object: "model",
        created,
        owned_by: "openrouter",
    }
}

/// Listings hide models that are cooling down; a broken store only hides the
/// row it failed on.
fn skip_for_failures<P: Provider>(state: &AppState<P>, model: &str) -> bool {
    match state.ctx.failures.should_skip(model) {
        Ok(skip) => skip,
        Err(err) => {
            error!(model, error = %err, "failure store check failed");
            true
        }
    }
}

fn validate_chat(model: &str, messages: &[ChatMessage], dialect: Dialect) -> Result<(), ApiError> {
    if model.is_empty() {
        return Err(ApiError::bad_request("Model name is required", dialect));
    }
    if messages.is_empty() {
        return Err(ApiError::bad_request("Messages array cannot be empty", dialect));
    }
    Ok(())
}

/// Unary chat: through the selector in free mode, directly against the
/// resolved model otherwise.
async fn run_chat<P: Provider>(
    state: &AppState<P>,
    messages: &[ChatMessage],
    requested: &str,
    dialect: Dialect,
) -> Result<(ChatCompletion, String), ApiError> {
    if state.ctx.free_mode {
        selector::pick_chat(&state.ctx, &state.provider, messages, requested)
            .await
            .map_err(|err| {
                error!(error = %err, requested, "free model selection failed");
                ApiError::from_select(err, dialect)
            })
    } else {
        let model = full_model_name(&state.provider, requested)
            .await
            .map_err(|err| ApiError::not_found(err.to_string(), dialect))?;
        let response = state
            .provider
            .chat(messages, &model)
            .await
            .map_err(|err| ApiError::internal(err.to_string(), dialect))?;
        Ok((response, model))
    }
}

async fn open_stream<P: Provider>(
    state: &AppState<P>,
    messages: &[ChatMessage],
    requested: &str,
    dialect: Dialect,
) -> Result<(ChatStream, String), ApiError> {
    if state.ctx.free_mode {
        selector::pick_stream(&state.ctx, &state.provider, messages, requested)
            .await
            .map_err(|err| {
                error!(error = %err, requested, "free model selection failed");
                ApiError::from_select(err, dialect)
            })
    } else {
        let model = full_model_name(&state.provider, requested)
            .await
            .map_err(|err| ApiError::not_found(err.to_string(), dialect))?;
        let stream = state
            .provider
            .chat_stream(messages, &model)
            .await
            .map_err(|err| ApiError::internal(err.to_string(), dialect))?;
        Ok((stream, model))
    }
}

/// Resolve a display name (or full id) against the provider's model list.
async fn full_model_name<P: Provider>(
    provider: &P,
    requested: &str,
) -> Result<String, UpstreamError> {
    let models = provider.list_models().await?;
    models
        .into_iter()
        .find(|model| model.id == requested || display_name(&model.id) == requested)
        .map(|model| model.id)
        .ok_or_else(|| UpstreamError::Api {
            status: 404,
            message: format!("model '{requested}' not found"),
        })
}
