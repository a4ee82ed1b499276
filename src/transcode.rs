//! Re-encoding of upstream chat output into the two client dialects.
//!
//! Both streaming dialects run the same header → streaming → done sequence
//! over the upstream deltas; only the frame encoding differs. Ollama clients
//! get one JSON object per line (NDJSON) with a final `done: true` frame;
//! OpenAI clients get `data:`-prefixed SSE events closed by the `[DONE]`
//! sentinel.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt, stream};
use serde_json::json;
use tracing::error;

use crate::client::ChatStream;
use crate::errors::Dialect;
use crate::models::{ChatCompletion, ChatDelta};

const DEFAULT_FINISH_REASON: &str = "stop";

/// Streaming `/api/chat` response: NDJSON frames.
pub fn ndjson_response(model: String, upstream: ChatStream) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames(Dialect::Ollama, model, upstream)),
    )
        .into_response()
}

/// Streaming `/v1/chat/completions` response: SSE frames.
pub fn sse_response(model: String, upstream: ChatStream) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames(Dialect::OpenAi, model, upstream)),
    )
        .into_response()
}

struct FrameState {
    upstream: ChatStream,
    model: String,
    finish_reason: Option<String>,
    finished: bool,
}

/// One output frame per upstream delta, then a terminal frame. After a
/// mid-stream error the headers are already on the wire, so the Ollama
/// dialect emits one inline error object and the OpenAI dialect just ends.
pub fn frames(
    dialect: Dialect,
    model: String,
    upstream: ChatStream,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    let state = FrameState {
        upstream,
        model,
        finish_reason: None,
        finished: false,
    };
    stream::unfold(state, move |mut state| async move {
        if state.finished {
            return None;
        }
        match state.upstream.next().await {
            Some(Ok(delta)) => {
                if let Some(reason) = &delta.finish_reason {
                    state.finish_reason = Some(reason.clone());
                }
                let frame = match dialect {
                    Dialect::Ollama => ollama_delta_frame(&state.model, &delta.content),
                    Dialect::OpenAi => openai_delta_frame(&state.model, &delta),
                };
                Some((Ok(frame), state))
            }
            Some(Err(err)) => {
                error!(error = %err, "upstream stream error");
                state.finished = true;
                match dialect {
                    Dialect::Ollama => Some((Ok(ollama_error_frame(&err.to_string())), state)),
                    Dialect::OpenAi => None,
                }
            }
            None => {
                state.finished = true;
                let finish_reason = state
                    .finish_reason
                    .as_deref()
                    .unwrap_or(DEFAULT_FINISH_REASON);
                let frame = match dialect {
                    Dialect::Ollama => ollama_final_frame(&state.model, finish_reason),
                    Dialect::OpenAi => Bytes::from_static(b"data: [DONE]\n\n"),
                };
                Some((Ok(frame), state))
            }
        }
    })
}

fn ollama_delta_frame(model: &str, content: &str) -> Bytes {
    ndjson_line(&json!({
        "model": model,
        "created_at": Utc::now().to_rfc3339(),
        "message": { "role": "assistant", "content": content },
        "done": false,
    }))
}

/// Final Ollama frame. Duration counters are placeholders; nothing real is
/// measured for remote models.
fn ollama_final_frame(model: &str, finish_reason: &str) -> Bytes {
    ndjson_line(&json!({
        "model": model,
        "created_at": Utc::now().to_rfc3339(),
        "message": { "role": "assistant", "content": "" },
        "done": true,
        "finish_reason": finish_reason,
        "total_duration": 0,
        "load_duration": 0,
        "prompt_eval_count": 0,
        "eval_count": 0,
        "eval_duration": 0,
    }))
}

fn ollama_error_frame(message: &str) -> Bytes {
    ndjson_line(&json!({ "error": format!("Stream error: {message}") }))
}

fn ndjson_line(value: &serde_json::Value) -> Bytes {
    let mut line = value.to_string().into_bytes();
    line.push(b'\n');
    Bytes::from(line)
}

fn openai_delta_frame(model: &str, delta: &ChatDelta) -> Bytes {
    let chunk = json!({
        "id": chat_id(),
        "object": "chat.completion.chunk",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "delta": { "content": delta.content },
            "finish_reason": delta.finish_reason,
        }],
    });
    Bytes::from(format!("data: {chunk}\n\n"))
}

fn chat_id() -> String {
    format!("chatcmpl-{}", Utc::now().timestamp())
}

/// Unary Ollama response: the full message plus token-derived pseudo
/// durations.
pub fn ollama_unary(response: &ChatCompletion, model: &str) -> serde_json::Value {
    let content = response
        .choices
        .first()
        .map(|choice| choice.message.content_text())
        .unwrap_or_default();
    let finish_reason = response
        .choices
        .first()
        .and_then(|choice| choice.finish_reason.as_deref())
        .unwrap_or(DEFAULT_FINISH_REASON);
    json!({
        "model": model,
        "created_at": Utc::now().to_rfc3339(),
        "message": { "role": "assistant", "content": content },
        "done": true,
        "finish_reason": finish_reason,
        "total_duration": response.usage.total_tokens * 10,
        "load_duration": 0,
        "prompt_eval_count": response.usage.prompt_tokens,
        "eval_count": response.usage.completion_tokens,
        "eval_duration": response.usage.completion_tokens * 10,
    })
}

/// Re-stamp the provider's unary response envelope before returning it on the
/// OpenAI surface.
pub fn restamp_completion(mut response: ChatCompletion, model: &str) -> ChatCompletion {
    response.id = chat_id();
    response.object = "chat.completion".to_owned();
    response.created = Utc::now().timestamp();
    response.model = model.to_owned();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::UpstreamError;
    use crate::models::{ChatChoice, ChatMessage, Usage};

    fn delta(content: &str, finish: Option<&str>) -> Result<ChatDelta, UpstreamError> {
        Ok(ChatDelta {
            content: content.to_owned(),
            finish_reason: finish.map(str::to_owned),
        })
    }

    fn upstream(items: Vec<Result<ChatDelta, UpstreamError>>) -> ChatStream {
        Box::pin(stream::iter(items))
    }

    async fn collect_frames(dialect: Dialect, items: Vec<Result<ChatDelta, UpstreamError>>) -> Vec<String> {
        frames(dialect, "a/x:free".to_owned(), upstream(items))
            .map(|frame| String::from_utf8(frame.unwrap().to_vec()).unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn ndjson_has_one_frame_per_delta_plus_done() {
        let lines = collect_frames(
            Dialect::Ollama,
            vec![delta("he", None), delta("llo", Some("stop"))],
        )
        .await;
        assert_eq!(lines.len(), 3);

        for line in &lines {
            assert!(line.ends_with('\n'));
        }
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["done"], false);
        assert_eq!(first["message"]["content"], "he");
        assert_eq!(first["message"]["role"], "assistant");
        assert_eq!(first["model"], "a/x:free");

        let last: serde_json::Value = serde_json::from_str(&lines[2]).unwrap();
        assert_eq!(last["done"], true);
        assert_eq!(last["finish_reason"], "stop");
        assert_eq!(last["message"]["content"], "");
        assert_eq!(last["eval_count"], 0);
    }

    #[tokio::test]
    async fn ndjson_concatenated_content_matches_input() {
        let lines = collect_frames(
            Dialect::Ollama,
            vec![delta("a", None), delta("b", None), delta("c", Some("stop"))],
        )
        .await;
        let content: String = lines[..lines.len() - 1]
            .iter()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["message"]["content"].as_str().unwrap().to_owned()
            })
            .collect();
        assert_eq!(content, "abc");
    }

    #[tokio::test]
    async fn ndjson_defaults_finish_reason_to_stop() {
        let lines = collect_frames(Dialect::Ollama, vec![delta("x", None)]).await;
        let last: serde_json::Value = serde_json::from_str(lines.last().unwrap()).unwrap();
        assert_eq!(last["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn ndjson_preserves_last_observed_finish_reason() {
        let lines = collect_frames(
            Dialect::Ollama,
            vec![delta("x", Some("length")), delta("", None)],
        )
        .await;
        let last: serde_json::Value = serde_json::from_str(lines.last().unwrap()).unwrap();
        assert_eq!(last["finish_reason"], "length");
    }

    #[tokio::test]
    async fn ndjson_mid_stream_error_emits_inline_error_and_ends() {
        let lines = collect_frames(
            Dialect::Ollama,
            vec![
                delta("partial", None),
                Err(UpstreamError::Api {
                    status: 500,
                    message: "connection reset".into(),
                }),
            ],
        )
        .await;
        assert_eq!(lines.len(), 2);
        let last: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        let error = last["error"].as_str().unwrap();
        assert!(error.starts_with("Stream error:"));
        assert!(error.contains("connection reset"));
    }

    #[tokio::test]
    async fn sse_frames_parse_and_end_with_done_sentinel() {
        let frames = collect_frames(
            Dialect::OpenAi,
            vec![delta("he", None), delta("llo", Some("stop"))],
        )
        .await;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");

        let mut content = String::new();
        for frame in &frames[..frames.len() - 1] {
            let payload = frame.strip_prefix("data: ").unwrap();
            let chunk: serde_json::Value = serde_json::from_str(payload.trim_end()).unwrap();
            assert_eq!(chunk["object"], "chat.completion.chunk");
            assert_eq!(chunk["model"], "a/x:free");
            assert!(chunk["id"].as_str().unwrap().starts_with("chatcmpl-"));
            content.push_str(chunk["choices"][0]["delta"]["content"].as_str().unwrap());
        }
        assert_eq!(content, "hello");

        let last_chunk: serde_json::Value = serde_json::from_str(
            frames[1].strip_prefix("data: ").unwrap().trim_end(),
        )
        .unwrap();
        assert_eq!(last_chunk["choices"][0]["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn sse_mid_stream_error_terminates_without_a_frame() {
        let frames = collect_frames(
            Dialect::OpenAi,
            vec![
                delta("partial", None),
                Err(UpstreamError::Api {
                    status: 500,
                    message: "boom".into(),
                }),
            ],
        )
        .await;
        // Only the delta frame; no [DONE], no error frame.
        assert_eq!(frames.len(), 1);
        assert!(frames[0].starts_with("data: {"));
    }

    #[tokio::test]
    async fn empty_upstream_still_emits_the_terminal_frame() {
        let ollama = collect_frames(Dialect::Ollama, vec![]).await;
        assert_eq!(ollama.len(), 1);
        let only: serde_json::Value = serde_json::from_str(&ollama[0]).unwrap();
        assert_eq!(only["done"], true);

        let openai = collect_frames(Dialect::OpenAi, vec![]).await;
        assert_eq!(openai, vec!["data: [DONE]\n\n"]);
    }

    fn completion(content: &str, finish: Option<&str>, usage: Usage) -> ChatCompletion {
        ChatCompletion {
            id: "orig".into(),
            object: "chat.completion".into(),
            created: 1,
            model: "upstream-model".into(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".into(),
                    content: serde_json::Value::String(content.to_owned()),
                    extra: serde_json::Map::new(),
                },
                finish_reason: finish.map(str::to_owned),
            }],
            usage,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn ollama_unary_shape() {
        let usage = Usage {
            prompt_tokens: 2,
            completion_tokens: 3,
            total_tokens: 5,
        };
        let value = ollama_unary(&completion("hello", Some("stop"), usage), "a/x:free");
        assert_eq!(value["model"], "a/x:free");
        assert_eq!(value["done"], true);
        assert_eq!(value["message"]["content"], "hello");
        assert_eq!(value["finish_reason"], "stop");
        assert_eq!(value["total_duration"], 50);
        assert_eq!(value["load_duration"], 0);
        assert_eq!(value["prompt_eval_count"], 2);
        assert_eq!(value["eval_count"], 3);
        assert_eq!(value["eval_duration"], 30);
    }

    #[test]
    fn ollama_unary_defaults_finish_reason() {
        let value = ollama_unary(&completion("x", None, Usage::default()), "m");
        assert_eq!(value["finish_reason"], "stop");
    }

    #[test]
    fn restamp_overwrites_the_envelope() {
        let restamped = restamp_completion(
            completion("x", Some("stop"), Usage::default()),
            "a/x:free",
        );
        assert!(restamped.id.starts_with("chatcmpl-"));
        assert_eq!(restamped.object, "chat.completion");
        assert_eq!(restamped.model, "a/x:free");
        assert!(restamped.created > 1);
        // The payload itself is untouched.
        assert_eq!(restamped.choices[0].message.content_text(), "x");
    }
}
