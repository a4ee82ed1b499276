//! Wire types shared between the upstream provider and the two client
//! dialects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The client-facing identifier: the substring after the final `/` of a full
/// model id such as `vendor/name:suffix`.
pub fn display_name(model_id: &str) -> &str {
    model_id.rsplit('/').next().unwrap_or(model_id)
}

/// A model entry from the provider's `/models` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamModel {
    pub id: String,
    #[serde(default)]
    pub context_length: u64,
    #[serde(default)]
    pub supported_parameters: Vec<String>,
    #[serde(default)]
    pub top_provider: TopProvider,
    #[serde(default)]
    pub pricing: Pricing,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopProvider {
    #[serde(default)]
    pub context_length: u64,
}

/// Prices arrive as decimal strings; free models carry the literal `"0"`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pricing {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub completion: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelList {
    pub data: Vec<UpstreamModel>,
}

/// A chat message. `role` and `content` are the fields we read; everything
/// else is forwarded to the provider untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChatMessage {
    pub fn content_text(&self) -> &str {
        self.content.as_str().unwrap_or("")
    }
}

/// Unary chat completion as returned by the provider. The envelope fields are
/// re-stamped before the object is re-emitted on `/v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One upstream streaming delta after SSE decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatDelta {
    pub content: String,
    pub finish_reason: Option<String>,
}

/// Raw shape of a provider `chat.completion.chunk` SSE event.
#[derive(Debug, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub choices: Vec<StreamEventChoice>,
}

#[derive(Debug, Deserialize)]
pub struct StreamEventChoice {
    #[serde(default)]
    pub delta: StreamEventDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamEventDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// Body of `POST /api/chat` (Ollama dialect). `stream` defaults to on, which
/// is what Ollama clients assume when they omit it.
#[derive(Debug, Deserialize)]
pub struct OllamaChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub stream: Option<bool>,
}

/// Body of `POST /v1/chat/completions` (OpenAI dialect).
#[derive(Debug, Deserialize)]
pub struct OpenAiChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

/// Body of `POST /api/show`.
#[derive(Debug, Deserialize)]
pub struct ShowRequest {
    #[serde(default)]
    pub name: String,
}

/// Fixed size/digest advertised for every model on `/api/tags`. Real numbers
/// are meaningless for remote models, so these are placeholders Ollama
/// clients accept.
pub const TAG_SIZE: u64 = 270_898_672;
pub const TAG_DIGEST: &str = "9077fe9d2ae1a4a41a868836b56b8163731a8fe16621397028c2c76f838c6907";

#[derive(Debug, Clone, Serialize)]
pub struct TagModel {
    pub name: String,
    pub model: String,
    pub modified_at: String,
    pub size: u64,
    pub digest: String,
    pub details: TagDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagDetails {
    pub parent_model: String,
    pub format: String,
    pub family: String,
    pub families: Vec<String>,
    pub parameter_size: String,
    pub quantization_level: String,
}

impl TagModel {
    pub fn new(display_name: &str, family: &str, modified_at: String) -> Self {
        Self {
            name: display_name.to_owned(),
            model: display_name.to_owned(),
            modified_at,
            size: TAG_SIZE,
            digest: TAG_DIGEST.to_owned(),
            details: TagDetails {
                parent_model: String::new(),
                format: "gguf".to_owned(),
                family: family.to_owned(),
                families: vec![family.to_owned()],
                parameter_size: "varies".to_owned(),
                quantization_level: "Q4_K_M".to_owned(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    pub models: Vec<TagModel>,
}

/// The `/v1/models` listing.
#[derive(Debug, Serialize)]
pub struct ListModelResponse {
    pub object: &'static str,
    pub data: Vec<Model>,
}

#[derive(Debug, Serialize)]
pub struct Model {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}
