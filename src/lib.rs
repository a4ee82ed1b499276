//! freeway - an Ollama- and OpenAI-compatible proxy over OpenRouter.
//!
//! The proxy keeps a catalog of zero-priced upstream models and, for every
//! chat request, picks a working one through a gauntlet of filters: a static
//! allowlist, durable failure cooldowns, a session blacklist, and rate
//! limiting, with fallback across the catalog when the first choice fails.
//! Responses are re-encoded into whichever dialect the client spoke
//! (Ollama NDJSON or OpenAI SSE).

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tracing::{info, instrument};

pub mod catalog;
pub mod client;
pub mod config;
pub mod errors;
pub mod failures;
pub mod filter;
pub mod handlers;
pub mod limiter;
pub mod models;
pub mod permanent;
pub mod selector;
pub mod sse;
pub mod test_utils;
pub mod transcode;

use catalog::Catalog;
use client::Provider;
use failures::FailureStore;
use filter::ModelFilter;
use limiter::GlobalRateLimiter;
use permanent::PermanentFailureTracker;

/// Immutable process-wide context: catalog, filter, failure stores, and rate
/// limiting. Built once at startup and handed to every handler explicitly,
/// so tests can run in parallel with their own instances.
pub struct AppContext {
    pub free_mode: bool,
    pub tool_use_only: bool,
    pub catalog: Catalog,
    pub filter: ModelFilter,
    pub failures: FailureStore,
    pub permanent: PermanentFailureTracker,
    pub limiter: GlobalRateLimiter,
}

/// Application state: the upstream provider plus the shared context.
#[derive(Clone)]
pub struct AppState<P> {
    pub provider: P,
    pub ctx: Arc<AppContext>,
}

impl<P: Provider> AppState<P> {
    pub fn new(provider: P, ctx: AppContext) -> Self {
        Self {
            provider,
            ctx: Arc::new(ctx),
        }
    }
}

/// Build the full route table over the given state.
#[instrument(skip(state))]
pub fn build_router<P: Provider + Clone>(state: AppState<P>) -> Router {
    info!("Building router");
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/tags", get(handlers::api_tags))
        .route("/api/show", post(handlers::api_show))
        .route("/api/chat", post(handlers::api_chat))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::v1_models))
        .with_state(state)
}
