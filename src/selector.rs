//! Free-model selection: resolve the requested name, try it once, then sweep
//! the catalog for a substitute.
//!
//! The sweep is a single pass in catalog order with early exit on success;
//! a failed attempt never re-enters the sweep. Classification of failures
//! happens here, exactly once, via the predicates in [`crate::errors`].

use futures_util::future::BoxFuture;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::AppContext;
use crate::client::{ChatStream, Provider, UpstreamError};
use crate::errors::{is_permanent_error, is_rate_limit_error};
use crate::failures::FailureKind;
use crate::models::{ChatCompletion, ChatMessage, display_name};

/// Breather after a rate-limited attempt before moving to the next model.
const RATE_LIMIT_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    /// Nothing was even attempted: every entry was filtered out, cooling
    /// down, or blacklisted.
    #[error(
        "no free models available ({cooling} in cooldown, {permanent} permanently failed, {filtered} filtered out)"
    )]
    NoModelsAvailable {
        cooling: usize,
        permanent: usize,
        filtered: usize,
    },
    /// At least one model was attempted and all of them failed.
    #[error(
        "all {attempted} attempted models failed (permanent: {permanent}, temporary: {temporary}); last error: {source}"
    )]
    AllAttemptsFailed {
        attempted: usize,
        permanent: usize,
        temporary: usize,
        #[source]
        source: UpstreamError,
    },
}

pub async fn pick_chat<'a, P: Provider>(
    ctx: &AppContext,
    provider: &'a P,
    messages: &'a [ChatMessage],
    requested: &str,
) -> Result<(ChatCompletion, String), SelectError> {
    pick(ctx, requested, move |model| {
        Box::pin(async move { provider.chat(messages, &model).await })
    })
    .await
}

pub async fn pick_stream<'a, P: Provider>(
    ctx: &AppContext,
    provider: &'a P,
    messages: &'a [ChatMessage],
    requested: &str,
) -> Result<(ChatStream, String), SelectError> {
    pick(ctx, requested, move |model| {
        Box::pin(async move { provider.chat_stream(messages, &model).await })
    })
    .await
}

async fn pick<'a, T>(
    ctx: &AppContext,
    requested: &str,
    mut attempt: impl FnMut(String) -> BoxFuture<'a, Result<T, UpstreamError>>,
) -> Result<(T, String), SelectError> {
    let mut last_error: Option<UpstreamError> = None;
    let mut attempted = 0usize;

    // Preferred attempt: the requested model, expanded from its display name
    // when it belongs to the catalog.
    let preferred = ctx.catalog.resolve(requested, &ctx.filter);
    let mut tried_preferred: Option<String> = None;
    if ctx.catalog.contains(&preferred)
        && !ctx.permanent.is_permanent(&preferred)
        && !in_cooldown(ctx, &preferred)
    {
        debug!(model = %preferred, "trying requested model first");
        attempted += 1;
        match try_model(ctx, &preferred, &mut attempt).await {
            Ok(value) => {
                info!(model = %preferred, "used requested model");
                return Ok((value, preferred));
            }
            Err(err) => {
                warn!(model = %preferred, error = %err, "requested model failed, sweeping catalog");
                last_error = Some(err);
                tried_preferred = Some(preferred);
            }
        }
    }

    let mut cooling = 0usize;
    let mut filtered = 0usize;

    for model in ctx.catalog.iter() {
        if tried_preferred.as_deref() == Some(model) {
            continue;
        }
        if ctx.permanent.is_permanent(model) {
            continue;
        }
        if !ctx.filter.matches(display_name(model)) {
            filtered += 1;
            continue;
        }
        if in_cooldown(ctx, model) {
            debug!(model, "skipping model in cooldown");
            cooling += 1;
            continue;
        }

        attempted += 1;
        debug!(model, attempt = attempted, "attempting model");
        match try_model(ctx, model, &mut attempt).await {
            Ok(value) => {
                info!(model, attempts = attempted, "selected free model");
                return Ok((value, model.to_owned()));
            }
            Err(err) => last_error = Some(err),
        }
    }

    let (permanent, temporary) = ctx.permanent.stats();
    match last_error {
        Some(source) => Err(SelectError::AllAttemptsFailed {
            attempted,
            permanent,
            temporary,
            source,
        }),
        None => Err(SelectError::NoModelsAvailable {
            cooling,
            permanent,
            filtered,
        }),
    }
}

/// One attempt through both rate-limiter gates, with book-keeping on either
/// outcome.
async fn try_model<'a, T>(
    ctx: &AppContext,
    model: &str,
    attempt: &mut impl FnMut(String) -> BoxFuture<'a, Result<T, UpstreamError>>,
) -> Result<T, UpstreamError> {
    let limiter = ctx.limiter.limiter(model);
    limiter.wait().await;
    ctx.limiter.wait_global().await;

    match attempt(model.to_owned()).await {
        Ok(value) => {
            limiter.record_success().await;
            if let Err(err) = ctx.failures.clear_failure(model) {
                debug!(model, error = %err, "failed to clear failure record");
            }
            Ok(value)
        }
        Err(err) => {
            note_failure(ctx, model, &err).await;
            Err(err)
        }
    }
}

/// Classify and record a failed attempt. Permanent absences go to both the
/// session blacklist and the durable store; everything else only cools down
/// in the store.
async fn note_failure(ctx: &AppContext, model: &str, err: &UpstreamError) {
    let message = err.to_string();
    ctx.limiter.limiter(model).record_failure(&message).await;

    let kind = if is_permanent_error(&message) {
        ctx.permanent.mark_permanent(model);
        warn!(model, error = %message, "model permanently unavailable, won't retry this session");
        FailureKind::General
    } else if is_rate_limit_error(&message) {
        ctx.permanent.mark_temporary(model);
        warn!(model, error = %message, "rate limit hit, backing off");
        FailureKind::RateLimit
    } else {
        ctx.permanent.mark_temporary(model);
        warn!(model, error = %message, "model failed, trying next");
        FailureKind::General
    };

    if let Err(db_err) = ctx.failures.mark_failure(model, kind) {
        warn!(model, error = %db_err, "failed to record failure");
    }

    if kind == FailureKind::RateLimit {
        sleep(RATE_LIMIT_PAUSE).await;
    }
}

fn in_cooldown(ctx: &AppContext, model: &str) -> bool {
    match ctx.failures.should_skip(model) {
        Ok(skip) => skip,
        Err(err) => {
            // A broken store must not take selection offline.
            debug!(model, error = %err, "failure store check failed");
            false
        }
    }
}
