//! Request pacing toward the upstream.
//!
//! Two gates stand before every attempt: a per-model limiter (minimum spacing
//! plus exponential backoff after rate limits) and a process-wide gate that
//! keeps a minimum gap between any two upstream calls, whatever the model.

use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::debug;

use crate::errors::is_rate_limit_error;

/// Minimum spacing between requests to the same model.
const MIN_INTERVAL: Duration = Duration::from_millis(50);
/// Minimum spacing between any two upstream requests, process-wide.
const GLOBAL_MIN_INTERVAL: Duration = Duration::from_millis(50);
const BASE_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct RateState {
    last_request: Option<Instant>,
    failure_count: u32,
    backoff_until: Option<Instant>,
}

/// Per-model pacing gate. Lazily created on first use, never destroyed.
#[derive(Debug, Default)]
pub struct RateLimiter {
    state: Mutex<RateState>,
}

impl RateLimiter {
    /// Wait out any active backoff and the minimum spacing, then stamp the
    /// request time. The lock is held across the sleeps, so concurrent
    /// callers for the same model queue behind each other.
    pub async fn wait(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(until) = state.backoff_until
            && until > now
        {
            debug!(wait = ?(until - now), "waiting out backoff");
            sleep_until(until).await;
        }
        if let Some(last) = state.last_request {
            let next = last + MIN_INTERVAL;
            if next > Instant::now() {
                sleep_until(next).await;
            }
        }
        state.last_request = Some(Instant::now());
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.failure_count = 0;
        state.backoff_until = None;
    }

    /// Count the failure; rate-limit failures arm an exponential backoff with
    /// ±25% jitter.
    pub async fn record_failure(&self, message: &str) {
        let mut state = self.state.lock().await;
        state.failure_count += 1;
        if is_rate_limit_error(message) {
            let backoff = backoff_delay(state.failure_count);
            state.backoff_until = Some(Instant::now() + backoff);
            debug!(
                failures = state.failure_count,
                ?backoff,
                "rate limit detected, backing off"
            );
        }
    }

    #[cfg(test)]
    async fn backoff_remaining(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        state
            .backoff_until
            .map(|until| until.saturating_duration_since(Instant::now()))
    }
}

/// `base * 2^(failures-1)`, capped, then jittered by ±25%.
fn backoff_delay(failure_count: u32) -> Duration {
    let exponent = failure_count.saturating_sub(1).min(20);
    let raw = BASE_DELAY.as_millis() as u64 * (1u64 << exponent);
    let capped = raw.min(MAX_DELAY.as_millis() as u64);
    let jitter = rand::rng().random_range(0.75..=1.25);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

/// Registry of per-model limiters plus the process-wide spacing gate.
#[derive(Debug, Default)]
pub struct GlobalRateLimiter {
    limiters: DashMap<String, Arc<RateLimiter>>,
    last_global: Mutex<Option<Instant>>,
}

impl GlobalRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limiter(&self, model: &str) -> Arc<RateLimiter> {
        self.limiters
            .entry(model.to_owned())
            .or_default()
            .value()
            .clone()
    }

    /// Enforce the global gap. The mutex is held across the sleep: the gate
    /// serializes spacing, it makes no fairness promise.
    pub async fn wait_global(&self) {
        let mut last = self.last_global.lock().await;
        if let Some(previous) = *last {
            let next = previous + GLOBAL_MIN_INTERVAL;
            if next > Instant::now() {
                sleep_until(next).await;
            }
        }
        *last = Some(Instant::now());
    }
}
