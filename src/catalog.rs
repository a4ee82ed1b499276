//! Free-model catalog: discovery, ranking, and the stale-tolerant file cache.
//!
//! The catalog is loaded once at startup and immutable afterwards. On disk it
//! is plain UTF-8, one model id per line, in ranked order; the file's mtime is
//! the cache key.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::client::{Provider, UpstreamError};
use crate::filter::{ModelFilter, supports_tools};
use crate::models::{UpstreamModel, display_name};

/// Ordered list of zero-priced model ids, largest context first. The order is
/// the default fallback order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    models: Vec<String>,
}

impl Catalog {
    pub fn new(models: Vec<String>) -> Self {
        Self { models }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.models.iter().any(|model| model == id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Expand a display name to the catalog entry it belongs to, skipping
    /// entries the filter rejects. Names that resolve to nothing are returned
    /// unchanged.
    pub fn resolve(&self, requested: &str, filter: &ModelFilter) -> String {
        for id in &self.models {
            let display = display_name(id);
            if display == requested && filter.matches(display) {
                return id.clone();
            }
        }
        requested.to_owned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to fetch free models: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("provider returned no free models")]
    Empty,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Load the catalog, refreshing the cache file when it is older than `ttl`.
/// A failed refresh falls back to the cache even when stale; only a missing
/// cache surfaces the error.
pub async fn ensure_catalog<P: Provider>(
    provider: &P,
    path: &Path,
    ttl: Duration,
    tool_use_only: bool,
) -> Result<Catalog, CatalogError> {
    if let Some(age) = cache_age(path)
        && age < ttl
    {
        debug!(path = %path.display(), "free model cache is fresh");
        return Ok(Catalog::new(read_cache(path)?));
    }

    match fetch_free_models(provider, tool_use_only).await {
        Ok(models) => {
            if let Err(err) = write_cache(path, &models) {
                warn!(error = %err, path = %path.display(), "failed to persist free model cache");
            }
            Ok(Catalog::new(models))
        }
        Err(err) => {
            if path.exists() {
                warn!(error = %err, "free model refresh failed, falling back to stale cache");
                return Ok(Catalog::new(read_cache(path)?));
            }
            Err(err)
        }
    }
}

async fn fetch_free_models<P: Provider>(
    provider: &P,
    tool_use_only: bool,
) -> Result<Vec<String>, CatalogError> {
    let models = provider.list_models().await?;
    let ranked = rank_free_models(models, tool_use_only);
    // An empty result is a refresh failure: a stale cache beats no catalog.
    if ranked.is_empty() {
        return Err(CatalogError::Empty);
    }
    info!(count = ranked.len(), "discovered free models");
    Ok(ranked)
}

/// Keep zero-priced entries (both prices the literal `"0"`), optionally only
/// tool-capable ones, ranked by effective context length descending. The
/// top-provider context wins when non-zero. Stable sort keeps ties in
/// provider order.
fn rank_free_models(models: Vec<UpstreamModel>, tool_use_only: bool) -> Vec<String> {
    let mut items: Vec<(String, u64)> = models
        .into_iter()
        .filter(|model| model.pricing.prompt == "0" && model.pricing.completion == "0")
        .filter(|model| !tool_use_only || supports_tools(&model.supported_parameters))
        .map(|model| {
            let context = if model.top_provider.context_length != 0 {
                model.top_provider.context_length
            } else {
                model.context_length
            };
            (model.id, context)
        })
        .collect();
    items.sort_by(|a, b| b.1.cmp(&a.1));
    items.into_iter().map(|(id, _)| id).collect()
}

fn cache_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

fn read_cache(path: &Path) -> io::Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Write to a sibling temp file and rename into place.
fn write_cache(path: &Path, models: &[String]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, models.join("\n"))?;
    fs::rename(&tmp, path)
}
