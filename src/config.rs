//! Process configuration, sourced from the environment (every variable also
//! doubles as a CLI flag).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::warn;

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Ollama- and OpenAI-compatible proxy for OpenRouter free models")]
pub struct Config {
    /// Bearer credential for the upstream provider.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub openrouter_api_key: Option<String>,

    /// Deprecated alias for the upstream credential.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Free-model selection is engaged unless this is the literal "false".
    #[arg(long, env = "FREE_MODE", default_value = "true")]
    pub free_mode: String,

    /// Restrict the catalog and listings to tool-capable models.
    #[arg(long, env = "TOOL_USE_ONLY", default_value = "false")]
    pub tool_use_only: String,

    /// Model allowlist file; a missing file disables filtering.
    #[arg(long, env = "MODEL_FILTER_PATH", default_value = "/models-filter/filter")]
    pub model_filter_path: PathBuf,

    /// Free-model catalog cache file.
    #[arg(long, env = "FREE_MODELS_CACHE", default_value = "free-models")]
    pub free_models_cache: PathBuf,

    /// Failure store database.
    #[arg(long, env = "FAILURE_DB", default_value = "failures.db")]
    pub failure_db: PathBuf,

    /// Catalog cache freshness window, in hours.
    #[arg(long, env = "CACHE_TTL_HOURS", default_value_t = 24)]
    pub cache_ttl_hours: u64,

    /// Default failure cooldown, in minutes.
    #[arg(long, env = "FAILURE_COOLDOWN_MINUTES", default_value_t = 5)]
    pub failure_cooldown_minutes: u64,

    /// Rate-limit failure cooldown, in minutes.
    #[arg(long, env = "RATELIMIT_COOLDOWN_MINUTES", default_value_t = 1)]
    pub ratelimit_cooldown_minutes: u64,

    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 11434)]
    pub port: u16,

    /// debug | info | warn | error
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Resolve the upstream credential, preferring `OPENROUTER_API_KEY`.
    pub fn api_key(&self) -> Result<String> {
        if let Some(key) = &self.openrouter_api_key
            && !key.is_empty()
        {
            return Ok(key.clone());
        }
        if let Some(key) = &self.openai_api_key
            && !key.is_empty()
        {
            warn!("Using deprecated OPENAI_API_KEY env var. Please use OPENROUTER_API_KEY instead.");
            return Ok(key.clone());
        }
        Err(anyhow!("OPENROUTER_API_KEY environment variable not set"))
    }

    pub fn free_mode(&self) -> bool {
        !self.free_mode.eq_ignore_ascii_case("false")
    }

    pub fn tool_use_only(&self) -> bool {
        self.tool_use_only.eq_ignore_ascii_case("true")
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 60 * 60)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown_minutes * 60)
    }

    pub fn ratelimit_cooldown(&self) -> Duration {
        Duration::from_secs(self.ratelimit_cooldown_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("freeway").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = parse(&[]);
        assert_eq!(config.port, 11434);
        assert_eq!(config.cache_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(config.failure_cooldown(), Duration::from_secs(300));
        assert_eq!(config.ratelimit_cooldown(), Duration::from_secs(60));
        assert_eq!(config.log_level, "info");
        assert!(config.free_mode());
        assert!(!config.tool_use_only());
    }

    #[test]
    fn free_mode_is_off_only_for_the_literal_false() {
        assert!(!parse(&["--free-mode", "false"]).free_mode());
        assert!(!parse(&["--free-mode", "FALSE"]).free_mode());
        assert!(parse(&["--free-mode", "0"]).free_mode());
        assert!(parse(&["--free-mode", "no"]).free_mode());
        assert!(parse(&["--free-mode", "true"]).free_mode());
    }

    #[test]
    fn tool_use_only_requires_the_literal_true() {
        assert!(parse(&["--tool-use-only", "true"]).tool_use_only());
        assert!(parse(&["--tool-use-only", "TRUE"]).tool_use_only());
        assert!(!parse(&["--tool-use-only", "1"]).tool_use_only());
        assert!(!parse(&["--tool-use-only", "yes"]).tool_use_only());
    }

    #[test]
    fn preferred_key_wins_over_the_deprecated_one() {
        let config = parse(&[
            "--openrouter-api-key",
            "sk-or-primary",
            "--openai-api-key",
            "sk-legacy",
        ]);
        assert_eq!(config.api_key().unwrap(), "sk-or-primary");
    }

    #[test]
    fn deprecated_key_is_accepted_alone() {
        let config = parse(&["--openai-api-key", "sk-legacy"]);
        assert_eq!(config.api_key().unwrap(), "sk-legacy");
    }

    #[test]
    fn missing_key_is_an_error() {
        let mut config = parse(&[]);
        // The test process may have real keys in its environment.
        config.openrouter_api_key = None;
        config.openai_api_key = None;
        assert!(config.api_key().is_err());
    }
}
