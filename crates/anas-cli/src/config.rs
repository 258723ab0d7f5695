//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `--config <path>`
//! 2. `$ANAS_CONFIG` environment variable
//! 3. `~/.config/anas/config.toml`
//! 4. Built-in defaults (everything is optional)
//!
//! `ANAS_*` environment variables override the file afterwards.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub benchmark: BenchmarkConfig,
}

/// Durable store settings.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path. Default: platform-specific data dir.
    pub path: Option<String>,
    /// Run and benchmark retention. 0 or negative keeps entries forever.
    pub ttl_hours: i64,
    pub gc_interval_secs: u64,
}

/// HTTP server settings.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub cors_allowed_origins: Vec<String>,
    /// Default page size for run listings.
    pub list_limit: usize,
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
}

/// Grading model endpoint.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Replaces the built-in system prompt template.
    pub prompt_template: Option<String>,
    pub estimated_minutes: u64,
}

// --- Defaults ---

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            ttl_hours: 168,
            gc_interval_secs: 300,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            cors_allowed_origins: vec!["http://localhost:3000".into()],
            list_limit: 10,
            max_body_bytes: anas_api::server::DEFAULT_BODY_LIMIT,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "gpt-4".into(),
            timeout_secs: 120,
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            prompt_template: None,
            estimated_minutes: 5,
        }
    }
}

impl StoreConfig {
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs.max(1))
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl BenchmarkConfig {
    pub fn estimate(&self) -> Duration {
        Duration::from_secs(self.estimated_minutes * 60)
    }
}

impl Config {
    /// Apply `ANAS_*` overrides read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("ANAS_RUN_DATA_TTL_HOURS") {
            self.store.ttl_hours = v
                .trim()
                .parse()
                .with_context(|| format!("ANAS_RUN_DATA_TTL_HOURS: invalid integer '{v}'"))?;
        }
        if let Some(v) = var("ANAS_CORS_ALLOWED_ORIGINS") {
            self.server.cors_allowed_origins = v
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = var("ANAS_LLM_URL") {
            self.llm.url = v;
        }
        if let Some(v) = var("ANAS_LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = var("ANAS_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = var("ANAS_DB_PATH") {
            self.store.path = Some(v);
        }
        if let Some(v) = var("ANAS_BIND") {
            self.server.bind = v;
        }
        Ok(())
    }

    /// Copy with the API key masked, for display.
    pub fn redacted(&self) -> Result<String> {
        let mut value = toml::Value::try_from(self).context("serializing config")?;
        if let Some(key) = value
            .get_mut("llm")
            .and_then(|llm| llm.get_mut("api_key"))
        {
            if key.as_str().is_some_and(|k| !k.is_empty()) {
                *key = toml::Value::String("********".into());
            }
        }
        toml::to_string_pretty(&value).context("rendering config")
    }
}

/// Load config from disk and the environment. Returns defaults if no config
/// file exists.
pub fn load_config(explicit: Option<&PathBuf>) -> Result<Config> {
    let mut config = match config_path(explicit) {
        Some(p) if p.exists() => {
            let content =
                std::fs::read_to_string(&p).with_context(|| format!("reading {}", p.display()))?;
            toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?
        }
        Some(p) if explicit.is_some() => {
            anyhow::bail!("config file {} does not exist", p.display())
        }
        _ => Config::default(),
    };
    config.apply_env(|name| std::env::var(name).ok())?;
    Ok(config)
}

/// Resolve the config file path.
fn config_path(explicit: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.clone());
    }

    if let Ok(p) = std::env::var("ANAS_CONFIG") {
        return Some(PathBuf::from(p));
    }

    dirs_home().map(|home| home.join(".config").join("anas").join("config.toml"))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

/// Show the active config path (for `anas config`).
pub fn show_config_path(explicit: Option<&PathBuf>) -> String {
    match config_path(explicit) {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}
