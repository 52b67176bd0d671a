//! Application configuration for linkenrich.
//!
//! User config lives at `~/.linkenrich/linkenrich.toml`.
//! Environment variables override config file values, which override defaults;
//! CLI flags are applied last by the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LinkEnrichError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "linkenrich.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".linkenrich";

/// Overrides the location of the persisted resolution cache.
pub const CACHE_FILE_ENV: &str = "LINKENRICH_CACHE_FILE";

/// Overrides the GitHub API base URL.
pub const API_URL_ENV: &str = "LINKENRICH_API_URL";

/// Cache file path relative to the build output directory.
const CACHE_FILE_RELATIVE: &str = "cache/github-links.json";

// ---------------------------------------------------------------------------
// Config structs (matching linkenrich.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// GitHub API settings.
    #[serde(default)]
    pub github: GithubConfig,

    /// Batching and concurrency knobs.
    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Build output directory; the persisted cache lives underneath it.
    #[serde(default = "default_build_dir")]
    pub build_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            build_dir: default_build_dir(),
        }
    }
}

fn default_build_dir() -> String {
    "_build".into()
}

/// `[github]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Name of the env var holding the bearer token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// REST/GraphQL API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Web base URL used to recognize issue links and build profile links.
    #[serde(default = "default_web_url")]
    pub web_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            api_url: default_api_url(),
            web_url: default_web_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}
fn default_api_url() -> String {
    "https://api.github.com".into()
}
fn default_web_url() -> String {
    "https://github.com".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[resolver]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Issue numbers per repository entry in one batched query.
    #[serde(default = "default_per_repo_batch")]
    pub per_repo_batch: usize,

    /// Repository entries per batched query.
    #[serde(default = "default_repos_per_query")]
    pub repos_per_query: usize,

    /// Maximum in-flight remote requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            per_repo_batch: default_per_repo_batch(),
            repos_per_query: default_repos_per_query(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_per_repo_batch() -> usize {
    20
}
fn default_repos_per_query() -> usize {
    5
}
fn default_concurrency() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Enrich config (runtime, merged from config + environment)
// ---------------------------------------------------------------------------

/// Runtime configuration for one build, merged from config file + environment.
#[derive(Clone)]
pub struct EnrichConfig {
    /// Persisted cache location; `None` keeps the cache in memory only.
    pub cache_file: Option<PathBuf>,
    pub api_url: String,
    pub web_url: String,
    /// Optional bearer token; raises rate limits and enables batched queries.
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub per_repo_batch: usize,
    pub repos_per_query: usize,
    pub concurrency: usize,
}

impl std::fmt::Debug for EnrichConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichConfig")
            .field("cache_file", &self.cache_file)
            .field("api_url", &self.api_url)
            .field("web_url", &self.web_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("per_repo_batch", &self.per_repo_batch)
            .field("repos_per_query", &self.repos_per_query)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl From<&AppConfig> for EnrichConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            cache_file: Some(Path::new(&config.defaults.build_dir).join(CACHE_FILE_RELATIVE)),
            api_url: config.github.api_url.clone(),
            web_url: config.github.web_url.clone(),
            token: None,
            timeout_secs: config.github.timeout_secs,
            per_repo_batch: config.resolver.per_repo_batch,
            repos_per_query: config.resolver.repos_per_query,
            concurrency: config.resolver.concurrency,
        }
    }
}

impl EnrichConfig {
    /// Merge `config` with the process environment.
    pub fn resolve(config: &AppConfig) -> Result<Self> {
        Self::resolve_with(config, |name| std::env::var(name).ok())
    }

    /// Merge `config` with variables from `lookup` (injectable for tests).
    pub fn resolve_with(
        config: &AppConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut merged = Self::from(config);
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(path) = non_empty(CACHE_FILE_ENV) {
            merged.cache_file = Some(PathBuf::from(path));
        }
        if let Some(url) = non_empty(API_URL_ENV) {
            merged.api_url = url;
        }
        merged.token = non_empty(&config.github.token_env);

        merged.validate()?;
        Ok(merged)
    }

    /// Reject knob values that would make batching or scheduling meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.per_repo_batch == 0 || self.repos_per_query == 0 {
            return Err(LinkEnrichError::config(
                "resolver batch sizes must be at least 1",
            ));
        }
        if self.concurrency == 0 {
            return Err(LinkEnrichError::config("resolver concurrency must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.linkenrich/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LinkEnrichError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.linkenrich/linkenrich.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LinkEnrichError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        LinkEnrichError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LinkEnrichError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LinkEnrichError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LinkEnrichError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
