//! Application configuration for Pagewise.
//!
//! User config lives at `~/.pagewise/pagewise.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PagewiseError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pagewise.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pagewise";

// ---------------------------------------------------------------------------
// Config structs (matching pagewise.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Per-session exploration limits.
    #[serde(default)]
    pub session: SessionDefaults,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Crawl policies.
    #[serde(default)]
    pub crawl_policies: CrawlPoliciesConfig,

    /// Sandbox limits for generated code.
    #[serde(default)]
    pub sandbox: SandboxSettings,
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    /// Maximum explore rounds per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Maximum pages visited over the session's lifetime.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum pages the oracle may pick per explore round.
    #[serde(default = "default_max_urls_per_iteration")]
    pub max_urls_per_iteration: usize,

    /// Maximum outbound links registered per crawled page.
    #[serde(default = "default_max_links_per_page")]
    pub max_links_per_page: usize,

    /// Page content is truncated to this many characters.
    #[serde(default = "default_content_max_chars")]
    pub content_max_chars: usize,

    /// Display width for unvisited URLs in the decision context.
    #[serde(default = "default_url_display_width")]
    pub url_display_width: usize,

    /// Extra decision requests after an unusable oracle reply.
    #[serde(default = "default_decision_retries")]
    pub decision_retries: u32,

    /// Standing instruction passed to every prompt.
    #[serde(default = "default_instruction")]
    pub instruction: String,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_pages: default_max_pages(),
            max_urls_per_iteration: default_max_urls_per_iteration(),
            max_links_per_page: default_max_links_per_page(),
            content_max_chars: default_content_max_chars(),
            url_display_width: default_url_display_width(),
            decision_retries: default_decision_retries(),
            instruction: default_instruction(),
        }
    }
}

fn default_max_iterations() -> usize {
    5
}
fn default_max_pages() -> usize {
    100
}
fn default_max_urls_per_iteration() -> usize {
    5
}
fn default_max_links_per_page() -> usize {
    300
}
fn default_content_max_chars() -> usize {
    10_000
}
fn default_url_display_width() -> usize {
    80
}
fn default_decision_retries() -> u32 {
    2
}
fn default_instruction() -> String {
    "Provide helpful and accurate answers based on the website content.".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for decisions, answers, and code generation.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// API base URL (OpenAI-compatible).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Extra attempts after a failed completion request.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between attempts in milliseconds.
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            max_retries: default_max_retries(),
            retry_wait_ms: default_retry_wait_ms(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_wait_ms() -> u64 {
    1000
}

/// `[crawl_policies]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlPoliciesConfig {
    /// Allow-list entries: URL prefixes (`https://docs.example.com/guide`)
    /// or bare domains (`example.com`). Empty means "derive from start URLs".
    #[serde(default)]
    pub allowed: Vec<String>,

    /// Maximum concurrent page fetches within one batch.
    #[serde(default = "default_crawl_concurrency")]
    pub concurrency: u32,

    /// Delay in ms before each request.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// Extra attempts for a page whose fetch failed.
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,

    /// Delay in ms between fetch attempts.
    #[serde(default = "default_fetch_retry_wait")]
    pub retry_wait_ms: u64,
}

impl Default for CrawlPoliciesConfig {
    fn default() -> Self {
        Self {
            allowed: Vec::new(),
            concurrency: default_crawl_concurrency(),
            rate_limit_ms: default_rate_limit(),
            max_retries: default_fetch_retries(),
            retry_wait_ms: default_fetch_retry_wait(),
        }
    }
}

fn default_crawl_concurrency() -> u32 {
    4
}
fn default_rate_limit() -> u64 {
    200
}
fn default_fetch_retries() -> u32 {
    2
}
fn default_fetch_retry_wait() -> u64 {
    1000
}

/// `[sandbox]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Wall-clock limit per execution, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Time between SIGTERM and SIGKILL on timeout, in seconds.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// stdout/stderr are each capped to this many characters.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,

    /// Longest shell command accepted.
    #[serde(default = "default_max_command_len")]
    pub max_command_len: usize,

    /// Maximum count of `;` (and separately `|`) in a shell command.
    #[serde(default = "default_max_separators")]
    pub max_separators: usize,

    /// Interpreter used for generated scripts.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            grace_secs: default_grace_secs(),
            max_output_chars: default_max_output_chars(),
            max_command_len: default_max_command_len(),
            max_separators: default_max_separators(),
            interpreter: default_interpreter(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_grace_secs() -> u64 {
    5
}
fn default_max_output_chars() -> usize {
    10_000
}
fn default_max_command_len() -> usize {
    5_000
}
fn default_max_separators() -> usize {
    10
}
fn default_interpreter() -> String {
    "python3".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config file + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime session limits.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_iterations: usize,
    pub max_pages: usize,
    pub max_urls_per_iteration: usize,
    pub max_links_per_page: usize,
    pub content_max_chars: usize,
    pub url_display_width: usize,
    pub decision_retries: u32,
    /// Allow-list entries (prefixes or domains). Empty admits any valid http(s) URL.
    pub allowed: Vec<String>,
    pub instruction: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SessionConfig {
    fn from(config: &AppConfig) -> Self {
        let s = &config.session;
        Self {
            max_iterations: s.max_iterations,
            max_pages: s.max_pages,
            max_urls_per_iteration: s.max_urls_per_iteration,
            max_links_per_page: s.max_links_per_page,
            content_max_chars: s.content_max_chars,
            url_display_width: s.url_display_width,
            decision_retries: s.decision_retries,
            allowed: config.crawl_policies.allowed.clone(),
            instruction: s.instruction.clone(),
        }
    }
}

/// Runtime crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Maximum concurrent HTTP requests per batch.
    pub concurrency: u32,
    /// Delay in ms before each request.
    pub rate_limit_ms: u64,
    /// Extra attempts for a failed fetch.
    pub max_retries: u32,
    /// Delay in ms between fetch attempts.
    pub retry_wait_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.crawl_policies.concurrency,
            rate_limit_ms: config.crawl_policies.rate_limit_ms,
            max_retries: config.crawl_policies.max_retries,
            retry_wait_ms: config.crawl_policies.retry_wait_ms,
        }
    }
}

/// Runtime sandbox configuration.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub timeout: Duration,
    pub grace: Duration,
    pub max_output_chars: usize,
    pub max_command_len: usize,
    pub max_separators: usize,
    pub interpreter: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SandboxConfig {
    fn from(config: &AppConfig) -> Self {
        let s = &config.sandbox;
        Self {
            timeout: Duration::from_secs(s.timeout_secs),
            grace: Duration::from_secs(s.grace_secs),
            max_output_chars: s.max_output_chars,
            max_command_len: s.max_command_len,
            max_separators: s.max_separators,
            interpreter: s.interpreter.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pagewise/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PagewiseError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pagewise/pagewise.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| PagewiseError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PagewiseError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PagewiseError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PagewiseError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PagewiseError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty.
/// Returns the key on success.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(PagewiseError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
