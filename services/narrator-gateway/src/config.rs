//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are loaded from GEMINI_API_KEYS and ELEVENLABS_API_KEYS only,
//! never stored in the TOML, to avoid leaking secrets.

use common::Secret;
use key_rotation::RetryPolicy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub invoker: InvokerConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Retry behaviour shared by both providers
#[derive(Debug, Deserialize)]
pub struct InvokerConfig {
    #[serde(default = "default_retry_delay_ms")]
    pub transient_retry_delay_ms: u64,
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

/// Script generation provider
#[derive(Debug, Deserialize)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    /// Comma-separated keys from GEMINI_API_KEYS
    #[serde(skip)]
    pub api_keys: Option<Secret<String>>,
}

/// Speech provider
#[derive(Debug, Deserialize)]
pub struct ElevenLabsConfig {
    #[serde(default = "default_elevenlabs_base_url")]
    pub base_url: String,
    #[serde(default = "default_elevenlabs_model_id")]
    pub model_id: String,
    #[serde(default = "default_voices_file")]
    pub voices_file: PathBuf,
    /// Egress proxies, tried in order. Empty means direct connections.
    #[serde(default)]
    pub proxies: Vec<String>,
    /// Comma-separated keys from ELEVENLABS_API_KEYS
    #[serde(skip)]
    pub api_keys: Option<Secret<String>>,
}

fn default_max_connections() -> usize {
    256
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_transient_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    120
}

fn default_gemini_base_url() -> String {
    media_api::GEMINI_BASE_URL.to_string()
}

fn default_gemini_model() -> String {
    media_api::GEMINI_MODEL.to_string()
}

fn default_elevenlabs_base_url() -> String {
    media_api::ELEVENLABS_BASE_URL.to_string()
}

fn default_elevenlabs_model_id() -> String {
    media_api::ELEVENLABS_MODEL_ID.to_string()
}

fn default_voices_file() -> PathBuf {
    PathBuf::from("voices.json")
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            transient_retry_delay_ms: default_retry_delay_ms(),
            max_transient_retries: default_max_transient_retries(),
            request_timeout_secs: default_timeout(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
            api_keys: None,
        }
    }
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            base_url: default_elevenlabs_base_url(),
            model_id: default_elevenlabs_model_id(),
            voices_file: default_voices_file(),
            proxies: Vec::new(),
            api_keys: None,
        }
    }
}

impl InvokerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            transient_delay: Duration::from_millis(self.transient_retry_delay_ms),
            max_transient_retries: self.max_transient_retries,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Required: GEMINI_API_KEYS, ELEVENLABS_API_KEYS.
    /// Optional overrides: ELEVENLABS_PROXY_URLS, ELEVENLABS_MODEL_ID, GEMINI_MODEL.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        config.gemini.api_keys = Some(required_key_list("GEMINI_API_KEYS")?);
        config.elevenlabs.api_keys = Some(required_key_list("ELEVENLABS_API_KEYS")?);

        if let Ok(proxies) = std::env::var("ELEVENLABS_PROXY_URLS") {
            config.elevenlabs.proxies = proxies
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(model_id) = non_empty_env("ELEVENLABS_MODEL_ID") {
            config.elevenlabs.model_id = model_id;
        }
        if let Some(model) = non_empty_env("GEMINI_MODEL") {
            config.gemini.model = model;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        for (name, url) in [
            ("gemini.base_url", &self.gemini.base_url),
            ("elevenlabs.base_url", &self.elevenlabs.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.invoker.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("narrator-gateway.toml")
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Read a comma-separated key list that must contain at least one key.
fn required_key_list(var: &str) -> common::Result<Secret<String>> {
    let raw = std::env::var(var).map_err(|_| common::Error::MissingEnv(var.into()))?;
    if raw.split(',').all(|k| k.trim().is_empty()) {
        return Err(common::Error::Config(format!("{var} contains no keys")));
    }
    Ok(Secret::new(raw))
}
