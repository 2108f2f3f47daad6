use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::crypto::CipherBox;
use crate::github::AppCredentials;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Externally visible base URL, used to build the OAuth redirect URI.
    /// When unset, GitHub falls back to the App's registered callback URL.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            public_url: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// REST API base URL (GitHub Enterprise: `https://<host>/api/v3`)
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Web base URL used for the OAuth flow
    #[serde(default = "default_web_url")]
    pub web_url: String,
    /// Upper bound on every outbound GitHub request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Cached installation tokens are refreshed this long before they expire
    #[serde(default = "default_token_safety_margin_secs")]
    pub token_safety_margin_secs: i64,
    /// PEM private key of the App. `GITHUB_PRIVATE_KEY_PATH` takes precedence.
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            web_url: default_web_url(),
            request_timeout_secs: default_request_timeout_secs(),
            token_safety_margin_secs: default_token_safety_margin_secs(),
            private_key_path: default_private_key_path(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_web_url() -> String {
    "https://github.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_token_safety_margin_secs() -> i64 {
    crate::github::token_cache::DEFAULT_SAFETY_MARGIN_SECS
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("./secret/github-apps.private-key.pem")
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_max_age_secs")]
    pub cookie_max_age_secs: i64,
    /// Local development: cookies are issued without the Secure flag
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_max_age_secs: default_cookie_max_age_secs(),
            dev_mode: false,
        }
    }
}

fn default_cookie_max_age_secs() -> i64 {
    crate::session::DEFAULT_MAX_AGE_SECS
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

/// Environment variables holding the App's secrets.
pub mod env {
    pub const INTEGRATION_ID: &str = "GITHUB_INTEGRATION_ID";
    pub const PRIVATE_KEY_PATH: &str = "GITHUB_PRIVATE_KEY_PATH";
    pub const CLIENT_ID: &str = "GITHUB_CLIENT_ID";
    pub const CLIENT_SECRET: &str = "GITHUB_CLIENT_SECRET";
    pub const WEBHOOK_SECRET: &str = "GITHUB_WEBHOOK_SECRET";
    pub const SECRETBOX_SECRET: &str = "SECRETBOX_SECRET";
}

/// Secrets loaded once at startup. Immutable afterwards.
pub struct Credentials {
    pub app: Arc<AppCredentials>,
    pub client_id: String,
    pub client_secret: String,
    pub webhook_secret: Vec<u8>,
    pub cipher: Arc<CipherBox>,
}

impl Credentials {
    /// Load from the process environment.
    pub fn from_env(github: &GitHubConfig) -> Result<Self> {
        Self::from_lookup(github, |name| std::env::var(name).ok())
    }

    /// Load through `lookup`, failing on the first missing or malformed value.
    pub fn from_lookup<F>(github: &GitHubConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String> {
            lookup(name)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("{} is not set", name))
        };

        let app_id: i64 = required(env::INTEGRATION_ID)?
            .trim()
            .parse()
            .with_context(|| format!("{} must be an integer", env::INTEGRATION_ID))?;

        let key_path = lookup(env::PRIVATE_KEY_PATH)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| github.private_key_path.clone());
        let pem = std::fs::read(&key_path)
            .with_context(|| format!("Failed to read App private key: {}", key_path.display()))?;
        let app = AppCredentials::from_pem(app_id, &pem)
            .with_context(|| format!("Invalid App private key: {}", key_path.display()))?;

        let cipher = CipherBox::from_hex_key(&required(env::SECRETBOX_SECRET)?)
            .with_context(|| format!("Invalid {}", env::SECRETBOX_SECRET))?;

        Ok(Self {
            app: Arc::new(app),
            client_id: required(env::CLIENT_ID)?,
            client_secret: required(env::CLIENT_SECRET)?,
            webhook_secret: required(env::WEBHOOK_SECRET)?.into_bytes(),
            cipher: Arc::new(cipher),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app", &self.app)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("webhook_secret", &"[redacted]")
            .field("cipher", &self.cipher)
            .finish()
    }
}
