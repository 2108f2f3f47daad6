pub mod api;
pub mod config;
pub mod crypto;
pub mod db;
pub mod directory;
pub mod github;
pub mod session;
pub mod webhook;

pub use db::DbPool;

use anyhow::{Context, Result};
use config::{Config, Credentials};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;

use crate::api::check::{AcknowledgeCheck, CheckHandler};
use crate::directory::{
    InstallationDirectory, InstallationStore, RepoTokenStore, SqliteInstallationStore,
    SqliteRepoTokenStore,
};
use crate::github::{GitHubEndpoints, GitHubTokenIssuer, InstallationTokenCache, TokenIssuer};
use crate::session::{CookieManager, CookieOptions};
use crate::webhook::WebhookVerifier;

pub struct AppState {
    pub config: Config,
    pub credentials: Arc<Credentials>,
    pub endpoints: GitHubEndpoints,
    /// Client for user-level GitHub calls (OAuth exchange, permission checks)
    pub http: reqwest::Client,
    pub cookies: CookieManager,
    pub verifier: WebhookVerifier,
    pub tokens: Arc<InstallationTokenCache>,
    pub directory: Arc<InstallationDirectory>,
    pub repo_tokens: Arc<dyn RepoTokenStore>,
    pub check_handler: Arc<dyn CheckHandler>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    /// Production wiring: GitHub token issuer and SQLite-backed stores.
    pub fn new(config: Config, credentials: Credentials, db: DbPool) -> Result<Self> {
        let issuer = GitHubTokenIssuer::new(
            credentials.app.clone(),
            config.github.api_url.clone(),
            Duration::from_secs(config.github.request_timeout_secs),
        )
        .context("Failed to build GitHub client")?;

        Self::with_stores(
            config,
            credentials,
            Arc::new(issuer),
            Arc::new(SqliteInstallationStore::new(db.clone())),
            Arc::new(SqliteRepoTokenStore::new(db)),
        )
    }

    pub fn with_stores(
        config: Config,
        credentials: Credentials,
        issuer: Arc<dyn TokenIssuer>,
        installations: Arc<dyn InstallationStore>,
        repo_tokens: Arc<dyn RepoTokenStore>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.github.request_timeout_secs))
            .user_agent(github::USER_AGENT)
            .build()
            .context("Failed to build GitHub client")?;

        let tokens = Arc::new(InstallationTokenCache::new(
            issuer,
            chrono::Duration::seconds(config.github.token_safety_margin_secs),
        ));
        let directory = Arc::new(InstallationDirectory::new(installations, tokens.clone()));

        let cookies = CookieManager::new(
            credentials.cipher.clone(),
            CookieOptions::new(config.session.dev_mode, config.session.cookie_max_age_secs),
        );
        let verifier = WebhookVerifier::new(credentials.webhook_secret.clone());
        let endpoints = GitHubEndpoints {
            api_base: config.github.api_url.clone(),
            web_base: config.github.web_url.clone(),
        };

        Ok(Self {
            config,
            credentials: Arc::new(credentials),
            endpoints,
            http,
            cookies,
            verifier,
            tokens,
            directory,
            repo_tokens,
            check_handler: Arc::new(AcknowledgeCheck),
            metrics_handle: None,
        })
    }

    /// Replace the business logic run for authorized check requests
    pub fn with_check_handler(mut self, handler: Arc<dyn CheckHandler>) -> Self {
        self.check_handler = handler;
        self
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
