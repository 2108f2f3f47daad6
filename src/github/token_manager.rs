//! Token management for GitHub App authentication.
//!
//! GitHub Apps use two types of authentication:
//! 1. App JWT - Short-lived JWT signed with the app's private key (for app-level operations)
//! 2. Installation Access Token - Token for a specific installation (for repo operations)

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::{API_VERSION, USER_AGENT};

/// Errors from minting installation access tokens.
///
/// Any of these means the installation is unusable for now; callers should
/// mark it inactive instead of retrying in a loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("failed to sign app JWT")]
    Signing,

    #[error("GitHub rejected the token request for installation {installation_id} ({status})")]
    Rejected { installation_id: i64, status: u16 },

    #[error("token request for installation {0} timed out")]
    Timeout(i64),

    #[error("token request for installation {0} failed to reach GitHub")]
    Transport(i64),

    #[error("invalid token response for installation {0}")]
    InvalidResponse(i64),

    #[error("token issued for installation {0} expires within the safety margin")]
    ShortLived(i64),
}

/// JWT claims for GitHub App authentication.
/// GitHub requires: iat (issued at), exp (expiration), iss (issuer = app_id)
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GitHubAppClaims {
    /// Issued at time (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp) - max 10 minutes
    pub exp: i64,
    /// Issuer - the GitHub App ID
    pub iss: String,
}

/// The App's identity and signing key, parsed once at startup.
#[derive(Clone)]
pub struct AppCredentials {
    pub app_id: i64,
    key: EncodingKey,
}

impl AppCredentials {
    /// Parse the App private key. Fails on anything that is not an RSA PEM.
    pub fn from_pem(app_id: i64, private_key_pem: &[u8]) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self {
            app_id,
            key: EncodingKey::from_rsa_pem(private_key_pem)?,
        })
    }

    pub fn app_jwt(&self) -> Result<String, TokenError> {
        generate_app_jwt(self.app_id, &self.key).map_err(|_| TokenError::Signing)
    }
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("key", &"[redacted]")
            .finish()
    }
}

/// Generate a JWT for GitHub App authentication.
///
/// The JWT is signed with RS256 (RSA-SHA256) using the app's private key.
/// It's valid for 10 minutes (GitHub's maximum).
///
/// # Example
/// ```ignore
/// let jwt = generate_app_jwt(12345, &key)?;
/// // Use: Authorization: Bearer {jwt}
/// ```
pub fn generate_app_jwt(app_id: i64, key: &EncodingKey) -> jsonwebtoken::errors::Result<String> {
    let now = Utc::now();
    // Issue time: 60 seconds in the past to account for clock drift
    let iat = now - Duration::seconds(60);
    let exp = now + Duration::minutes(10);

    let claims = GitHubAppClaims {
        iat: iat.timestamp(),
        exp: exp.timestamp(),
        iss: app_id.to_string(),
    };

    encode(&Header::new(Algorithm::RS256), &claims, key)
}

/// A short-lived bearer credential for one installation.
#[derive(Clone, PartialEq, Eq)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub installation_id: i64,
}

impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("installation_id", &self.installation_id)
            .field("expires_at", &self.expires_at)
            .field("token", &"[redacted]")
            .finish()
    }
}

/// Response from GitHub's installation access token endpoint.
#[derive(Debug, Deserialize)]
pub struct InstallationTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub permissions: Option<serde_json::Value>,
    pub repository_selection: Option<String>,
}

/// Mints installation access tokens.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, installation_id: i64) -> Result<InstallationToken, TokenError>;
}

/// Issues tokens through `POST /app/installations/{id}/access_tokens`.
pub struct GitHubTokenIssuer {
    credentials: Arc<AppCredentials>,
    client: reqwest::Client,
    api_base: String,
}

impl GitHubTokenIssuer {
    /// `timeout` bounds every request; a hung GitHub surfaces as
    /// [`TokenError::Timeout`].
    pub fn new(
        credentials: Arc<AppCredentials>,
        api_base: impl Into<String>,
        timeout: std::time::Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            credentials,
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TokenIssuer for GitHubTokenIssuer {
    async fn issue(&self, installation_id: i64) -> Result<InstallationToken, TokenError> {
        let jwt = self.credentials.app_jwt()?;

        let response = self
            .client
            .post(format!(
                "{}/app/installations/{}/access_tokens",
                self.api_base, installation_id
            ))
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    tracing::warn!(installation_id, "Installation token request timed out");
                    TokenError::Timeout(installation_id)
                } else {
                    tracing::warn!(installation_id, error = %e, "Installation token request failed");
                    TokenError::Transport(installation_id)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(
                installation_id,
                status = status.as_u16(),
                "GitHub rejected installation token request"
            );
            return Err(TokenError::Rejected {
                installation_id,
                status: status.as_u16(),
            });
        }

        let token_response: InstallationTokenResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                TokenError::Timeout(installation_id)
            } else {
                tracing::warn!(installation_id, error = %e, "Failed to parse installation token response");
                TokenError::InvalidResponse(installation_id)
            }
        })?;

        Ok(InstallationToken {
            token: token_response.token,
            expires_at: token_response.expires_at,
            installation_id,
        })
    }
}
