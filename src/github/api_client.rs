//! GitHub API client for user-level operations.
//!
//! Used on the OAuth side of the gateway: exchanging an authorization code for
//! a user access token, identifying the user, and checking whether the user
//! may manage a repository.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{API_VERSION, USER_AGENT};

/// Base URLs for GitHub, overridable for GitHub Enterprise and tests.
#[derive(Debug, Clone)]
pub struct GitHubEndpoints {
    /// REST API base, e.g. `https://api.github.com`
    pub api_base: String,
    /// Web base for OAuth, e.g. `https://github.com`
    pub web_base: String,
}

impl Default for GitHubEndpoints {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            web_base: "https://github.com".to_string(),
        }
    }
}

impl GitHubEndpoints {
    /// Authorization page the user is sent to at login. Without a
    /// `redirect_uri` GitHub uses the App's registered callback URL.
    pub fn authorize_url(&self, client_id: &str, redirect_uri: Option<&str>, state: &str) -> String {
        let mut url = format!(
            "{}/login/oauth/authorize?client_id={}&state={}",
            self.web_base.trim_end_matches('/'),
            url_encode(client_id),
            url_encode(state)
        );
        if let Some(redirect_uri) = redirect_uri {
            url.push_str("&redirect_uri=");
            url.push_str(&url_encode(redirect_uri));
        }
        url
    }
}

/// URL-encode a string for use in query parameters
fn url_encode(s: &str) -> String {
    percent_encode(s, false)
}

/// Like `url_encode`, but keeps `/` so a local path stays readable.
pub(crate) fn url_encode_path(s: &str) -> String {
    percent_encode(s, true)
}

fn percent_encode(s: &str, keep_slash: bool) -> String {
    let mut encoded = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            b'/' if keep_slash => encoded.push('/'),
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

/// Exchange an OAuth authorization code for a user access token.
pub async fn exchange_code(
    http: &reqwest::Client,
    endpoints: &GitHubEndpoints,
    client_id: &str,
    client_secret: &str,
    code: &str,
) -> Result<String> {
    let response = http
        .post(format!(
            "{}/login/oauth/access_token",
            endpoints.web_base.trim_end_matches('/')
        ))
        .header("Accept", "application/json")
        .header("User-Agent", USER_AGENT)
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
        ])
        .send()
        .await
        .context("Failed to exchange OAuth code")?;

    if !response.status().is_success() {
        anyhow::bail!("GitHub OAuth error: {}", response.status());
    }

    let token_response: OAuthTokenResponse = response
        .json()
        .await
        .context("Failed to parse OAuth token response")?;

    match (token_response.access_token, token_response.error) {
        (Some(token), _) if !token.is_empty() => Ok(token),
        (_, Some(error)) => anyhow::bail!("GitHub OAuth error: {}", error),
        _ => anyhow::bail!("GitHub OAuth response carried no access token"),
    }
}

/// GitHub API client authenticated as a user.
pub struct GitHubClient {
    access_token: String,
    api_base: String,
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(client: reqwest::Client, api_base: &str, access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Make an authenticated GET request to the GitHub API.
    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        self.get_optional(path)
            .await?
            .context("GitHub API error: 404 Not Found")
    }

    /// Like `get`, but a 404 is `None`.
    async fn get_optional<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<Option<T>> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await
            .context("Failed to make GitHub API request")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("GitHub API error: {}", response.status());
        }

        response
            .json()
            .await
            .map(Some)
            .context("Failed to parse GitHub API response")
    }

    /// The user the access token belongs to.
    pub async fn current_user(&self) -> Result<User> {
        self.get("/user").await
    }

    /// `None` when the repository doesn't exist or the user can't see it.
    pub async fn repository(&self, owner: &str, repo: &str) -> Result<Option<Repository>> {
        self.get_optional(&format!("/repos/{}/{}", url_encode(owner), url_encode(repo)))
            .await
    }

    /// Whether the user can push to (and so manage tokens for) the repository.
    pub async fn can_push(&self, owner: &str, repo: &str) -> Result<bool> {
        Ok(self
            .repository(owner, repo)
            .await?
            .and_then(|r| r.permissions)
            .map(|p| p.admin || p.push)
            .unwrap_or(false))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub full_name: String,
    #[serde(default)]
    pub permissions: Option<RepositoryPermissions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryPermissions {
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub pull: bool,
}
