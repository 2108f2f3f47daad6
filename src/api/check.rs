//! Check requests from CI.
//!
//! A CI job presents the repository token and names the repository. The
//! gateway resolves the installation, obtains an installation access token and
//! hands both to the [`CheckHandler`], which owns the actual check logic.

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use super::metrics::record_check;
use crate::directory::{full_name, DirectoryError};
use crate::github::InstallationToken;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub sha: Option<String>,
    /// Check name shown on GitHub
    #[serde(default)]
    pub name: Option<String>,
    /// Everything else the caller sent, passed through untouched
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// An authorized check request.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub installation_id: i64,
    pub token: InstallationToken,
    pub request: CheckRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub repository: String,
    pub installation_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
}

/// Business logic run once a check request is authorized.
#[async_trait]
pub trait CheckHandler: Send + Sync {
    async fn handle(&self, ctx: CheckContext) -> anyhow::Result<CheckResponse>;
}

/// Accepts every authorized request without calling GitHub.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcknowledgeCheck;

#[async_trait]
impl CheckHandler for AcknowledgeCheck {
    async fn handle(&self, ctx: CheckContext) -> anyhow::Result<CheckResponse> {
        let repository = format!("{}/{}", ctx.request.owner, ctx.request.repo);
        tracing::info!(
            installation_id = ctx.installation_id,
            repository = %repository,
            sha = ?ctx.request.sha,
            "Check request acknowledged"
        );
        Ok(CheckResponse {
            repository,
            installation_id: ctx.installation_id,
            report_url: None,
            conclusion: None,
        })
    }
}

/// Extract the token from `Authorization: bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// POST /check
pub async fn check(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CheckResponse>, ApiError> {
    let Some(presented) = bearer_token(&headers) else {
        record_check("unauthorized");
        return Err(ApiError::unauthorized("Missing repository token"));
    };

    let request: CheckRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!("Invalid check request: {}", e);
        record_check("invalid");
        ApiError::bad_request("Invalid check request")
    })?;
    let repository = full_name(&request.owner, &request.repo);

    let valid = state
        .repo_tokens
        .verify(&repository, presented)
        .await
        .map_err(|e| {
            tracing::error!("Repository token lookup failed: {:#}", e);
            record_check("error");
            ApiError::database("A database error occurred")
        })?;
    if !valid {
        tracing::warn!(repository = %repository, "Check request with invalid repository token");
        record_check("unauthorized");
        return Err(ApiError::unauthorized("Invalid repository token"));
    }

    let installation_id = match state.directory.lookup(&request.owner, &request.repo).await {
        Ok(id) => id,
        Err(e) => {
            record_check(match e {
                DirectoryError::NotFound(_) => "not_found",
                DirectoryError::Inactive(_) => "inactive",
                DirectoryError::Store(_) => "error",
            });
            return Err(e.into());
        }
    };

    let token = match state.tokens.get_token(installation_id).await {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(installation_id, error = %e, "Could not obtain installation token");
            record_check("token_error");
            if let Err(mark_err) = state.directory.mark_inactive(installation_id).await {
                tracing::error!(installation_id, "Failed to mark installation inactive: {}", mark_err);
            }
            return Err(ApiError::bad_gateway("Failed to obtain GitHub installation token"));
        }
    };

    let response = state
        .check_handler
        .handle(CheckContext {
            installation_id,
            token,
            request,
        })
        .await
        .map_err(|e| {
            tracing::error!(installation_id, "Check handler failed: {:#}", e);
            record_check("error");
            ApiError::internal("Check failed")
        })?;

    record_check("ok");
    Ok(Json(response))
}
