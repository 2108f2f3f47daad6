//! Row types for GitHub App installations and repository tokens.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A GitHub App installation as stored in `installations`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstallationRow {
    /// GitHub installation ID
    pub installation_id: i64,
    /// User or organization the App is installed on
    pub account_login: String,
    /// `all` or `selected`
    pub repository_selection: String,
    /// Cleared when GitHub refuses to mint tokens for the installation
    pub active: bool,

    // Metadata
    pub created_at: String,
    pub updated_at: String,
}

/// A repository granted to an installation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstallationRepositoryRow {
    pub installation_id: i64,
    /// Lowercased `owner/name`
    pub full_name: String,
}

/// Bearer secret CI presents for a repository.
#[derive(Clone, FromRow)]
pub struct RepoTokenRow {
    pub full_name: String,
    pub token: String,
    pub created_at: String,
}

impl std::fmt::Debug for RepoTokenRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoTokenRow")
            .field("full_name", &self.full_name)
            .field("token", &"[redacted]")
            .field("created_at", &self.created_at)
            .finish()
    }
}
