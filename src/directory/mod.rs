//! Installation directory: which App installation serves which repository.
//!
//! Kept current from `installation` and `installation_repositories` webhook
//! deliveries. Repository full names are compared case-insensitively; they are
//! normalized to lowercase before reaching a store.

mod memory;
pub mod repo_token;
mod sqlite;

pub use memory::MemoryInstallationStore;
pub use repo_token::{MemoryRepoTokenStore, RepoTokenStore, SqliteRepoTokenStore};
pub use sqlite::SqliteInstallationStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::github::InstallationTokenCache;
use crate::webhook::{InstallationEvent, InstallationRepositoriesEvent, RepositoryRef, WebhookEvent};

#[derive(Error, Debug)]
pub enum DirectoryError {
    /// No installation covers the repository. Retryable: the webhook that
    /// registers it may not have arrived yet.
    #[error("no installation found for {0}")]
    NotFound(String),

    #[error("installation {0} is inactive")]
    Inactive(i64),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositorySelection {
    All,
    Selected,
}

impl RepositorySelection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositorySelection::All => "all",
            RepositorySelection::Selected => "selected",
        }
    }

    /// Anything other than `all` is treated as `selected`.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("all") => RepositorySelection::All,
            _ => RepositorySelection::Selected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    pub id: i64,
    pub account_login: String,
    pub repository_selection: RepositorySelection,
    /// Lowercased `owner/name` entries
    pub repositories: BTreeSet<String>,
    pub active: bool,
}

impl Installation {
    pub fn new(id: i64, account_login: impl Into<String>) -> Self {
        Self {
            id,
            account_login: account_login.into(),
            repository_selection: RepositorySelection::Selected,
            repositories: BTreeSet::new(),
            active: true,
        }
    }

    pub fn with_selection(mut self, selection: RepositorySelection) -> Self {
        self.repository_selection = selection;
        self
    }

    pub fn with_repositories<I, S>(mut self, repositories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.repositories = repositories
            .into_iter()
            .map(|r| normalize_full_name(r.as_ref()))
            .collect();
        self
    }
}

pub fn normalize_full_name(full_name: &str) -> String {
    full_name.trim().to_lowercase()
}

/// Lowercased `owner/name`.
pub fn full_name(owner: &str, name: &str) -> String {
    normalize_full_name(&format!("{}/{}", owner, name))
}

/// Persistence for installations. Implementations receive normalized
/// repository names.
#[async_trait]
pub trait InstallationStore: Send + Sync {
    /// Insert or replace the installation and its repository set.
    async fn upsert(&self, installation: &Installation) -> anyhow::Result<()>;

    /// Returns whether anything was deleted.
    async fn delete(&self, installation_id: i64) -> anyhow::Result<bool>;

    async fn get(&self, installation_id: i64) -> anyhow::Result<Option<Installation>>;

    /// Installations that list `owner/name` explicitly, active ones first.
    async fn find_by_repo(&self, owner: &str, name: &str) -> anyhow::Result<Vec<Installation>>;

    /// Installations on the account `login`, matched case-insensitively.
    async fn find_by_account(&self, login: &str) -> anyhow::Result<Vec<Installation>>;

    async fn add_repositories(&self, installation_id: i64, full_names: &[String]) -> anyhow::Result<()>;

    async fn remove_repositories(&self, installation_id: i64, full_names: &[String]) -> anyhow::Result<()>;

    async fn set_repository_selection(
        &self,
        installation_id: i64,
        selection: RepositorySelection,
    ) -> anyhow::Result<()>;

    /// Returns whether the installation exists.
    async fn set_active(&self, installation_id: i64, active: bool) -> anyhow::Result<bool>;
}

/// Maps repositories to installations and keeps the token cache consistent
/// with installation lifecycle changes.
pub struct InstallationDirectory {
    store: Arc<dyn InstallationStore>,
    tokens: Arc<InstallationTokenCache>,
}

impl InstallationDirectory {
    pub fn new(store: Arc<dyn InstallationStore>, tokens: Arc<InstallationTokenCache>) -> Self {
        Self { store, tokens }
    }

    /// Idempotent.
    pub async fn upsert(&self, installation: Installation) -> Result<(), DirectoryError> {
        self.store.upsert(&installation).await?;
        info!(
            installation_id = installation.id,
            account = %installation.account_login,
            repositories = installation.repositories.len(),
            selection = installation.repository_selection.as_str(),
            "Installation registered"
        );
        Ok(())
    }

    /// Idempotent. The cached token for the installation is dropped too.
    pub async fn delete(&self, installation_id: i64) -> Result<(), DirectoryError> {
        let deleted = self.store.delete(installation_id).await?;
        self.tokens.forget(installation_id).await;
        if deleted {
            info!(installation_id, "Installation removed");
        } else {
            debug!(installation_id, "Delete for unknown installation ignored");
        }
        Ok(())
    }

    pub async fn get(&self, installation_id: i64) -> Result<Option<Installation>, DirectoryError> {
        Ok(self.store.get(installation_id).await?)
    }

    /// Resolve the installation that serves `owner/name`.
    ///
    /// An explicit repository grant wins over an account-wide installation.
    pub async fn lookup(&self, owner: &str, name: &str) -> Result<i64, DirectoryError> {
        let mut inactive = None;

        let explicit = self.store.find_by_repo(owner, name).await?;
        for installation in &explicit {
            if installation.active {
                return Ok(installation.id);
            }
            inactive.get_or_insert(installation.id);
        }

        let account_wide = self.store.find_by_account(owner).await?;
        for installation in account_wide
            .iter()
            .filter(|i| i.repository_selection == RepositorySelection::All)
        {
            if installation.active {
                return Ok(installation.id);
            }
            inactive.get_or_insert(installation.id);
        }

        match inactive {
            Some(id) => Err(DirectoryError::Inactive(id)),
            None => Err(DirectoryError::NotFound(full_name(owner, name))),
        }
    }

    /// Stop serving the installation until GitHub tells us otherwise.
    pub async fn mark_inactive(&self, installation_id: i64) -> Result<(), DirectoryError> {
        self.tokens.evict(installation_id).await;
        if self.store.set_active(installation_id, false).await? {
            warn!(installation_id, "Installation marked inactive");
        }
        Ok(())
    }

    /// Apply a verified webhook event.
    pub async fn apply(&self, event: &WebhookEvent) -> Result<(), DirectoryError> {
        match event {
            WebhookEvent::Installation(e) => self.apply_installation(e).await,
            WebhookEvent::InstallationRepositories(e) => self.apply_repositories(e).await,
            WebhookEvent::Ping | WebhookEvent::Other(_) => Ok(()),
        }
    }

    async fn apply_installation(&self, event: &InstallationEvent) -> Result<(), DirectoryError> {
        let id = event.installation.id;

        match event.action.as_str() {
            "created" => self.upsert(installation_from(event)).await,
            "new_permissions_accepted" | "unsuspend" => {
                match self.store.get(id).await? {
                    Some(mut existing) => {
                        existing.active = true;
                        if let Some(selection) = &event.installation.repository_selection {
                            existing.repository_selection = RepositorySelection::parse(Some(selection));
                        }
                        if !event.repositories.is_empty() {
                            existing.repositories = names(&event.repositories).into_iter().collect();
                        }
                        self.tokens.evict(id).await;
                        self.upsert(existing).await
                    }
                    None => self.upsert(installation_from(event)).await,
                }
            }
            "deleted" => self.delete(id).await,
            "suspend" => self.mark_inactive(id).await,
            other => {
                debug!(installation_id = id, action = other, "Ignoring installation action");
                Ok(())
            }
        }
    }

    async fn apply_repositories(
        &self,
        event: &InstallationRepositoriesEvent,
    ) -> Result<(), DirectoryError> {
        let id = event.installation.id;
        let selection = event
            .repository_selection
            .as_deref()
            .or(event.installation.repository_selection.as_deref());

        let Some(existing) = self.store.get(id).await? else {
            // Delivered before (or without) the installation event
            let installation = Installation::new(id, account_login(&event.installation))
                .with_selection(RepositorySelection::parse(selection))
                .with_repositories(event.repositories_added.iter().map(|r| r.full_name.as_str()));
            return self.upsert(installation).await;
        };

        // Token scope follows the granted repositories
        self.tokens.evict(id).await;
        if !existing.active {
            self.store.set_active(id, true).await?;
            info!(installation_id = id, "Installation reactivated");
        }

        if let Some(selection) = selection {
            self.store
                .set_repository_selection(id, RepositorySelection::parse(Some(selection)))
                .await?;
        }

        let added = names(&event.repositories_added);
        if !added.is_empty() {
            self.store.add_repositories(id, &added).await?;
        }

        let removed = names(&event.repositories_removed);
        if !removed.is_empty() {
            self.store.remove_repositories(id, &removed).await?;
        }

        info!(
            installation_id = id,
            action = %event.action,
            added = added.len(),
            removed = removed.len(),
            "Installation repositories updated"
        );
        Ok(())
    }
}

fn account_login(payload: &crate::webhook::InstallationPayload) -> String {
    payload
        .account
        .as_ref()
        .map(|a| a.login.clone())
        .unwrap_or_default()
}

fn names(repositories: &[RepositoryRef]) -> Vec<String> {
    repositories
        .iter()
        .map(|r| normalize_full_name(&r.full_name))
        .collect()
}

fn installation_from(event: &InstallationEvent) -> Installation {
    Installation::new(event.installation.id, account_login(&event.installation))
        .with_selection(RepositorySelection::parse(
            event.installation.repository_selection.as_deref(),
        ))
        .with_repositories(event.repositories.iter().map(|r| r.full_name.as_str()))
}
