//! In-memory installation store for tests and local development.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{full_name, Installation, InstallationStore, RepositorySelection};

#[derive(Debug, Default)]
pub struct MemoryInstallationStore {
    installations: DashMap<i64, Installation>,
}

impl MemoryInstallationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<F>(&self, predicate: F) -> Vec<Installation>
    where
        F: Fn(&Installation) -> bool,
    {
        let mut found: Vec<Installation> = self
            .installations
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by_key(|i| (!i.active, i.id));
        found
    }
}

#[async_trait]
impl InstallationStore for MemoryInstallationStore {
    async fn upsert(&self, installation: &Installation) -> anyhow::Result<()> {
        self.installations.insert(installation.id, installation.clone());
        Ok(())
    }

    async fn delete(&self, installation_id: i64) -> anyhow::Result<bool> {
        Ok(self.installations.remove(&installation_id).is_some())
    }

    async fn get(&self, installation_id: i64) -> anyhow::Result<Option<Installation>> {
        Ok(self
            .installations
            .get(&installation_id)
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_repo(&self, owner: &str, name: &str) -> anyhow::Result<Vec<Installation>> {
        let wanted = full_name(owner, name);
        Ok(self.collect(|i| i.repositories.contains(&wanted)))
    }

    async fn find_by_account(&self, login: &str) -> anyhow::Result<Vec<Installation>> {
        Ok(self.collect(|i| i.account_login.eq_ignore_ascii_case(login)))
    }

    async fn add_repositories(&self, installation_id: i64, full_names: &[String]) -> anyhow::Result<()> {
        if let Some(mut entry) = self.installations.get_mut(&installation_id) {
            entry.repositories.extend(full_names.iter().cloned());
        }
        Ok(())
    }

    async fn remove_repositories(&self, installation_id: i64, full_names: &[String]) -> anyhow::Result<()> {
        if let Some(mut entry) = self.installations.get_mut(&installation_id) {
            for name in full_names {
                entry.repositories.remove(name);
            }
        }
        Ok(())
    }

    async fn set_repository_selection(
        &self,
        installation_id: i64,
        selection: RepositorySelection,
    ) -> anyhow::Result<()> {
        if let Some(mut entry) = self.installations.get_mut(&installation_id) {
            entry.repository_selection = selection;
        }
        Ok(())
    }

    async fn set_active(&self, installation_id: i64, active: bool) -> anyhow::Result<bool> {
        match self.installations.get_mut(&installation_id) {
            Some(mut entry) => {
                entry.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
