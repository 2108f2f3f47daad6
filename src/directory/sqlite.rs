//! SQLite-backed installation store.

use anyhow::Context;
use async_trait::async_trait;

use super::{full_name, Installation, InstallationStore, RepositorySelection};
use crate::db::{DbPool, InstallationRepositoryRow, InstallationRow};

#[derive(Debug, Clone)]
pub struct SqliteInstallationStore {
    db: DbPool,
}

impl SqliteInstallationStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn load(&self, row: InstallationRow) -> anyhow::Result<Installation> {
        let repositories = sqlx::query_as::<_, InstallationRepositoryRow>(
            "SELECT installation_id, full_name FROM installation_repositories WHERE installation_id = ?",
        )
        .bind(row.installation_id)
        .fetch_all(&self.db)
        .await?;

        Ok(Installation {
            id: row.installation_id,
            account_login: row.account_login,
            repository_selection: RepositorySelection::parse(Some(&row.repository_selection)),
            repositories: repositories.into_iter().map(|r| r.full_name).collect(),
            active: row.active,
        })
    }

    async fn load_all(&self, rows: Vec<InstallationRow>) -> anyhow::Result<Vec<Installation>> {
        let mut installations = Vec::with_capacity(rows.len());
        for row in rows {
            installations.push(self.load(row).await?);
        }
        Ok(installations)
    }
}

#[async_trait]
impl InstallationStore for SqliteInstallationStore {
    async fn upsert(&self, installation: &Installation) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO installations (installation_id, account_login, repository_selection, active)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(installation_id) DO UPDATE SET
                account_login = excluded.account_login,
                repository_selection = excluded.repository_selection,
                active = excluded.active,
                updated_at = datetime('now')
            "#,
        )
        .bind(installation.id)
        .bind(&installation.account_login)
        .bind(installation.repository_selection.as_str())
        .bind(installation.active)
        .execute(&mut *tx)
        .await
        .context("Failed to upsert installation")?;

        sqlx::query("DELETE FROM installation_repositories WHERE installation_id = ?")
            .bind(installation.id)
            .execute(&mut *tx)
            .await?;

        for name in &installation.repositories {
            sqlx::query(
                "INSERT OR IGNORE INTO installation_repositories (installation_id, full_name) VALUES (?, ?)",
            )
            .bind(installation.id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, installation_id: i64) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM installation_repositories WHERE installation_id = ?")
            .bind(installation_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM installations WHERE installation_id = ?")
            .bind(installation_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete installation")?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, installation_id: i64) -> anyhow::Result<Option<Installation>> {
        let row = sqlx::query_as::<_, InstallationRow>(
            "SELECT * FROM installations WHERE installation_id = ?",
        )
        .bind(installation_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_repo(&self, owner: &str, name: &str) -> anyhow::Result<Vec<Installation>> {
        let rows = sqlx::query_as::<_, InstallationRow>(
            r#"
            SELECT i.* FROM installations i
            JOIN installation_repositories r ON r.installation_id = i.installation_id
            WHERE r.full_name = ?
            ORDER BY i.active DESC, i.installation_id
            "#,
        )
        .bind(full_name(owner, name))
        .fetch_all(&self.db)
        .await?;

        self.load_all(rows).await
    }

    async fn find_by_account(&self, login: &str) -> anyhow::Result<Vec<Installation>> {
        let rows = sqlx::query_as::<_, InstallationRow>(
            r#"
            SELECT * FROM installations
            WHERE account_login = ? COLLATE NOCASE
            ORDER BY active DESC, installation_id
            "#,
        )
        .bind(login)
        .fetch_all(&self.db)
        .await?;

        self.load_all(rows).await
    }

    async fn add_repositories(&self, installation_id: i64, full_names: &[String]) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await?;
        for name in full_names {
            sqlx::query(
                "INSERT OR IGNORE INTO installation_repositories (installation_id, full_name) VALUES (?, ?)",
            )
            .bind(installation_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove_repositories(&self, installation_id: i64, full_names: &[String]) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await?;
        for name in full_names {
            sqlx::query(
                "DELETE FROM installation_repositories WHERE installation_id = ? AND full_name = ?",
            )
            .bind(installation_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_repository_selection(
        &self,
        installation_id: i64,
        selection: RepositorySelection,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE installations SET repository_selection = ?, updated_at = datetime('now') WHERE installation_id = ?",
        )
        .bind(selection.as_str())
        .bind(installation_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_active(&self, installation_id: i64, active: bool) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE installations SET active = ?, updated_at = datetime('now') WHERE installation_id = ?",
        )
        .bind(active)
        .bind(installation_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
