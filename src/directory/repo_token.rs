//! Per-repository bearer tokens.
//!
//! A logged-in user with push access fetches the token for a repository and
//! stores it as a CI secret; check requests present it as
//! `Authorization: bearer <token>`.

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use subtle::ConstantTimeEq;

use super::normalize_full_name;
use crate::db::{DbPool, RepoTokenRow};

/// Generate a fresh 64 hex character token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time equality of two tokens.
fn tokens_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[async_trait]
pub trait RepoTokenStore: Send + Sync {
    /// The token for `full_name`, created on first request.
    async fn get_or_create(&self, full_name: &str) -> anyhow::Result<String>;

    /// Whether `presented` is the token for `full_name`. Unknown repositories
    /// never verify.
    async fn verify(&self, full_name: &str, presented: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone)]
pub struct SqliteRepoTokenStore {
    db: DbPool,
}

impl SqliteRepoTokenStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn find(&self, full_name: &str) -> anyhow::Result<Option<RepoTokenRow>> {
        Ok(sqlx::query_as::<_, RepoTokenRow>(
            "SELECT full_name, token, created_at FROM repo_tokens WHERE full_name = ?",
        )
        .bind(full_name)
        .fetch_optional(&self.db)
        .await?)
    }
}

#[async_trait]
impl RepoTokenStore for SqliteRepoTokenStore {
    async fn get_or_create(&self, full_name: &str) -> anyhow::Result<String> {
        let full_name = normalize_full_name(full_name);

        // First writer wins; concurrent callers all read back the same token
        sqlx::query("INSERT OR IGNORE INTO repo_tokens (full_name, token) VALUES (?, ?)")
            .bind(&full_name)
            .bind(generate_token())
            .execute(&self.db)
            .await
            .context("Failed to store repository token")?;

        let row = self
            .find(&full_name)
            .await?
            .context("Repository token missing after insert")?;
        Ok(row.token)
    }

    async fn verify(&self, full_name: &str, presented: &str) -> anyhow::Result<bool> {
        let full_name = normalize_full_name(full_name);
        Ok(match self.find(&full_name).await? {
            Some(row) => tokens_match(&row.token, presented),
            None => false,
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryRepoTokenStore {
    tokens: DashMap<String, String>,
}

impl MemoryRepoTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepoTokenStore for MemoryRepoTokenStore {
    async fn get_or_create(&self, full_name: &str) -> anyhow::Result<String> {
        Ok(self
            .tokens
            .entry(normalize_full_name(full_name))
            .or_insert_with(generate_token)
            .value()
            .clone())
    }

    async fn verify(&self, full_name: &str, presented: &str) -> anyhow::Result<bool> {
        Ok(self
            .tokens
            .get(&normalize_full_name(full_name))
            .map(|token| tokens_match(token.value(), presented))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn check_store(store: &dyn RepoTokenStore) {
        let token = store.get_or_create("reviewdog/reviewdog").await.unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        // stable, and keyed case-insensitively
        assert_eq!(store.get_or_create("ReviewDog/ReviewDog").await.unwrap(), token);

        assert!(store.verify("reviewdog/reviewdog", &token).await.unwrap());
        assert!(store.verify("REVIEWDOG/reviewdog", &token).await.unwrap());
        assert!(!store.verify("reviewdog/reviewdog", "wrong").await.unwrap());
        assert!(!store.verify("reviewdog/reviewdog", "").await.unwrap());
        assert!(!store.verify("reviewdog/other", &token).await.unwrap());

        let other = store.get_or_create("reviewdog/other").await.unwrap();
        assert_ne!(other, token);
    }

    #[tokio::test]
    async fn test_memory_store() {
        check_store(&MemoryRepoTokenStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        check_store(&SqliteRepoTokenStore::new(test_pool().await)).await;
    }

    #[test]
    fn test_generated_tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }
}
