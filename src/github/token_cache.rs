//! Per-installation cache of installation access tokens.
//!
//! Tokens are kept in memory only; losing the cache just costs a re-mint.
//! A token is served only while `expires_at - now > safety_margin`. Refreshes
//! are single-flight per installation: concurrent callers for the same
//! installation wait on one mint, callers for other installations never block
//! on it.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::token_manager::{InstallationToken, TokenError, TokenIssuer};
use crate::api::metrics::TOKEN_MINTS_TOTAL;

/// Default refresh buffer before a token's real expiry
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 5 * 60;

/// Source of "now", swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct InstallationTokenCache {
    issuer: Arc<dyn TokenIssuer>,
    clock: Arc<dyn Clock>,
    safety_margin: Duration,
    entries: DashMap<i64, InstallationToken>,
    refresh_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl InstallationTokenCache {
    pub fn new(issuer: Arc<dyn TokenIssuer>, safety_margin: Duration) -> Self {
        Self {
            issuer,
            clock: Arc::new(SystemClock),
            safety_margin,
            entries: DashMap::new(),
            refresh_locks: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    fn is_fresh(&self, token: &InstallationToken) -> bool {
        token.expires_at - self.clock.now() > self.safety_margin
    }

    fn cached(&self, installation_id: i64) -> Option<InstallationToken> {
        self.entries
            .get(&installation_id)
            .map(|entry| entry.value().clone())
            .filter(|token| self.is_fresh(token))
    }

    /// Return a token for `installation_id` that is valid for longer than the
    /// safety margin, minting a new one if needed.
    pub async fn get_token(&self, installation_id: i64) -> Result<InstallationToken, TokenError> {
        if let Some(token) = self.cached(installation_id) {
            debug!(installation_id, "Installation token cache hit");
            return Ok(token);
        }

        let lock = self
            .refresh_locks
            .entry(installation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(token) = self.cached(installation_id) {
            debug!(installation_id, "Installation token refreshed by concurrent caller");
            return Ok(token);
        }

        let token = match self.issuer.issue(installation_id).await {
            Ok(token) => token,
            Err(e) => {
                self.entries.remove(&installation_id);
                metrics::counter!(TOKEN_MINTS_TOTAL, "result" => "error").increment(1);
                warn!(installation_id, error = %e, "Failed to mint installation token");
                return Err(e);
            }
        };

        if !self.is_fresh(&token) {
            self.entries.remove(&installation_id);
            metrics::counter!(TOKEN_MINTS_TOTAL, "result" => "short_lived").increment(1);
            warn!(
                installation_id,
                expires_at = %token.expires_at,
                "Minted installation token is already inside the safety margin"
            );
            return Err(TokenError::ShortLived(installation_id));
        }

        self.entries.insert(installation_id, token.clone());
        metrics::counter!(TOKEN_MINTS_TOTAL, "result" => "ok").increment(1);
        info!(installation_id, expires_at = %token.expires_at, "Minted installation token");

        Ok(token)
    }

    fn refresh_lock(&self, installation_id: i64) -> Option<Arc<Mutex<()>>> {
        self.refresh_locks
            .get(&installation_id)
            .map(|entry| entry.value().clone())
    }

    /// Forget any cached token for `installation_id`.
    ///
    /// Waits for an in-flight mint of the same installation, so a token minted
    /// before the eviction is never stored after it.
    pub async fn evict(&self, installation_id: i64) {
        let lock = self.refresh_lock(installation_id);
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        if self.entries.remove(&installation_id).is_some() {
            debug!(installation_id, "Evicted installation token");
        }
    }

    /// Evict the token and drop the refresh lock of an installation that is
    /// gone for good.
    pub async fn forget(&self, installation_id: i64) {
        let Some(lock) = self.refresh_lock(installation_id) else {
            self.entries.remove(&installation_id);
            return;
        };
        let _guard = lock.lock().await;
        self.entries.remove(&installation_id);
        self.refresh_locks
            .remove_if(&installation_id, |_, current| Arc::ptr_eq(current, &lock));
        debug!(installation_id, "Forgot installation");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
