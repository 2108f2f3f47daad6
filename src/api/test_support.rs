//! Router fixtures: memory stores, a counting token issuer and test secrets.

use axum::{body::Body, http::Response, Router};
use http_body_util::BodyExt;
use std::sync::Arc;

use crate::config::{Config, Credentials};
use crate::crypto::{CipherBox, KEY_LENGTH};
use crate::directory::{MemoryInstallationStore, MemoryRepoTokenStore};
use crate::github::test_support::TEST_PRIVATE_KEY;
use crate::github::token_cache::tests::{CountingIssuer, ManualClock};
use crate::github::AppCredentials;
use crate::session::{Session, SESSION_COOKIE};
use crate::AppState;

const WEBHOOK_SECRET: &[u8] = b"test-webhook-secret";

pub(crate) struct TestApp {
    pub(crate) state: Arc<AppState>,
    pub(crate) issuer: Arc<CountingIssuer>,
}

impl TestApp {
    pub(crate) fn router(&self) -> Router {
        super::create_router(self.state.clone())
    }

    pub(crate) fn webhook_secret(&self) -> &'static [u8] {
        WEBHOOK_SECRET
    }

    /// `Cookie` header value carrying a sealed session for `login`.
    pub(crate) fn session_cookie(&self, login: &str) -> String {
        let cookie = self
            .state
            .cookies
            .encode(SESSION_COOKIE, &Session::new(1, login, "gho_user"))
            .unwrap();
        format!("{}={}", cookie.name(), cookie.value())
    }
}

fn credentials() -> Credentials {
    Credentials {
        app: Arc::new(AppCredentials::from_pem(12345, TEST_PRIVATE_KEY.as_bytes()).unwrap()),
        client_id: "Iv1.test".to_string(),
        client_secret: "shh".to_string(),
        webhook_secret: WEBHOOK_SECRET.to_vec(),
        cipher: Arc::new(CipherBox::new(&[7u8; KEY_LENGTH])),
    }
}

pub(crate) async fn test_app() -> TestApp {
    test_app_with(Config::default(), None).await
}

/// App whose user-level GitHub calls go to `github_base`.
pub(crate) async fn test_app_with_github(github_base: &str) -> TestApp {
    let mut config = Config::default();
    config.github.api_url = github_base.to_string();
    config.github.web_url = github_base.to_string();
    test_app_with(config, None).await
}

pub(crate) async fn test_app_with(config: Config, issuer: Option<Arc<CountingIssuer>>) -> TestApp {
    let issuer = issuer.unwrap_or_else(|| Arc::new(CountingIssuer::new(ManualClock::new())));
    let state = AppState::with_stores(
        config,
        credentials(),
        issuer.clone(),
        Arc::new(MemoryInstallationStore::new()),
        Arc::new(MemoryRepoTokenStore::new()),
    )
    .unwrap();

    TestApp {
        state: Arc::new(state),
        issuer,
    }
}

pub(crate) async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
