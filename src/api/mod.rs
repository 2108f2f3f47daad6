pub mod check;
pub mod error;
mod gh;
pub mod metrics;
pub mod oauth;
mod webhooks;

#[cfg(test)]
pub(crate) mod test_support;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        // CI
        .route("/check", post(check::check))
        // GitHub callbacks and login flow
        .route("/gh_/webhook", post(webhooks::github_webhook))
        .route("/gh_/auth/login", get(oauth::login))
        .route(oauth::CALLBACK_PATH, get(oauth::callback))
        .route("/gh_/logout", get(oauth::logout))
        // Logged-in users
        .route("/gh/", get(gh::index))
        .route("/gh/:owner/:repo", get(gh::repository))
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> &'static str {
    "doghouse: reviewdog GitHub App gateway"
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::test_support::test_app;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get(uri: &str) -> (StatusCode, String) {
        let app = test_app().await;
        let response = app
            .router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_index_and_health() {
        let (status, body) = get("/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("doghouse"));

        assert_eq!(get("/health").await, (StatusCode::OK, "OK".to_string()));
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let (status, _) = get("/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, _) = get("/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
