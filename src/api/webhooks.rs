use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;

use super::error::ApiError;
use super::metrics::record_webhook;
use crate::webhook::{WebhookEvent, EVENT_HEADER, SIGNATURE_HEADER};
use crate::AppState;

/// POST /gh_/webhook
///
/// The signature is checked against the raw body before anything is parsed;
/// a delivery that fails verification never touches the directory.
pub async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("GitHub webhook missing {} header", SIGNATURE_HEADER);
            record_webhook("unauthorized");
            ApiError::unauthorized("Invalid webhook signature")
        })?;

    if !state.verifier.verify(&body, signature) {
        tracing::warn!("GitHub webhook signature verification failed");
        record_webhook("unauthorized");
        return Err(ApiError::unauthorized("Invalid webhook signature"));
    }

    let event_name = headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok());
    let delivery = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    let event = WebhookEvent::parse(event_name, &body).map_err(|e| {
        tracing::warn!(delivery, event = ?event_name, "Failed to parse GitHub webhook payload: {}", e);
        record_webhook("invalid");
        ApiError::bad_request("Invalid webhook payload")
    })?;

    tracing::info!(delivery, event = ?event_name, "GitHub webhook received");

    state.directory.apply(&event).await.map_err(|e| {
        tracing::error!(delivery, "Failed to apply GitHub webhook: {}", e);
        record_webhook("error");
        ApiError::from(e)
    })?;

    record_webhook("accepted");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{body_json, test_app};
    use crate::webhook::sign;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    const BODY: &str = r#"{"action":"created","installation":{"id":42}}"#;

    fn delivery(event: &str, body: &str, signature: Option<String>) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/gh_/webhook")
            .header("Content-Type", "application/json")
            .header("X-GitHub-Event", event);
        if let Some(signature) = signature {
            request = request.header("X-Hub-Signature-256", signature);
        }
        request.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_signed_installation_is_registered() {
        let app = test_app().await;
        let signature = sign(app.webhook_secret(), BODY.as_bytes());

        let response = app
            .router()
            .oneshot(delivery("installation", BODY, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(app.state.directory.get(42).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_other_secret_is_rejected_without_mutation() {
        let app = test_app().await;
        let signature = sign(b"some-other-secret", BODY.as_bytes());

        let response = app
            .router()
            .oneshot(delivery("installation", BODY, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "unauthorized");
        assert!(app.state.directory.get(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_signature_is_rejected() {
        let app = test_app().await;

        let response = app
            .router()
            .oneshot(delivery("installation", BODY, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(app.state.directory.get(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_signed_garbage_is_bad_request() {
        let app = test_app().await;
        let body = "{not json";
        let signature = sign(app.webhook_secret(), body.as_bytes());

        let response = app
            .router()
            .oneshot(delivery("installation", body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unrelated_event_is_acknowledged() {
        let app = test_app().await;
        let body = r#"{"zen":"Keep it logically awesome."}"#;
        let signature = sign(app.webhook_secret(), body.as_bytes());

        let response = app
            .router()
            .oneshot(delivery("ping", body, Some(signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_repositories_event_updates_directory() {
        let app = test_app().await;
        let created = r#"{"action":"created","installation":{"id":7,"account":{"login":"reviewdog"}},"repositories":[]}"#;
        let added = r#"{"action":"added","installation":{"id":7},"repository_selection":"selected","repositories_added":[{"full_name":"reviewdog/reviewdog"}],"repositories_removed":[]}"#;

        for (event, body) in [("installation", created), ("installation_repositories", added)] {
            let signature = sign(app.webhook_secret(), body.as_bytes());
            let response = app
                .router()
                .oneshot(delivery(event, body, Some(signature)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(
            app.state.directory.lookup("reviewdog", "reviewdog").await.unwrap(),
            7
        );
    }
}
