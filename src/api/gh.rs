//! Pages for logged-in users.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use std::sync::Arc;

use super::error::ApiError;
use super::oauth::{login_path, see_other};
use crate::directory::full_name;
use crate::github::GitHubClient;
use crate::session::Session;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub login: String,
    pub user_id: i64,
}

#[derive(Serialize)]
pub struct RepositoryTokenResponse {
    pub repository: String,
    pub installation_id: i64,
    pub token: String,
}

/// The session, or a redirect through login back to `return_to`.
fn require_session(state: &AppState, jar: &CookieJar, return_to: &str) -> Result<Session, Response> {
    state.cookies.session(jar).map_err(|e| {
        tracing::debug!("No usable session: {}", e);
        see_other(&login_path(return_to))
    })
}

/// GET /gh/
pub async fn index(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    match require_session(&state, &jar, "/gh/") {
        Ok(session) => Json(UserResponse {
            login: session.login,
            user_id: session.user_id,
        })
        .into_response(),
        Err(redirect) => redirect,
    }
}

/// GET /gh/:owner/:repo
///
/// Hands out the repository token to users who can push to the repository.
pub async fn repository(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path((owner, repo)): Path<(String, String)>,
) -> Response {
    let session = match require_session(&state, &jar, &format!("/gh/{}/{}", owner, repo)) {
        Ok(session) => session,
        Err(redirect) => return redirect,
    };

    match repository_token(&state, &session, &owner, &repo).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn repository_token(
    state: &AppState,
    session: &Session,
    owner: &str,
    repo: &str,
) -> Result<RepositoryTokenResponse, ApiError> {
    let client = GitHubClient::new(
        state.http.clone(),
        &state.endpoints.api_base,
        session.access_token.as_str(),
    );

    let can_push = client.can_push(owner, repo).await.map_err(|e| {
        tracing::warn!(login = %session.login, "Failed to check repository permissions: {:#}", e);
        ApiError::bad_gateway("Failed to check repository permissions")
    })?;
    if !can_push {
        tracing::info!(login = %session.login, owner, repo, "Repository token denied");
        return Err(ApiError::forbidden("Push access to the repository is required"));
    }

    let installation_id = state.directory.lookup(owner, repo).await?;

    let repository = full_name(owner, repo);
    let token = state
        .repo_tokens
        .get_or_create(&repository)
        .await
        .map_err(|e| {
            tracing::error!("Failed to issue repository token: {:#}", e);
            ApiError::database("A database error occurred")
        })?;

    tracing::info!(login = %session.login, repository = %repository, "Repository token issued");

    Ok(RepositoryTokenResponse {
        repository,
        installation_id,
        token,
    })
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{body_json, test_app, test_app_with_github};
    use crate::directory::Installation;
    use crate::github::test_support::spawn_server;
    use axum::{
        body::Body,
        extract::Path,
        http::{header, Request, StatusCode},
        routing::get,
        Json, Router,
    };
    use tower::ServiceExt;

    fn fake_github() -> Router {
        Router::new().route(
            "/repos/:owner/:repo",
            get(|Path((owner, repo)): Path<(String, String)>| async move {
                Json(serde_json::json!({
                    "id": 1,
                    "full_name": format!("{}/{}", owner, repo),
                    "permissions": {"admin": false, "push": repo != "readonly", "pull": true}
                }))
            }),
        )
    }

    fn get_with_cookie(uri: &str, cookie: Option<String>) -> Request<Body> {
        let mut request = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        request.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_index_requires_session() {
        let app = test_app().await;
        let response = app.router().oneshot(get_with_cookie("/gh/", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/gh_/auth/login?redirect_to=/gh/"
        );
    }

    #[tokio::test]
    async fn test_index_with_session() {
        let app = test_app().await;
        let response = app
            .router()
            .oneshot(get_with_cookie("/gh/", Some(app.session_cookie("octocat"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["login"], "octocat");
    }

    #[tokio::test]
    async fn test_tampered_session_redirects_to_login() {
        let app = test_app().await;
        let response = app
            .router()
            .oneshot(get_with_cookie("/gh/", Some("doghouse_session=garbage".to_string())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn test_repository_token_issued() {
        let base = spawn_server(fake_github()).await;
        let app = test_app_with_github(&base).await;
        app.state
            .directory
            .upsert(Installation::new(42, "reviewdog").with_repositories(["reviewdog/reviewdog"]))
            .await
            .unwrap();

        let response = app
            .router()
            .oneshot(get_with_cookie(
                "/gh/reviewdog/reviewdog",
                Some(app.session_cookie("octocat")),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["installation_id"], 42);
        let token = body["token"].as_str().unwrap().to_string();
        assert!(app
            .state
            .repo_tokens
            .verify("reviewdog/reviewdog", &token)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_repository_token_requires_push() {
        let base = spawn_server(fake_github()).await;
        let app = test_app_with_github(&base).await;
        app.state
            .directory
            .upsert(Installation::new(42, "reviewdog").with_repositories(["reviewdog/readonly"]))
            .await
            .unwrap();

        let response = app
            .router()
            .oneshot(get_with_cookie(
                "/gh/reviewdog/readonly",
                Some(app.session_cookie("octocat")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_repository_without_installation() {
        let base = spawn_server(fake_github()).await;
        let app = test_app_with_github(&base).await;

        let response = app
            .router()
            .oneshot(get_with_cookie(
                "/gh/reviewdog/reviewdog",
                Some(app.session_cookie("octocat")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_repository_requires_session() {
        let app = test_app().await;
        let response = app
            .router()
            .oneshot(get_with_cookie("/gh/reviewdog/reviewdog", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/gh_/auth/login?redirect_to=/gh/reviewdog/reviewdog"
        );
    }
}
