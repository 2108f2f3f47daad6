//! GitHub OAuth login for the user-facing pages.

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::error::ApiError;
use crate::github::api_client::{self, url_encode_path};
use crate::github::GitHubClient;
use crate::session::{OAuthState, Session, OAUTH_STATE_COOKIE, SESSION_COOKIE};
use crate::AppState;

/// The login round trip must finish within this window
const OAUTH_STATE_MAX_AGE_SECS: i64 = 10 * 60;

const DEFAULT_REDIRECT: &str = "/gh/";

pub const CALLBACK_PATH: &str = "/gh_/auth/callback";

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub redirect_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Only local absolute paths made of visible ASCII are allowed as post-login
/// targets. Browsers drop tabs and newlines, so `/\t/host` would leave the site.
fn sanitize_redirect(target: Option<&str>) -> String {
    match target {
        Some(t)
            if t.starts_with('/')
                && !t.starts_with("//")
                && t.bytes().all(|b| b.is_ascii_graphic() && b != b'\\') =>
        {
            t.to_string()
        }
        _ => DEFAULT_REDIRECT.to_string(),
    }
}

/// 303 to `location`, or to the default page if it is not a valid header value.
pub(super) fn see_other(location: &str) -> Response {
    let location = HeaderValue::from_str(location).unwrap_or_else(|_| {
        tracing::warn!("Refusing to redirect to an invalid location");
        HeaderValue::from_static(DEFAULT_REDIRECT)
    });
    (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response()
}

/// Login URL that returns the user to `redirect_to` afterwards.
pub fn login_path(redirect_to: &str) -> String {
    format!("/gh_/auth/login?redirect_to={}", url_encode_path(redirect_to))
}

/// GET /gh_/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let oauth_state = OAuthState::new(sanitize_redirect(query.redirect_to.as_deref()));

    let cookie = state
        .cookies
        .encode_with_max_age(OAUTH_STATE_COOKIE, &oauth_state, OAUTH_STATE_MAX_AGE_SECS)
        .map_err(|_| ApiError::internal("Failed to start login"))?;

    let redirect_uri = state
        .config
        .server
        .public_url
        .as_deref()
        .map(|base| format!("{}{}", base.trim_end_matches('/'), CALLBACK_PATH));

    let url = state.endpoints.authorize_url(
        &state.credentials.client_id,
        redirect_uri.as_deref(),
        &oauth_state.nonce,
    );

    Ok((jar.add(cookie), see_other(&url)))
}

/// GET /gh_/auth/callback
pub async fn callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(error) = &query.error {
        tracing::info!(error = %error, "GitHub OAuth authorization was not granted");
        return Err(ApiError::unauthorized("GitHub authorization was not granted"));
    }

    let expected: OAuthState = state
        .cookies
        .decode(&jar, OAUTH_STATE_COOKIE)
        .map_err(|_| ApiError::unauthorized("Invalid OAuth state"))?;

    let presented = query.state.as_deref().unwrap_or_default();
    if !bool::from(expected.nonce.as_bytes().ct_eq(presented.as_bytes())) {
        tracing::warn!("OAuth callback state mismatch");
        return Err(ApiError::unauthorized("Invalid OAuth state"));
    }

    let code = query
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing OAuth code"))?;

    let access_token = api_client::exchange_code(
        &state.http,
        &state.endpoints,
        &state.credentials.client_id,
        &state.credentials.client_secret,
        code,
    )
    .await
    .map_err(|e| {
        tracing::warn!("OAuth code exchange failed: {:#}", e);
        ApiError::bad_gateway("GitHub login failed")
    })?;

    let user = GitHubClient::new(state.http.clone(), &state.endpoints.api_base, access_token.as_str())
        .current_user()
        .await
        .map_err(|e| {
            tracing::warn!("Failed to fetch GitHub user: {:#}", e);
            ApiError::bad_gateway("GitHub login failed")
        })?;

    let session = Session::new(user.id, &user.login, access_token);
    let cookie = state
        .cookies
        .encode(SESSION_COOKIE, &session)
        .map_err(|_| ApiError::internal("Failed to create session"))?;

    tracing::info!(login = %user.login, "User logged in");

    let jar = jar
        .add(state.cookies.clear(OAUTH_STATE_COOKIE))
        .add(cookie);
    Ok((jar, see_other(&expected.redirect_to)))
}

/// GET /gh_/logout
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    (jar.add(state.cookies.clear(SESSION_COOKIE)), see_other("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{test_app, test_app_with_github, TestApp};
    use crate::github::test_support::spawn_server;
    use axum::{
        body::Body,
        http::{header, HeaderMap, Request, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use tower::ServiceExt;

    fn fake_github() -> Router {
        Router::new()
            .route(
                "/login/oauth/access_token",
                post(|| async { Json(serde_json::json!({"access_token": "gho_user"})) }),
            )
            .route(
                "/user",
                get(|| async { Json(serde_json::json!({"id": 583231, "login": "octocat"})) }),
            )
    }

    fn set_cookies(response: &axum::response::Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    /// `name=value` for a Set-Cookie header
    fn cookie_pair(set_cookie: &str) -> String {
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[test]
    fn test_sanitize_redirect() {
        assert_eq!(sanitize_redirect(Some("/gh/reviewdog/reviewdog")), "/gh/reviewdog/reviewdog");
        assert_eq!(sanitize_redirect(Some("https://evil.example")), DEFAULT_REDIRECT);
        assert_eq!(sanitize_redirect(Some("//evil.example")), DEFAULT_REDIRECT);
        assert_eq!(sanitize_redirect(Some("/\\evil.example")), DEFAULT_REDIRECT);
        assert_eq!(sanitize_redirect(Some("/\t/evil.example")), DEFAULT_REDIRECT);
        assert_eq!(sanitize_redirect(Some("/x\ny")), DEFAULT_REDIRECT);
        assert_eq!(sanitize_redirect(Some("/gh/a b")), DEFAULT_REDIRECT);
        assert_eq!(sanitize_redirect(None), DEFAULT_REDIRECT);
    }

    #[test]
    fn test_see_other_falls_back_on_invalid_location() {
        let response = see_other("/x\ny");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), DEFAULT_REDIRECT);

        let response = see_other("/gh/reviewdog/reviewdog");
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/gh/reviewdog/reviewdog"
        );
    }

    #[test]
    fn test_login_path() {
        assert_eq!(
            login_path("/gh/reviewdog/reviewdog"),
            "/gh_/auth/login?redirect_to=/gh/reviewdog/reviewdog"
        );
        assert_eq!(login_path("/gh/a b"), "/gh_/auth/login?redirect_to=/gh/a%20b");
    }

    #[tokio::test]
    async fn test_login_redirects_to_github() {
        let app = test_app().await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri("/gh_/auth/login?redirect_to=/gh/reviewdog/reviewdog")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert!(location.starts_with("https://github.com/login/oauth/authorize?client_id=Iv1.test"));

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with(OAUTH_STATE_COOKIE));
        assert!(cookies[0].contains("HttpOnly"));
        assert!(cookies[0].contains("Max-Age=600"));
    }

    /// Logs in asking to return to `redirect_to`, then completes the callback.
    async fn login_round_trip(app: &TestApp, redirect_to: &str) -> axum::response::Response {
        let login = app
            .router()
            .oneshot(
                Request::builder()
                    .uri(format!("/gh_/auth/login?redirect_to={}", redirect_to))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let state_cookie = cookie_pair(&set_cookies(&login)[0]);
        let location = login.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        let nonce = location
            .split("state=")
            .nth(1)
            .unwrap()
            .split('&')
            .next()
            .unwrap()
            .to_string();

        app.router()
            .oneshot(
                Request::builder()
                    .uri(format!("/gh_/auth/callback?code=good&state={}", nonce))
                    .header(header::COOKIE, state_cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_login_round_trip() {
        let base = spawn_server(fake_github()).await;
        let app = test_app_with_github(&base).await;

        let callback = login_round_trip(&app, "/gh/reviewdog/reviewdog").await;

        assert_eq!(callback.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            callback.headers().get(header::LOCATION).unwrap(),
            "/gh/reviewdog/reviewdog"
        );

        let session_cookie = set_cookies(&callback)
            .into_iter()
            .find(|c| c.starts_with(&format!("{}=", SESSION_COOKIE)))
            .unwrap();
        let value = cookie_pair(&session_cookie)
            .split_once('=')
            .unwrap()
            .1
            .to_string();
        let session: Session = app.state.cookies.decode_value(&value).unwrap();
        assert_eq!(session.login, "octocat");
        assert_eq!(session.user_id, 583231);
        assert_eq!(session.access_token, "gho_user");
    }

    #[tokio::test]
    async fn test_login_with_unsafe_redirect_lands_on_default() {
        let base = spawn_server(fake_github()).await;
        let app = test_app_with_github(&base).await;

        for target in ["/x%0Ay", "/%09/evil.example", "/x%7F"] {
            let callback = login_round_trip(&app, target).await;
            assert_eq!(callback.status(), StatusCode::SEE_OTHER, "{}", target);
            assert_eq!(
                callback.headers().get(header::LOCATION).unwrap(),
                DEFAULT_REDIRECT,
                "{}",
                target
            );
        }
    }

    #[tokio::test]
    async fn test_callback_with_unusable_stored_redirect() {
        let base = spawn_server(fake_github()).await;
        let app = test_app_with_github(&base).await;

        let oauth_state = OAuthState::new("/x\ny");
        let state_cookie = app
            .state
            .cookies
            .encode(OAUTH_STATE_COOKIE, &oauth_state)
            .unwrap();

        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri(format!(
                        "/gh_/auth/callback?code=good&state={}",
                        oauth_state.nonce
                    ))
                    .header(
                        header::COOKIE,
                        format!("{}={}", state_cookie.name(), state_cookie.value()),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), DEFAULT_REDIRECT);
    }

    #[tokio::test]
    async fn test_callback_rejects_state_mismatch() {
        let app = test_app().await;
        let state_cookie = app
            .state
            .cookies
            .encode(OAUTH_STATE_COOKIE, &OAuthState::new("/gh/"))
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("{}={}", state_cookie.name(), state_cookie.value())
                .parse()
                .unwrap(),
        );

        let mut request = Request::builder()
            .uri("/gh_/auth/callback?code=good&state=forged")
            .body(Body::empty())
            .unwrap();
        *request.headers_mut() = headers;

        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_callback_without_state_cookie() {
        let app = test_app().await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri("/gh_/auth/callback?code=good&state=anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let app = test_app().await;
        let response = app
            .router()
            .oneshot(
                Request::builder()
                    .uri("/gh_/logout")
                    .header(header::COOKIE, app.session_cookie("octocat"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/");
        let cookies = set_cookies(&response);
        assert!(cookies
            .iter()
            .any(|c| c.starts_with(&format!("{}=;", SESSION_COOKIE)) && c.contains("Max-Age=0")));
    }
}
