//! Sealed session cookies.
//!
//! The server keeps no session table: the cookie value *is* the session. Values
//! are serialized to JSON, sealed with the [`CipherBox`], and base64url-encoded
//! so they survive as a cookie value.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::crypto::CipherBox;

/// Cookie carrying the logged-in user's session
pub const SESSION_COOKIE: &str = "doghouse_session";

/// Cookie carrying the OAuth CSRF state during the login round trip
pub const OAUTH_STATE_COOKIE: &str = "doghouse_oauth_state";

/// Current session layout version. Bump when [`Session`] changes shape.
pub const SESSION_VERSION: u32 = 1;

/// Default cookie lifetime: 30 days
pub const DEFAULT_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("session cookie is missing")]
    Missing,

    /// Malformed encoding, failed authentication and bad JSON all land here.
    #[error("session cookie is invalid")]
    Invalid,

    #[error("failed to seal session")]
    Seal,
}

/// Attributes applied to every cookie the manager issues.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub max_age_secs: i64,
    pub path: String,
    pub same_site: SameSite,
}

impl CookieOptions {
    /// Production defaults. `dev_mode` drops the Secure flag so cookies work
    /// over plain http on localhost.
    pub fn new(dev_mode: bool, max_age_secs: i64) -> Self {
        Self {
            http_only: true,
            secure: !dev_mode,
            max_age_secs,
            path: "/".to_string(),
            same_site: SameSite::Lax,
        }
    }
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self::new(false, DEFAULT_MAX_AGE_SECS)
    }
}

/// Encodes typed values into sealed cookies and back.
#[derive(Debug, Clone)]
pub struct CookieManager {
    cipher: Arc<CipherBox>,
    options: CookieOptions,
}

impl CookieManager {
    pub fn new(cipher: Arc<CipherBox>, options: CookieOptions) -> Self {
        Self { cipher, options }
    }

    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    /// Seal `value` into a cookie named `name` using the configured attributes.
    pub fn encode<T: Serialize>(&self, name: &str, value: &T) -> Result<Cookie<'static>, SessionError> {
        self.encode_with_max_age(name, value, self.options.max_age_secs)
    }

    /// Same as [`CookieManager::encode`] with an explicit lifetime.
    pub fn encode_with_max_age<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        max_age_secs: i64,
    ) -> Result<Cookie<'static>, SessionError> {
        let json = serde_json::to_vec(value).map_err(|_| SessionError::Seal)?;
        let sealed = self.cipher.seal(&json).map_err(|_| SessionError::Seal)?;

        Ok(Cookie::build((name.to_string(), BASE64.encode(sealed)))
            .http_only(self.options.http_only)
            .secure(self.options.secure)
            .max_age(time::Duration::seconds(max_age_secs))
            .path(self.options.path.clone())
            .same_site(self.options.same_site)
            .build())
    }

    /// Open the cookie named `name` from the request jar.
    pub fn decode<T: DeserializeOwned>(&self, jar: &CookieJar, name: &str) -> Result<T, SessionError> {
        let cookie = jar.get(name).ok_or(SessionError::Missing)?;
        self.decode_value(cookie.value())
    }

    /// Open a raw cookie value.
    pub fn decode_value<T: DeserializeOwned>(&self, value: &str) -> Result<T, SessionError> {
        if value.is_empty() {
            return Err(SessionError::Missing);
        }
        let sealed = BASE64.decode(value).map_err(|_| SessionError::Invalid)?;
        let json = self.cipher.open(&sealed).map_err(|_| SessionError::Invalid)?;
        serde_json::from_slice(&json).map_err(|_| SessionError::Invalid)
    }

    /// Expired, empty cookie that makes the browser drop `name`.
    pub fn clear(&self, name: &str) -> Cookie<'static> {
        Cookie::build((name.to_string(), ""))
            .http_only(self.options.http_only)
            .secure(self.options.secure)
            .max_age(time::Duration::ZERO)
            .path(self.options.path.clone())
            .build()
    }

    /// Decode the logged-in user's session, rejecting unknown layout versions.
    pub fn session(&self, jar: &CookieJar) -> Result<Session, SessionError> {
        let session: Session = self.decode(jar, SESSION_COOKIE)?;
        if !session.is_current() {
            return Err(SessionError::Invalid);
        }
        Ok(session)
    }
}

/// A logged-in GitHub user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub version: u32,
    pub user_id: i64,
    pub login: String,
    /// OAuth user access token
    pub access_token: String,
    pub issued_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: i64, login: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            version: SESSION_VERSION,
            user_id,
            login: login.into(),
            access_token: access_token.into(),
            issued_at: Utc::now(),
        }
    }

    pub fn is_current(&self) -> bool {
        self.version == SESSION_VERSION
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("version", &self.version)
            .field("user_id", &self.user_id)
            .field("login", &self.login)
            .field("access_token", &"[redacted]")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// CSRF state carried across the GitHub authorize redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    pub nonce: String,
    /// Local path to return to after login
    pub redirect_to: String,
}

impl OAuthState {
    pub fn new(redirect_to: impl Into<String>) -> Self {
        use rand::Rng;

        let bytes: [u8; 16] = rand::rng().random();
        Self {
            nonce: hex::encode(bytes),
            redirect_to: redirect_to.into(),
        }
    }
}
