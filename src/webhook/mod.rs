//! GitHub webhook authentication and payload types.
//!
//! GitHub signs every delivery with HMAC-SHA256 over the raw request body and
//! sends the result in the `X-Hub-Signature-256` header as `sha256=<hex>`.
//! Verification must run on the exact bytes received; payloads are only parsed
//! after the signature checks out.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Header carrying the event name (`installation`, `installation_repositories`, ...)
pub const EVENT_HEADER: &str = "X-GitHub-Event";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies webhook deliveries against the shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Returns true only if `signature_header` is the HMAC of `raw_body`.
    pub fn verify(&self, raw_body: &[u8], signature_header: &str) -> bool {
        if self.secret.is_empty() {
            return false;
        }

        let signature = match signature_header.trim().strip_prefix(SIGNATURE_PREFIX) {
            Some(sig) => sig,
            None => return false,
        };

        let expected = match hex::decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(raw_body);

        // Constant-time comparison
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookVerifier([redacted])")
    }
}

/// Compute the `sha256=<hex>` signature GitHub would send for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
    #[serde(default)]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationPayload {
    pub id: i64,
    #[serde(default)]
    pub account: Option<Account>,
    #[serde(default)]
    pub repository_selection: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryRef {
    #[serde(default)]
    pub id: Option<i64>,
    pub full_name: String,
}

/// `installation` event
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationEvent {
    pub action: String,
    pub installation: InstallationPayload,
    #[serde(default)]
    pub repositories: Vec<RepositoryRef>,
}

/// `installation_repositories` event
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationRepositoriesEvent {
    pub action: String,
    pub installation: InstallationPayload,
    #[serde(default)]
    pub repository_selection: Option<String>,
    #[serde(default)]
    pub repositories_added: Vec<RepositoryRef>,
    #[serde(default)]
    pub repositories_removed: Vec<RepositoryRef>,
}

/// A verified delivery the gateway knows how to act on.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Installation(InstallationEvent),
    InstallationRepositories(InstallationRepositoriesEvent),
    Ping,
    /// Any other event; acknowledged and ignored
    Other(String),
}

impl WebhookEvent {
    /// Parse a verified body. `event_name` comes from `X-GitHub-Event`; when it
    /// is absent, a body carrying an `installation` object is treated as an
    /// `installation` event.
    pub fn parse(event_name: Option<&str>, raw_body: &[u8]) -> Result<Self, serde_json::Error> {
        match event_name {
            Some("installation") | None => {
                serde_json::from_slice(raw_body).map(WebhookEvent::Installation)
            }
            Some("installation_repositories") => {
                serde_json::from_slice(raw_body).map(WebhookEvent::InstallationRepositories)
            }
            Some("ping") => Ok(WebhookEvent::Ping),
            Some(other) => Ok(WebhookEvent::Other(other.to_string())),
        }
    }
}
