//! OAuth2 credential loading and token lifecycle for the mail provider.
//!
//! Two JSON files persist between runs: the OAuth client downloaded from the
//! provider console and the access/refresh token pair produced by the
//! authorize flow. Both are loaded once at startup; refreshed tokens are
//! written back immediately so rotated refresh tokens survive a crash.

use std::path::{Path, PathBuf};

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::GmailConfig;
use crate::error::{AuthError, ConfigError};

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Scopes required for searching, reading, and relabeling mail.
pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.modify",
];

/// Refresh this long before the recorded expiry to absorb clock skew.
const EXPIRY_SKEW_MS: i64 = 60_000;

const CREDENTIALS_HINT: &str = "Create an OAuth client ID (Desktop app) in the provider console, \
     enable the Gmail API, download the client JSON, and save it at this path.";
const TOKEN_HINT: &str = "Run `inbox-probe authorize` to complete the consent flow and write this file.";

// ── File formats ────────────────────────────────────────────────────

/// `credentials.json` wraps the client under an `installed` or `web` key,
/// depending on the client type chosen in the console.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    installed: Option<OAuthClient>,
    #[serde(default)]
    web: Option<OAuthClient>,
}

/// The OAuth client identity. The secret never leaves this process except
/// in token-endpoint form bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: SecretString,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// `token.json`: the persisted token pair. `expiry_date` is epoch
/// milliseconds, matching what provider tooling writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default)]
    pub expiry_date: i64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl StoredToken {
    /// Whether the access token is still usable at `now_ms`, with skew.
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        self.expiry_date - EXPIRY_SKEW_MS > now_ms
    }
}

/// Token endpoint response for both code exchange and refresh.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

// ── Authenticator ───────────────────────────────────────────────────

/// Holds the OAuth client and the current token pair; hands out fresh
/// access tokens, refreshing and persisting behind a write lock so
/// concurrent retrievals share one refresh.
#[derive(Debug)]
pub struct Authenticator {
    http: reqwest::Client,
    client: OAuthClient,
    token_path: PathBuf,
    auth_endpoint: String,
    token_endpoint: String,
    token: RwLock<Option<StoredToken>>,
}

impl Authenticator {
    pub fn new(client: OAuthClient, token: Option<StoredToken>, token_path: PathBuf) -> Self {
        Self {
            http: reqwest::Client::new(),
            client,
            token_path,
            auth_endpoint: AUTH_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            token: RwLock::new(token),
        }
    }

    /// Load both persisted files. This is the production constructor; it
    /// fails fast with an actionable hint when either file is absent.
    pub fn load(config: &GmailConfig) -> Result<Self, ConfigError> {
        let client = load_credentials(&config.credentials_path)?;
        let token = load_token(&config.token_path)?;
        Ok(Self::new(client, Some(token), config.token_path.clone()))
    }

    /// Load credentials only. The authorize flow starts here, since it
    /// exists to create the token file in the first place.
    pub fn without_token(config: &GmailConfig) -> Result<Self, ConfigError> {
        let client = load_credentials(&config.credentials_path)?;
        Ok(Self::new(client, None, config.token_path.clone()))
    }

    /// Override the provider endpoints (tests point these at a local mock).
    pub fn with_endpoints(
        mut self,
        auth_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        self.auth_endpoint = auth_endpoint.into();
        self.token_endpoint = token_endpoint.into();
        self
    }

    /// A currently valid access token, refreshing through the token
    /// endpoint when the stored one is stale.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref()
                && token.is_fresh(Utc::now().timestamp_millis())
            {
                return Ok(token.access_token.clone());
            }
        }

        let mut guard = self.token.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = guard.as_ref()
            && token.is_fresh(Utc::now().timestamp_millis())
        {
            return Ok(token.access_token.clone());
        }

        let previous = guard.as_ref().cloned().ok_or_else(|| AuthError::RefreshRejected {
            reason: "no stored token; run the authorize flow first".to_string(),
        })?;

        let refreshed = self.refresh(&previous).await?;
        self.persist(&refreshed)?;
        let access = refreshed.access_token.clone();
        *guard = Some(refreshed);
        tracing::debug!("access token refreshed");
        Ok(access)
    }

    async fn refresh(&self, previous: &StoredToken) -> Result<StoredToken, AuthError> {
        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", previous.refresh_token.as_str()),
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Endpoint(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::Endpoint(format!("unreadable token response: {e}")))?;

        if !status.is_success() {
            let reason = provider_error(&body);
            return Err(AuthError::RefreshRejected {
                reason: format!("{status}: {reason}"),
            });
        }

        let parsed: TokenResponse = serde_json::from_value(body)
            .map_err(|e| AuthError::Endpoint(format!("malformed token response: {e}")))?;

        Ok(StoredToken {
            access_token: parsed.access_token,
            // Rotated refresh tokens replace the old one; otherwise keep it.
            refresh_token: parsed
                .refresh_token
                .unwrap_or_else(|| previous.refresh_token.clone()),
            token_type: parsed.token_type.unwrap_or_else(default_token_type),
            scope: parsed.scope.or_else(|| previous.scope.clone()),
            expiry_date: Utc::now().timestamp_millis() + parsed.expires_in.unwrap_or(3600) * 1000,
        })
    }

    /// Build the consent URL the operator opens in a browser.
    pub fn authorize_url(&self) -> Result<String, AuthError> {
        let redirect = self
            .client
            .redirect_uris
            .first()
            .ok_or(AuthError::MissingRedirectUri)?;

        let mut url = url::Url::parse(&self.auth_endpoint)
            .map_err(|e| AuthError::Endpoint(format!("invalid auth endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client.client_id)
            .append_pair("redirect_uri", redirect)
            .append_pair("response_type", "code")
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("access_type", "offline");
        Ok(url.to_string())
    }

    /// Exchange a pasted consent code for the initial token pair and
    /// persist it.
    pub async fn exchange_code(&self, code: &str) -> Result<StoredToken, AuthError> {
        let redirect = self
            .client
            .redirect_uris
            .first()
            .ok_or(AuthError::MissingRedirectUri)?;

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.trim()),
                ("redirect_uri", redirect.as_str()),
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Endpoint(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::Endpoint(format!("unreadable token response: {e}")))?;

        if !status.is_success() {
            let reason = provider_error(&body);
            return Err(AuthError::ExchangeFailed {
                reason: format!("{status}: {reason}"),
            });
        }

        let parsed: TokenResponse = serde_json::from_value(body)
            .map_err(|e| AuthError::Endpoint(format!("malformed token response: {e}")))?;

        let refresh_token = parsed.refresh_token.ok_or_else(|| AuthError::ExchangeFailed {
            reason: "response carried no refresh_token; revoke the app's access and authorize again"
                .to_string(),
        })?;

        let token = StoredToken {
            access_token: parsed.access_token,
            refresh_token,
            token_type: parsed.token_type.unwrap_or_else(default_token_type),
            scope: parsed.scope,
            expiry_date: Utc::now().timestamp_millis() + parsed.expires_in.unwrap_or(3600) * 1000,
        };

        self.persist(&token)?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    fn persist(&self, token: &StoredToken) -> Result<(), AuthError> {
        write_token_file(&self.token_path, token).map_err(|e| AuthError::PersistFailed {
            path: self.token_path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

fn provider_error(body: &serde_json::Value) -> &str {
    body.get("error_description")
        .or_else(|| body.get("error"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown error")
}

// ── File IO ─────────────────────────────────────────────────────────

fn load_credentials(path: &Path) -> Result<OAuthClient, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::MissingFile {
                path: path.display().to_string(),
                hint: CREDENTIALS_HINT.to_string(),
            });
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    let file: CredentialsFile =
        serde_json::from_str(&raw).map_err(|e| ConfigError::Malformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    file.installed
        .or(file.web)
        .ok_or_else(|| ConfigError::Malformed {
            path: path.display().to_string(),
            reason: "expected an \"installed\" or \"web\" client section".to_string(),
        })
}

fn load_token(path: &Path) -> Result<StoredToken, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::MissingFile {
                path: path.display().to_string(),
                hint: TOKEN_HINT.to_string(),
            });
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    serde_json::from_str(&raw).map_err(|e| ConfigError::Malformed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Write the token file atomically: temp file in the same directory, 0600
/// on Unix, then rename over the destination.
fn write_token_file(path: &Path, token: &StoredToken) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(token).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
