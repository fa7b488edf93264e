//! OAuth credential lifecycle for the Kiwoom REST API.
//!
//! Kiwoom issues short-lived bearer tokens in exchange for the long-lived app
//! key and secret. [`CredentialStore`] caches the current token and refreshes
//! it once it comes within five minutes of expiry.
//!
//! # Security
//!
//! - The app secret and tokens are held as [`SecretString`] and never logged
//! - The app key is zeroized on drop
//! - Tokens live in memory only
//!
//! # Concurrency
//!
//! The cached token sits behind an async mutex that stays locked for the whole
//! exchange, so callers that all find the token stale wait for a single
//! refresh and then share its result.

use crate::error::{KiwoomError, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use trade_gate_core::SharedClock;
use zeroize::Zeroize;

/// Token issue endpoint (`au10001`).
pub const TOKEN_PATH: &str = "/oauth2/token";

/// Token revoke endpoint (`au10002`).
pub const REVOKE_PATH: &str = "/oauth2/revoke";

/// A token is reused only while it has more than this left.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Validity assumed when the server omits `expires_dt`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 86_400;

const EXPIRY_FORMAT: &str = "%Y%m%d%H%M%S";

// =============================================================================
// App credentials
// =============================================================================

/// Long-lived application identity issued by Kiwoom.
#[derive(Clone)]
pub struct AppCredentials {
    app_key: String,
    app_secret: SecretString,
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_key", &"[REDACTED]")
            .field("app_secret", &"[REDACTED]")
            .finish()
    }
}

impl Drop for AppCredentials {
    fn drop(&mut self) {
        self.app_key.zeroize();
    }
}

impl AppCredentials {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: SecretString::from(app_secret.into()),
        }
    }

    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    #[must_use]
    pub fn app_secret(&self) -> &str {
        self.app_secret.expose_secret()
    }
}

// =============================================================================
// Token exchange wire types
// =============================================================================

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    secretkey: &'a str,
}

#[derive(Serialize)]
struct RevokeRequest<'a> {
    appkey: &'a str,
    secretkey: &'a str,
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    expires_dt: Option<String>,
    return_code: Option<i64>,
    return_msg: Option<String>,
}

/// Parses `expires_dt` (exchange wall-clock time) into UTC. Absent or blank
/// means the default lifetime from `now`.
///
/// # Errors
/// Returns an authentication error for malformed or ambiguous timestamps.
pub fn parse_expiry(
    raw: Option<&str>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<DateTime<Utc>> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS)),
        Some(raw) => raw,
    };

    let naive = NaiveDateTime::parse_from_str(raw, EXPIRY_FORMAT).map_err(|e| {
        KiwoomError::Authentication(format!("unparsable token expiry {raw:?}: {e}"))
    })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| KiwoomError::Authentication(format!("ambiguous token expiry {raw:?}")))
}

// =============================================================================
// CredentialStore
// =============================================================================

struct Credential {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl Credential {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

/// Owns the current access token and performs token exchanges.
pub struct CredentialStore {
    http: reqwest::Client,
    base_url: String,
    app: AppCredentials,
    clock: SharedClock,
    offset: FixedOffset,
    current: Mutex<Option<Credential>>,
    exchanges: AtomicU64,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("base_url", &self.base_url)
            .field("app", &self.app)
            .field("exchanges", &self.exchange_count())
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        app: AppCredentials,
        clock: SharedClock,
        offset: FixedOffset,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            app,
            clock,
            offset,
            current: Mutex::new(None),
            exchanges: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn app(&self) -> &AppCredentials {
        &self.app
    }

    /// Number of token exchanges performed so far.
    #[must_use]
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    /// Expiry of the cached token, if any.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.current.lock().await.as_ref().map(|c| c.expires_at)
    }

    /// Returns a token valid beyond the refresh margin, exchanging if needed.
    ///
    /// # Errors
    /// Returns an authentication error if the exchange fails.
    pub async fn token(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref() {
            if credential.is_fresh(self.clock.now()) {
                return Ok(credential.token.expose_secret().to_string());
            }
            tracing::debug!(expires_at = %credential.expires_at, "Access token near expiry");
        }

        let credential = self.exchange().await?;
        let token = credential.token.expose_secret().to_string();
        *current = Some(credential);
        Ok(token)
    }

    /// Handles a 401 seen with `rejected`: drops that token and exchanges a new
    /// one. If another caller already replaced it, the replacement is reused.
    ///
    /// # Errors
    /// Returns an authentication error if the exchange fails.
    pub async fn refresh_after_rejection(&self, rejected: &str) -> Result<String> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref() {
            let replaced = credential.token.expose_secret() != rejected;
            if replaced && credential.is_fresh(self.clock.now()) {
                return Ok(credential.token.expose_secret().to_string());
            }
        }
        *current = None;

        let credential = self.exchange().await?;
        let token = credential.token.expose_secret().to_string();
        *current = Some(credential);
        Ok(token)
    }

    /// Forgets the cached token without contacting the server.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    /// Revokes the cached token server-side (`au10002`) and forgets it.
    ///
    /// # Errors
    /// Returns an error if the revoke request fails. A store without a token
    /// returns `Value::Null` without a request.
    pub async fn revoke(&self) -> Result<Value> {
        let mut current = self.current.lock().await;
        let Some(credential) = current.take() else {
            return Ok(Value::Null);
        };

        let url = format!("{}{}", self.base_url, REVOKE_PATH);
        let body = RevokeRequest {
            appkey: self.app.app_key(),
            secretkey: self.app.app_secret(),
            token: credential.token.expose_secret(),
        };
        let response = self
            .http
            .post(&url)
            .header("api-id", "au10002")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(KiwoomError::api(status.as_u16(), text));
        }
        tracing::info!("Access token revoked");
        Ok(response.json::<Value>().await.unwrap_or(Value::Null))
    }

    async fn exchange(&self) -> Result<Credential> {
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        let body = TokenRequest {
            grant_type: "client_credentials",
            appkey: self.app.app_key(),
            secretkey: self.app.app_secret(),
        };

        tracing::debug!(%url, "Requesting access token");
        let response = self
            .http
            .post(&url)
            .header("api-id", "au10001")
            .json(&body)
            .send()
            .await
            .map_err(|e| KiwoomError::Authentication(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(KiwoomError::Authentication(format!(
                "token endpoint returned {}: {text}",
                status.as_u16()
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| KiwoomError::Authentication(format!("invalid token response: {e}")))?;

        let token = match parsed.token {
            Some(token) if !token.is_empty() => token,
            _ => {
                return Err(KiwoomError::Authentication(format!(
                    "token missing from response (return_code {:?}): {}",
                    parsed.return_code,
                    parsed.return_msg.unwrap_or_default()
                )))
            }
        };

        let now = self.clock.now();
        let expires_at = parse_expiry(parsed.expires_dt.as_deref(), now, self.offset)?;
        let credential = Credential {
            token: SecretString::from(token),
            expires_at,
        };
        if !credential.is_fresh(now) {
            return Err(KiwoomError::Authentication(format!(
                "issued token expires at {expires_at}, inside the refresh margin"
            )));
        }

        self.exchanges.fetch_add(1, Ordering::SeqCst);
        tracing::info!(%expires_at, "Access token acquired");
        Ok(credential)
    }
}
