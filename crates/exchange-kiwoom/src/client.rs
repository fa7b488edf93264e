//! Kiwoom REST API client with authentication, rate limiting and retry.
//!
//! Every remote capability goes through [`KiwoomClient::call`]: the operation
//! id is resolved against the catalog, parameters are validated before any I/O,
//! and the request is retried with exponential backoff on transient failures.
//!
//! # Example
//!
//! ```ignore
//! use trade_gate_kiwoom::{KiwoomClient, ids};
//! use trade_gate_core::{ConfigLoader, SystemClock};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let client = KiwoomClient::from_app_config(&config, SystemClock::shared())?;
//!
//!     let mut params = serde_json::Map::new();
//!     params.insert("stk_cd".into(), "005930".into());
//!     let info = client.call(ids::STOCK_INFO, params).await?;
//!     println!("{info}");
//!
//!     Ok(())
//! }
//! ```

use crate::auth::{AppCredentials, CredentialStore};
use crate::error::{KiwoomError, Result};
use crate::operations::{OperationDescriptor, OperationRegistry, Params};
use async_trait::async_trait;
use chrono::FixedOffset;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use trade_gate_core::{offset_hours, AppConfig, ExecutionMode, SharedClock};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Kiwoom client.
#[derive(Debug, Clone)]
pub struct KiwoomClientConfig {
    /// Base URL for the API.
    pub base_url: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Attempts per call, counting the first.
    pub max_retries: u32,

    /// Backoff after the first failed attempt; doubles after each subsequent one.
    pub backoff_base: Duration,

    /// Requests per second limit.
    pub requests_per_second: NonZeroU32,

    /// `custtype` header value.
    pub customer_type: String,

    /// Exchange wall-clock offset, used to read token expiry.
    pub utc_offset: FixedOffset,
}

impl Default for KiwoomClientConfig {
    fn default() -> Self {
        Self {
            base_url: ExecutionMode::Paper.base_url().to_string(),
            timeout_secs: 60,
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            requests_per_second: nonzero!(5u32),
            customer_type: "P".to_string(),
            utc_offset: offset_hours(9),
        }
    }
}

impl KiwoomClientConfig {
    /// Creates a configuration for the paper-trading server.
    #[must_use]
    pub fn paper() -> Self {
        Self::default()
    }

    /// Creates a configuration for the production server.
    #[must_use]
    pub fn production() -> Self {
        Self {
            base_url: ExecutionMode::Production.base_url().to_string(),
            ..Default::default()
        }
    }

    /// Derives client settings from the loaded application config.
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        let http = &config.http;
        Self {
            base_url: config.effective_base_url().trim_end_matches('/').to_string(),
            timeout_secs: http.timeout_secs,
            max_retries: http.max_retries.max(1),
            backoff_base: Duration::from_millis(http.backoff_base_ms),
            requests_per_second: NonZeroU32::new(http.requests_per_second)
                .unwrap_or(nonzero!(5u32)),
            customer_type: http.customer_type.clone(),
            utc_offset: offset_hours(http.utc_offset_hours),
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the maximum number of attempts (minimum 1).
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Sets the backoff base.
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_second: NonZeroU32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    /// Sets the `custtype` header.
    #[must_use]
    pub fn with_customer_type(mut self, customer_type: impl Into<String>) -> Self {
        self.customer_type = customer_type.into();
        self
    }

    /// Sets the exchange offset.
    #[must_use]
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }
}

// =============================================================================
// Dispatch seam
// =============================================================================

/// Anything that can execute a catalog operation.
///
/// The order flow depends on this rather than on [`KiwoomClient`] directly.
#[async_trait]
pub trait OperationDispatcher: Send + Sync {
    /// Executes `operation_id` with `params` and returns the decoded body.
    async fn dispatch(&self, operation_id: &str, params: Params) -> Result<Value>;
}

// =============================================================================
// KiwoomClient
// =============================================================================

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Kiwoom REST API client.
pub struct KiwoomClient {
    config: KiwoomClientConfig,
    http: Client,
    rate_limiter: Arc<DirectLimiter>,
    registry: Arc<OperationRegistry>,
    credentials: CredentialStore,
}

impl std::fmt::Debug for KiwoomClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiwoomClient")
            .field("base_url", &self.config.base_url)
            .field("max_retries", &self.config.max_retries)
            .field("requests_per_second", &self.config.requests_per_second)
            .field("operations", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl KiwoomClient {
    /// Creates a new client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        config: KiwoomClientConfig,
        app: AppCredentials,
        registry: Arc<OperationRegistry>,
        clock: SharedClock,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KiwoomError::Network(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_second(config.requests_per_second);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        let credentials = CredentialStore::new(
            http.clone(),
            config.base_url.clone(),
            app,
            clock,
            config.utc_offset,
        );

        Ok(Self {
            config,
            http,
            rate_limiter,
            registry,
            credentials,
        })
    }

    /// Creates a client with the built-in catalog from the application config.
    ///
    /// # Errors
    /// Returns a configuration error if app key or secret is missing.
    pub fn from_app_config(config: &AppConfig, clock: SharedClock) -> Result<Self> {
        let (Some(key), Some(secret)) = (config.app_key.as_deref(), config.app_secret.as_deref())
        else {
            return Err(KiwoomError::Configuration(format!(
                "missing credentials: {}",
                config.missing_credentials().join(", ")
            )));
        };

        Self::new(
            KiwoomClientConfig::from_app_config(config),
            AppCredentials::new(key, secret),
            Arc::new(OperationRegistry::builtin()),
            clock,
        )
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    #[must_use]
    pub fn config(&self) -> &KiwoomClientConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Returns a valid access token, exchanging one if needed.
    ///
    /// # Errors
    /// Returns an authentication error if the exchange fails.
    pub async fn access_token(&self) -> Result<String> {
        self.credentials.token().await
    }

    /// Revokes the current token server-side.
    ///
    /// # Errors
    /// Returns error if the revoke request fails.
    pub async fn revoke_token(&self) -> Result<Value> {
        self.credentials.revoke().await
    }

    /// Acquires the app's current token and revokes it.
    ///
    /// A fresh process holds no token, so this exchanges first; Kiwoom hands
    /// back the token already issued to the app key, which is then revoked.
    ///
    /// # Errors
    /// Returns an authentication error if the exchange fails, or the revoke error.
    pub async fn revoke_issued_token(&self) -> Result<Value> {
        self.credentials.token().await?;
        self.credentials.revoke().await
    }

    /// Delay slept after `attempt` (1-based) fails.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.config.backoff_base.saturating_mul(factor)
    }

    /// Calls a catalog operation.
    ///
    /// # Errors
    /// - `UnknownOperation` / `InvalidParams` before any request is sent
    /// - `Authentication` if a token cannot be obtained or keeps being rejected
    /// - `RequestFailed` once retries are exhausted or on a non-retryable failure
    pub async fn call(&self, operation_id: &str, params: Params) -> Result<Value> {
        self.call_with_headers(operation_id, params, &[]).await
    }

    /// Like [`call`](Self::call) with extra headers applied after the standard ones.
    ///
    /// # Errors
    /// See [`call`](Self::call). Malformed headers are a configuration error.
    pub async fn call_with_headers(
        &self,
        operation_id: &str,
        params: Params,
        extra_headers: &[(String, String)],
    ) -> Result<Value> {
        let descriptor = self
            .registry
            .get(operation_id)
            .ok_or_else(|| KiwoomError::unknown_operation(operation_id))?;
        let params = descriptor.prepare(params)?;
        let extra = parse_headers(extra_headers)?;
        let url = format!("{}{}", self.config.base_url, descriptor.path);

        let mut token = self.credentials.token().await?;
        let mut refreshed = false;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match self.send(descriptor, &url, &params, &token, &extra).await {
                Ok(body) => {
                    tracing::debug!(operation_id, attempts, "Request succeeded");
                    return Ok(body);
                }
                Err(e) => e,
            };

            if error.is_auth_failure() {
                if refreshed {
                    tracing::warn!(operation_id, "Credential rejected after refresh");
                    return Err(KiwoomError::Authentication(format!(
                        "{operation_id} rejected the refreshed token: {error}"
                    )));
                }
                tracing::info!(operation_id, "Token rejected, refreshing");
                refreshed = true;
                attempts -= 1;
                token = self.credentials.refresh_after_rejection(&token).await?;
                continue;
            }

            if error.is_transient() && attempts < self.config.max_retries {
                let delay = self.backoff_delay(attempts);
                tracing::warn!(
                    operation_id,
                    attempt = attempts,
                    max_retries = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            tracing::error!(operation_id, attempts, error = %error, "Request failed");
            return Err(KiwoomError::RequestFailed {
                operation_id: operation_id.to_string(),
                endpoint: url,
                last_error: error.to_string(),
                attempts,
            });
        }
    }

    /// One HTTP round-trip.
    async fn send(
        &self,
        descriptor: &OperationDescriptor,
        url: &str,
        params: &Params,
        token: &str,
        extra: &HeaderMap,
    ) -> Result<Value> {
        self.rate_limiter.until_ready().await;

        let mut headers = self.standard_headers(&descriptor.id, token)?;
        for (name, value) in extra {
            headers.insert(name.clone(), value.clone());
        }

        let mut request = self
            .http
            .request(descriptor.method.as_reqwest(), url)
            .headers(headers);
        if descriptor.method.sends_body() {
            request = request.body(serde_json::to_vec(params)?);
        } else {
            request = request.query(&query_pairs(params));
        }

        tracing::debug!(operation_id = %descriptor.id, method = ?descriptor.method, %url, "Sending request");
        let response = request.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(KiwoomError::api(status.as_u16(), text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn standard_headers(&self, operation_id: &str, token: &str) -> Result<HeaderMap> {
        let app = self.credentials.app();
        let mut headers = HeaderMap::new();
        headers.insert("api-id", header_value(operation_id)?);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
        headers.insert("appkey", header_value(app.app_key())?);
        headers.insert("appsecret", header_value(app.app_secret())?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert("custtype", header_value(&self.config.customer_type)?);
        Ok(headers)
    }
}

#[async_trait]
impl OperationDispatcher for KiwoomClient {
    async fn dispatch(&self, operation_id: &str, params: Params) -> Result<Value> {
        self.call(operation_id, params).await
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| KiwoomError::Configuration("header value contains invalid characters".into()))
}

fn parse_headers(pairs: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| KiwoomError::Configuration(format!("invalid header name {name:?}: {e}")))?;
        headers.insert(name, header_value(value)?);
    }
    Ok(headers)
}

/// Query-string form of params: strings verbatim, other values as JSON text,
/// nulls dropped.
fn query_pairs(params: &Params) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}
