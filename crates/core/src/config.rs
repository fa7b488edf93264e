use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Kiwoom paper-trading REST endpoint.
pub const PAPER_BASE_URL: &str = "https://mockapi.kiwoom.com";

/// Kiwoom production REST endpoint.
pub const PRODUCTION_BASE_URL: &str = "https://openapi.kiwoom.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Paper,
    Production,
}

impl ExecutionMode {
    #[must_use]
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Paper => PAPER_BASE_URL,
            Self::Production => PRODUCTION_BASE_URL,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(deserialize_with = "lenient_string")]
    pub app_key: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub app_secret: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub account_no: Option<String>,
    pub mode: ExecutionMode,
    /// Legacy switch; `true` forces production regardless of `mode`.
    pub production_mode: bool,
    pub base_url: Option<String>,
    pub http: HttpConfig,
    pub risk: RiskConfig,
    pub approval: ApprovalConfig,
}

/// Environment providers parse all-digit values as numbers; identity fields
/// such as account numbers must stay textual.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Unsigned(n) => n.to_string(),
        Raw::Signed(n) => n.to_string(),
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub requests_per_second: u32,
    pub customer_type: String,
    /// Offset of the exchange's wall clock, used for token expiry and trading dates.
    pub utc_offset_hours: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_orders_per_day: u32,
    pub max_single_quantity: u64,
    pub max_order_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub timeout_secs: u64,
    pub trading_only: bool,
    pub auto_resume: bool,
    pub history_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_key: None,
            app_secret: None,
            account_no: None,
            mode: ExecutionMode::Paper,
            production_mode: false,
            base_url: None,
            http: HttpConfig::default(),
            risk: RiskConfig::default(),
            approval: ApprovalConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_retries: 3,
            backoff_base_ms: 1000,
            requests_per_second: 5,
            customer_type: "P".to_string(),
            utc_offset_hours: 9,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_orders_per_day: 100,
            max_single_quantity: 10_000,
            max_order_amount: Decimal::from(10_000_000),
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            trading_only: true,
            auto_resume: false,
            history_limit: 1000,
        }
    }
}

impl AppConfig {
    /// Mode after applying the `production_mode` override.
    #[must_use]
    pub fn effective_mode(&self) -> ExecutionMode {
        if self.production_mode {
            ExecutionMode::Production
        } else {
            self.mode
        }
    }

    #[must_use]
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.effective_mode().base_url().to_string())
    }

    /// Environment names of required identity settings that are unset or blank.
    #[must_use]
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        for (value, name) in [
            (&self.app_key, "KIWOOM_APP_KEY"),
            (&self.app_secret, "KIWOOM_APP_SECRET"),
            (&self.account_no, "KIWOOM_ACCOUNT_NO"),
        ] {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                missing.push(name);
            }
        }
        missing
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("app_key", &self.app_key.as_ref().map(|_| "[REDACTED]"))
            .field("app_secret", &self.app_secret.as_ref().map(|_| "[REDACTED]"))
            .field("account_no", &self.account_no)
            .field("mode", &self.effective_mode())
            .field("base_url", &self.effective_base_url())
            .field("http", &self.http)
            .field("risk", &self.risk)
            .field("approval", &self.approval)
            .finish()
    }
}
