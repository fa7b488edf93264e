//! CLI commands for the trading gateway.

pub mod account;
pub mod call;
pub mod order;

pub use account::{CheckRiskArgs, TokenArgs};
pub use call::CallArgs;
pub use order::{CancelArgs, ModifyArgs, OrderArgs};

use anyhow::{anyhow, ensure, Context as _, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use trade_gate_approval::{ApprovalManager, ApprovalSettings};
use trade_gate_core::{offset_hours, ConfigLoader, ExecutionMode, StandardResponse, SystemClock};
use trade_gate_kiwoom::{
    AppCredentials, KiwoomClient, KiwoomClientConfig, OperationRegistry, OrderExecutor, Params,
    RiskGate, RiskLimits,
};

/// Everything a command needs: the raw client and the gated order flow.
pub struct Gateway {
    pub client: Arc<KiwoomClient>,
    pub executor: OrderExecutor,
}

impl Gateway {
    /// Loads configuration and wires the client, risk gate and approvals.
    pub fn connect(config_path: &Path, operations: Option<&Path>) -> Result<Self> {
        let config = ConfigLoader::load_from(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        if config.effective_mode() == ExecutionMode::Production {
            tracing::warn!("PRODUCTION mode: orders will reach the live market");
        }

        let registry = match operations {
            Some(path) => OperationRegistry::builtin_with_file(path)?,
            None => OperationRegistry::builtin(),
        };
        let app = AppCredentials::new(
            config.app_key.clone().ok_or_else(|| anyhow!("app_key is not set"))?,
            config.app_secret.clone().ok_or_else(|| anyhow!("app_secret is not set"))?,
        );

        let clock = SystemClock::shared();
        let client = Arc::new(KiwoomClient::new(
            KiwoomClientConfig::from_app_config(&config),
            app,
            Arc::new(registry),
            clock.clone(),
        )?);
        let risk = RiskGate::new(
            RiskLimits::from(&config.risk),
            clock.clone(),
            offset_hours(config.http.utc_offset_hours),
        );
        let approvals = ApprovalManager::new(ApprovalSettings::from(&config.approval), clock.clone());

        let mut executor =
            OrderExecutor::new(client.clone(), Arc::new(risk), Arc::new(approvals), clock);
        if let Some(account) = &config.account_no {
            executor = executor.with_account(account.clone());
        }

        tracing::debug!(?client, "Gateway ready");
        Ok(Self { client, executor })
    }
}

/// Prints an envelope as JSON; a failed envelope becomes the process error.
pub fn emit(envelope: &StandardResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    ensure!(
        envelope.success,
        "{}",
        envelope.error.as_deref().unwrap_or("operation failed")
    );
    Ok(())
}

/// Parses `key=value` (string) and `key:=json` (raw JSON) pairs.
pub fn parse_params(pairs: &[String]) -> Result<Params> {
    let mut params = Params::new();
    for pair in pairs {
        if let Some((key, raw)) = pair.split_once(":=") {
            let value: Value = serde_json::from_str(raw)
                .with_context(|| format!("invalid JSON value for {key}"))?;
            params.insert(key.trim().to_string(), value);
        } else if let Some((key, value)) = pair.split_once('=') {
            params.insert(key.trim().to_string(), Value::String(value.to_string()));
        } else {
            return Err(anyhow!("expected key=value or key:=json, got {pair:?}"));
        }
    }
    Ok(params)
}

/// Parses `name: value` or `name=value` header pairs.
pub fn parse_headers(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once(':')
                .or_else(|| pair.split_once('='))
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .ok_or_else(|| anyhow!("expected name:value, got {pair:?}"))
        })
        .collect()
}
