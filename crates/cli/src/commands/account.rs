//! Read-only views: risk preview, limits, summary, catalog, token.

use super::{emit, Gateway};
use anyhow::Result;
use clap::Args;
use rust_decimal::Decimal;
use serde_json::json;
use trade_gate_core::StandardResponse;
use trade_gate_kiwoom::{OrderKind, OrderRequest, Side, SERVICE_NAME};

/// Arguments for check-risk.
#[derive(Args, Debug)]
pub struct CheckRiskArgs {
    /// buy or sell.
    pub side: Side,

    pub instrument: String,

    pub quantity: u64,

    /// Price in KRW; required for the amount check on limit orders.
    #[arg(long)]
    pub price: Option<Decimal>,

    #[arg(long)]
    pub market: bool,
}

/// Arguments for token.
#[derive(Args, Debug)]
pub struct TokenArgs {
    /// Revoke the current token instead of acquiring one.
    #[arg(long)]
    pub revoke: bool,

    /// Print the full token rather than a masked prefix.
    #[arg(long)]
    pub show: bool,
}

pub fn run_check_risk(gateway: &Gateway, args: CheckRiskArgs) -> Result<()> {
    let order = OrderRequest {
        instrument_id: args.instrument,
        side: args.side,
        quantity: args.quantity,
        price: args.price,
        kind: if args.market {
            OrderKind::Market
        } else {
            OrderKind::Limit
        },
        account_id: None,
    };
    emit(&gateway.executor.check_risk_envelope(&order))
}

pub fn run_limits(gateway: &Gateway) -> Result<()> {
    emit(&gateway.executor.trading_limits_envelope())
}

pub async fn run_summary(gateway: &Gateway) -> Result<()> {
    emit(&gateway.executor.trading_summary_envelope().await)
}

pub fn run_operations(gateway: &Gateway) -> Result<()> {
    let rows: Vec<_> = gateway
        .client
        .registry()
        .descriptors()
        .into_iter()
        .map(|d| {
            json!({
                "id": d.id,
                "name": d.name,
                "method": d.method,
                "path": d.path,
                "required": d.required_params,
            })
        })
        .collect();
    emit(&StandardResponse::ok(
        SERVICE_NAME,
        "Operation catalog",
        json!(rows),
    ))
}

pub async fn run_token(gateway: &Gateway, args: TokenArgs) -> Result<()> {
    let client = &gateway.client;
    if args.revoke {
        let envelope = match client.revoke_issued_token().await {
            Ok(body) => StandardResponse::ok(SERVICE_NAME, "Revoke token", body),
            Err(e) => StandardResponse::failure(SERVICE_NAME, "Revoke token", e),
        };
        return emit(&envelope);
    }

    let envelope = match client.access_token().await {
        Ok(token) => {
            let expires_at = client.credentials().expires_at().await;
            let token = if args.show { token } else { mask(&token) };
            StandardResponse::ok(
                SERVICE_NAME,
                "Access token",
                json!({ "token": token, "expires_at": expires_at }),
            )
        }
        Err(e) => StandardResponse::failure(SERVICE_NAME, "Access token", e),
    };
    emit(&envelope)
}

fn mask(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}***")
}
