//! Order commands: buy/sell with an interactive approval prompt, modify, cancel.

use super::{emit, parse_params, Gateway};
use anyhow::{bail, Result};
use clap::Args;
use rust_decimal::Decimal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use trade_gate_approval::Context;
use trade_gate_core::StandardResponse;
use trade_gate_kiwoom::{
    CancelRequest, ModifyRequest, OrderKind, OrderOutcome, OrderRequest, Side, SERVICE_NAME,
};

/// Arguments for buy and sell.
#[derive(Args, Debug)]
pub struct OrderArgs {
    /// Six-digit instrument code (e.g., 005930).
    pub instrument: String,

    /// Number of shares.
    pub quantity: u64,

    /// Limit price in KRW (indicative for market orders).
    #[arg(long)]
    pub price: Option<Decimal>,

    /// Send as a market order.
    #[arg(long)]
    pub market: bool,

    /// Account number; defaults to the configured account.
    #[arg(long)]
    pub account: Option<String>,

    /// Hold every order for operator approval.
    #[arg(long)]
    pub require_approval: bool,

    /// Hold only orders whose notional is at least this amount.
    #[arg(long, value_name = "KRW")]
    pub approval_threshold: Option<Decimal>,

    /// Conversation/thread id recorded on the approval.
    #[arg(long, default_value = "cli")]
    pub thread: String,
}

impl OrderArgs {
    fn to_order(&self, side: Side) -> OrderRequest {
        let mut order = if self.market {
            OrderRequest::market(&self.instrument, side, self.quantity)
        } else {
            OrderRequest {
                instrument_id: self.instrument.clone(),
                side,
                quantity: self.quantity,
                price: None,
                kind: OrderKind::Limit,
                account_id: None,
            }
        };
        if let Some(price) = self.price {
            order = order.with_price(price);
        }
        if let Some(account) = &self.account {
            order = order.with_account(account);
        }
        order
    }
}

/// Arguments for modify.
#[derive(Args, Debug)]
pub struct ModifyArgs {
    /// Original order number.
    pub order_no: String,

    pub instrument: String,

    /// New quantity.
    pub quantity: u64,

    /// New price; omitted means "0" (market).
    #[arg(long)]
    pub price: Option<Decimal>,
}

/// Arguments for cancel.
#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Original order number.
    pub order_no: String,

    pub instrument: String,

    /// Shares to cancel; must be positive.
    pub quantity: u64,
}

impl CancelArgs {
    pub fn to_request(self) -> CancelRequest {
        CancelRequest {
            order_no: self.order_no,
            instrument_id: self.instrument,
            quantity: self.quantity,
        }
    }
}

/// Operator answer to a held order.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approve(Option<Context>),
    Reject(String),
}

/// Parses a prompt answer.
///
/// `y` approves as-is, `n [reason]` rejects, `m key=value ...` approves with
/// changed terms. Empty input rejects.
pub fn parse_decision(line: &str) -> Result<Decision> {
    let line = line.trim();
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(w, r)| (w, r.trim()));

    match word.to_ascii_lowercase().as_str() {
        "y" | "yes" | "approve" => Ok(Decision::Approve(None)),
        "" => Ok(Decision::Reject("no response".to_string())),
        "n" | "no" | "reject" => {
            let reason = if rest.is_empty() { "rejected by operator" } else { rest };
            Ok(Decision::Reject(reason.to_string()))
        }
        "m" | "modify" => {
            let pairs: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
            if pairs.is_empty() {
                bail!("modify needs at least one key=value (e.g. m quantity=5)");
            }
            Ok(Decision::Approve(Some(parse_params(&pairs)?)))
        }
        other => bail!("unrecognized answer {other:?}"),
    }
}

async fn prompt_decision(summary: &str) -> Result<Decision> {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut stderr = tokio::io::stderr();

    loop {
        stderr
            .write_all(
                format!("{summary}\napprove? [y]es / [n]o [reason] / [m]odify key=value ...: ")
                    .as_bytes(),
            )
            .await?;
        stderr.flush().await?;

        let mut line = String::new();
        if stdin.read_line(&mut line).await? == 0 {
            return Ok(Decision::Reject("input closed".to_string()));
        }
        match parse_decision(&line) {
            Ok(decision) => return Ok(decision),
            Err(e) => stderr.write_all(format!("{e}\n").as_bytes()).await?,
        }
    }
}

pub async fn run(gateway: &Gateway, side: Side, args: OrderArgs) -> Result<()> {
    let executor = &gateway.executor;
    if args.require_approval || args.approval_threshold.is_some() {
        executor.require_approval(args.approval_threshold);
    }

    let order = args.to_order(side);
    let query = order.query_label();
    let outcome = match executor.submit(&order, &args.thread).await {
        Ok(outcome) => outcome,
        Err(e) => return emit(&StandardResponse::failure(SERVICE_NAME, query, e)),
    };

    let (approval_id, reason) = match &outcome {
        OrderOutcome::Suspended { approval_id, reason } => (*approval_id, reason.clone()),
        OrderOutcome::Executed { .. } => {
            return emit(&StandardResponse::ok(SERVICE_NAME, query, outcome.to_value()));
        }
    };

    let held = StandardResponse::ok(SERVICE_NAME, query.clone(), outcome.to_value());
    println!("{}", serde_json::to_string_pretty(&held)?);

    let envelope = match prompt_decision(&format!("{query} held: {reason}")).await? {
        Decision::Approve(modification) => {
            executor.approve_envelope(approval_id, None, modification).await
        }
        Decision::Reject(why) => executor.reject_envelope(approval_id, &why),
    };
    emit(&envelope)
}

pub async fn run_modify(gateway: &Gateway, args: ModifyArgs) -> Result<()> {
    let request = ModifyRequest {
        order_no: args.order_no,
        instrument_id: args.instrument,
        quantity: args.quantity,
        price: args.price,
    };
    emit(&gateway.executor.modify_envelope(&request).await)
}

pub async fn run_cancel(gateway: &Gateway, args: CancelArgs) -> Result<()> {
    let request = args.to_request();
    emit(&gateway.executor.cancel_envelope(&request).await)
}
