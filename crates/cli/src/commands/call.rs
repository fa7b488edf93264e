//! Raw catalog call.

use super::{emit, parse_headers, parse_params, Gateway};
use anyhow::Result;
use clap::Args;
use trade_gate_core::StandardResponse;
use trade_gate_kiwoom::SERVICE_NAME;

/// Arguments for the call command.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Operation id (e.g., ka10001).
    pub operation_id: String,

    /// Request parameter as key=value, or key:=json for non-string values.
    #[arg(short = 'p', long = "param")]
    pub params: Vec<String>,

    /// Extra header as name:value (e.g., cont-yn:Y for continuation).
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,
}

pub async fn run(gateway: &Gateway, args: CallArgs) -> Result<()> {
    let params = parse_params(&args.params)?;
    let headers = parse_headers(&args.headers)?;

    let envelope = match gateway
        .client
        .call_with_headers(&args.operation_id, params, &headers)
        .await
    {
        Ok(body) => StandardResponse::ok(SERVICE_NAME, &args.operation_id, body),
        Err(e) => StandardResponse::failure(SERVICE_NAME, &args.operation_id, e),
    };
    emit(&envelope)
}
