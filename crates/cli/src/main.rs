use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{
    CallArgs, CancelArgs, CheckRiskArgs, Gateway, ModifyArgs, OrderArgs, TokenArgs,
};
use trade_gate_kiwoom::Side;

#[derive(Parser)]
#[command(name = "trade-gate")]
#[command(about = "Risk-gated order gateway for the Kiwoom Securities REST API", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(
        short,
        long,
        global = true,
        default_value = "config/Config.toml",
        env = "TRADE_GATE_CONFIG"
    )]
    config: PathBuf,

    /// TOML operation catalog extending the built-in one
    #[arg(long, global = true, env = "TRADE_GATE_OPERATIONS")]
    operations: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call any catalog operation with key=value params
    Call(CallArgs),
    /// Submit a buy order through the risk gate
    Buy(OrderArgs),
    /// Submit a sell order through the risk gate
    Sell(OrderArgs),
    /// Amend a resting order
    Modify(ModifyArgs),
    /// Cancel a resting order
    Cancel(CancelArgs),
    /// Evaluate an order against the risk limits without sending it
    CheckRisk(CheckRiskArgs),
    /// Show risk limits and today's usage
    Limits,
    /// Outstanding orders, executions and limits in one view
    Summary,
    /// List the operation catalog
    Operations,
    /// Acquire (or revoke) an access token
    Token(TokenArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let gateway = Gateway::connect(&cli.config, cli.operations.as_deref())?;

    match cli.command {
        Commands::Call(args) => commands::call::run(&gateway, args).await,
        Commands::Buy(args) => commands::order::run(&gateway, Side::Buy, args).await,
        Commands::Sell(args) => commands::order::run(&gateway, Side::Sell, args).await,
        Commands::Modify(args) => commands::order::run_modify(&gateway, args).await,
        Commands::Cancel(args) => commands::order::run_cancel(&gateway, args).await,
        Commands::CheckRisk(args) => commands::account::run_check_risk(&gateway, args),
        Commands::Limits => commands::account::run_limits(&gateway),
        Commands::Summary => commands::account::run_summary(&gateway).await,
        Commands::Operations => commands::account::run_operations(&gateway),
        Commands::Token(args) => commands::account::run_token(&gateway, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_buy() {
        let cli = Cli::try_parse_from([
            "trade-gate",
            "buy",
            "005930",
            "10",
            "--price",
            "70000",
            "--require-approval",
        ])
        .unwrap();
        match cli.command {
            Commands::Buy(args) => {
                assert_eq!(args.instrument, "005930");
                assert_eq!(args.quantity, 10);
                assert!(args.require_approval);
            }
            _ => panic!("expected buy"),
        }
    }

    #[test]
    fn test_cancel_requires_quantity() {
        assert!(Cli::try_parse_from(["trade-gate", "cancel", "0000123", "005930"]).is_err());

        let cli =
            Cli::try_parse_from(["trade-gate", "cancel", "0000123", "005930", "3"]).unwrap();
        let Commands::Cancel(args) = cli.command else {
            panic!("expected cancel");
        };
        let request = args.to_request();
        assert_eq!(request.quantity, 3);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_parse_call_with_params() {
        let cli = Cli::try_parse_from([
            "trade-gate",
            "--config",
            "other.toml",
            "call",
            "ka10001",
            "-p",
            "stk_cd=005930",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert!(matches!(cli.command, Commands::Call(ref args) if args.params == ["stk_cd=005930"]));
    }
}
