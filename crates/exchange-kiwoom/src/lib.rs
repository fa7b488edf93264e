//! Kiwoom Securities REST gateway.
//!
//! This crate provides:
//! - An authenticated client with token caching, rate limiting and retry
//! - A catalog of Kiwoom operations with required-parameter validation
//! - A pre-trade risk gate with a daily order counter
//! - An order flow that routes buy/sell orders through risk, approval and dispatch
//!
//! # Example
//!
//! ```ignore
//! use trade_gate_kiwoom::{OrderExecutor, OrderRequest};
//! use trade_gate_core::{ConfigLoader, SystemClock};
//! use rust_decimal_macros::dec;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let executor = OrderExecutor::from_app_config(&config, SystemClock::shared())?;
//!
//!     let order = OrderRequest::buy("005930", 10, dec!(70000));
//!     let envelope = executor.submit_envelope(&order, "session-1").await;
//!     println!("{}", serde_json::to_string_pretty(&envelope)?);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Authentication
//!
//! Kiwoom exchanges an app key and secret for a bearer token at
//! `/oauth2/token`. Set the following environment variables:
//!
//! - `KIWOOM_APP_KEY`: Your app key
//! - `KIWOOM_APP_SECRET`: Your app secret
//! - `KIWOOM_ACCOUNT_NO`: Trading account number
//!
//! Tokens are refreshed five minutes before expiry and after a 401.
//!
//! # Safety Features
//!
//! - **Risk gate**: orders per day, shares per order, and notional per order
//! - **Approval checkpoint**: orders can be held until a person approves them
//! - **Paper trading by default**: production requires `mode = "production"`
//!   or `KIWOOM_PRODUCTION_MODE=true`

pub mod auth;
pub mod client;
pub mod error;
pub mod executor;
pub mod operations;
pub mod risk;
pub mod types;

pub use auth::{parse_expiry, AppCredentials, CredentialStore, REFRESH_MARGIN_SECS};
pub use client::{KiwoomClient, KiwoomClientConfig, OperationDispatcher};
pub use error::{KiwoomError, Result};
pub use executor::{OrderExecutor, OrderOutcome, ORDER_CHECKPOINT, ORDER_NODE, SERVICE_NAME};
pub use operations::{ids, HttpMethod, OperationDescriptor, OperationRegistry, Params};
pub use risk::{DailyCounterState, LimitsSnapshot, RiskDecision, RiskGate, RiskLimits};
pub use types::{CancelRequest, ModifyRequest, OrderKind, OrderRequest, Side};
