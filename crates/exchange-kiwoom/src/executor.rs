//! Order submission flow.
//!
//! Composes the pieces every order passes through, in a fixed order:
//! 1. Local validation of the order
//! 2. The [`RiskGate`], which counts the order against today's limit
//! 3. The `order_submission` approval checkpoint, if one is registered
//! 4. Dispatch of `kt10000` / `kt10001`
//!
//! A risk rejection stops before any I/O. A suspended order is resolved later
//! through [`OrderExecutor::approve`] or [`OrderExecutor::reject`].
//!
//! # Example
//!
//! ```ignore
//! use trade_gate_kiwoom::{OrderExecutor, OrderOutcome, OrderRequest};
//! use trade_gate_core::{ConfigLoader, SystemClock};
//! use rust_decimal_macros::dec;
//!
//! let config = ConfigLoader::load()?;
//! let executor = OrderExecutor::from_app_config(&config, SystemClock::shared())?;
//! executor.require_approval(None);
//!
//! let order = OrderRequest::buy("005930", 10, dec!(70000));
//! match executor.submit(&order, "session-1").await? {
//!     OrderOutcome::Executed { response, .. } => println!("{response}"),
//!     OrderOutcome::Suspended { approval_id, .. } => println!("awaiting {approval_id}"),
//! }
//! ```

use crate::client::{KiwoomClient, OperationDispatcher};
use crate::error::{KiwoomError, Result};
use crate::operations::{ids, Params};
use crate::risk::{LimitsSnapshot, RiskDecision, RiskGate, RiskLimits};
use crate::types::{CancelRequest, ModifyRequest, OrderRequest, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use trade_gate_approval::{
    ApprovalManager, ApprovalReason, ApprovalSettings, CheckpointDefinition, Context, Priority,
    Submission,
};
use trade_gate_core::{offset_hours, AppConfig, SharedClock, StandardResponse};
use uuid::Uuid;

/// Checkpoint consulted for every buy/sell order.
pub const ORDER_CHECKPOINT: &str = "order_submission";

/// Node name recorded on order approvals.
pub const ORDER_NODE: &str = "execute_order";

/// `service_name` of every envelope produced here.
pub const SERVICE_NAME: &str = "kiwoom-trading";

// =============================================================================
// Outcome
// =============================================================================

/// Result of submitting an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderOutcome {
    /// The order reached the broker; `response` is the decoded body.
    Executed {
        operation_id: String,
        response: Value,
    },
    /// The order is held until the approval is resolved.
    Suspended {
        approval_id: Uuid,
        reason: ApprovalReason,
    },
}

impl OrderOutcome {
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }

    /// Envelope payload: the broker body, or `{status, id, reason}` when suspended.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Executed { response, .. } => response.clone(),
            Self::Suspended {
                approval_id,
                reason,
            } => json!({
                "status": "suspended",
                "id": approval_id,
                "reason": reason.to_string(),
            }),
        }
    }
}

// =============================================================================
// OrderExecutor
// =============================================================================

/// Risk-gated, approval-aware order submission.
pub struct OrderExecutor {
    dispatcher: Arc<dyn OperationDispatcher>,
    risk: Arc<RiskGate>,
    approvals: Arc<ApprovalManager>,
    clock: SharedClock,
    account_id: Option<String>,
}

impl std::fmt::Debug for OrderExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderExecutor")
            .field("risk", &self.risk)
            .field("approvals", &self.approvals)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

impl OrderExecutor {
    pub fn new(
        dispatcher: Arc<dyn OperationDispatcher>,
        risk: Arc<RiskGate>,
        approvals: Arc<ApprovalManager>,
        clock: SharedClock,
    ) -> Self {
        Self {
            dispatcher,
            risk,
            approvals,
            clock,
            account_id: None,
        }
    }

    /// Wires a client, risk gate and approval manager from configuration.
    ///
    /// # Errors
    /// Returns a configuration error if credentials are missing.
    pub fn from_app_config(config: &AppConfig, clock: SharedClock) -> Result<Self> {
        let client = KiwoomClient::from_app_config(config, clock.clone())?;
        let risk = RiskGate::new(
            RiskLimits::from(&config.risk),
            clock.clone(),
            offset_hours(config.http.utc_offset_hours),
        );
        let approvals = ApprovalManager::new(ApprovalSettings::from(&config.approval), clock.clone());

        let mut executor = Self::new(Arc::new(client), Arc::new(risk), Arc::new(approvals), clock);
        executor.account_id = config.account_no.clone();
        Ok(executor)
    }

    /// Default account stamped on orders that do not name one.
    #[must_use]
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    #[must_use]
    pub fn risk(&self) -> &RiskGate {
        &self.risk
    }

    #[must_use]
    pub fn approvals(&self) -> &ApprovalManager {
        &self.approvals
    }

    /// Checkpoint holding orders for approval; with `min_amount`, only orders
    /// whose known notional reaches it are held.
    #[must_use]
    pub fn order_checkpoint(min_amount: Option<Decimal>) -> CheckpointDefinition {
        let mut reason = ApprovalReason::checkpoint(Priority::High, "Order submission")
            .with_description("confirm before the order is sent to the broker");
        if let Some(amount) = min_amount {
            reason = reason.with_metadata("min_amount", json!(amount.to_string()));
        }

        let definition = CheckpointDefinition::new(ORDER_CHECKPOINT, reason);
        match min_amount {
            None => definition,
            Some(threshold) => definition.with_trigger(move |context| {
                OrderRequest::from_context(context)
                    .ok()
                    .and_then(|order| order.notional())
                    .is_some_and(|amount| amount >= threshold)
            }),
        }
    }

    /// Registers [`order_checkpoint`](Self::order_checkpoint).
    pub fn require_approval(&self, min_amount: Option<Decimal>) -> bool {
        self.approvals
            .register_checkpoint(Self::order_checkpoint(min_amount))
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Submits a buy or sell order.
    ///
    /// # Errors
    /// - `InvalidOrder` or `RiskRejected` before any request is sent
    /// - Any client error from dispatch
    pub async fn submit(&self, order: &OrderRequest, thread_id: &str) -> Result<OrderOutcome> {
        let mut order = order.clone();
        if order.account_id.is_none() {
            order.account_id.clone_from(&self.account_id);
        }
        order.validate()?;

        let decision = self.risk.evaluate(&order);
        if !decision.allowed {
            return Err(KiwoomError::risk_rejected(
                decision.reason.unwrap_or_default(),
            ));
        }

        match self
            .approvals
            .submit(ORDER_CHECKPOINT, order.to_context(), thread_id, ORDER_NODE)
        {
            Submission::Suspended {
                approval_id,
                reason,
            } => {
                tracing::info!(%approval_id, instrument = %order.instrument_id, side = %order.side, "Order held for approval");
                Ok(OrderOutcome::Suspended {
                    approval_id,
                    reason,
                })
            }
            Submission::Proceed(context) => {
                let order = OrderRequest::from_context(&context)?;
                self.execute(&order).await
            }
        }
    }

    /// Approves a held order and dispatches it.
    ///
    /// `modification` may change terms such as `quantity` or `price`; the
    /// changed order must still pass the per-order ceilings, otherwise the
    /// approval stays pending. It is not counted against the daily limit again.
    ///
    /// # Errors
    /// `ApprovalNotFound`, `ApprovalExpired`, `InvalidOrder`, `RiskRejected`,
    /// or any client error from dispatch.
    pub async fn approve(
        &self,
        approval_id: Uuid,
        user_input: Option<Context>,
        modification: Option<Context>,
    ) -> Result<OrderOutcome> {
        let pending = self.approvals.get(approval_id)?;
        let mut proposed = pending.context;
        for layer in [&user_input, &modification].into_iter().flatten() {
            proposed.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let order = OrderRequest::from_context(&proposed)?;
        order.validate()?;
        self.recheck(&order)?;

        let context = self
            .approvals
            .resume(approval_id, user_input, modification)?;
        let order = OrderRequest::from_context(&context)?;
        tracing::info!(%approval_id, instrument = %order.instrument_id, quantity = order.quantity, "Approved order released");
        self.execute(&order).await
    }

    /// Rejects a held order.
    ///
    /// # Errors
    /// `ApprovalNotFound` or `ApprovalExpired`.
    pub fn reject(&self, approval_id: Uuid, reason: impl Into<String>) -> Result<()> {
        self.approvals.reject(approval_id, reason)?;
        Ok(())
    }

    /// Amends a resting order (`kt10002`).
    ///
    /// # Errors
    /// `InvalidOrder`, `RiskRejected` if the amended terms breach the per-order
    /// ceilings, or any client error.
    pub async fn modify(&self, request: &ModifyRequest) -> Result<Value> {
        request.validate()?;
        let as_order = OrderRequest {
            instrument_id: request.instrument_id.clone(),
            side: Side::Buy,
            quantity: request.quantity,
            price: request.price,
            kind: crate::types::OrderKind::Limit,
            account_id: None,
        };
        self.recheck(&as_order)?;
        self.dispatcher
            .dispatch(ids::STOCK_MODIFY_ORDER, request.to_params())
            .await
    }

    /// Cancels a resting order (`kt10003`).
    ///
    /// # Errors
    /// `InvalidOrder` or any client error.
    pub async fn cancel(&self, request: &CancelRequest) -> Result<Value> {
        request.validate()?;
        self.dispatcher
            .dispatch(ids::STOCK_CANCEL_ORDER, request.to_params())
            .await
    }

    async fn execute(&self, order: &OrderRequest) -> Result<OrderOutcome> {
        let operation_id = order.side.operation_id();
        tracing::info!(
            operation_id,
            instrument = %order.instrument_id,
            side = %order.side,
            quantity = order.quantity,
            price = ?order.price,
            "Submitting order"
        );

        let response = self
            .dispatcher
            .dispatch(operation_id, order.to_params())
            .await?;

        tracing::info!(operation_id, instrument = %order.instrument_id, "Order submitted");
        Ok(OrderOutcome::Executed {
            operation_id: operation_id.to_string(),
            response,
        })
    }

    fn recheck(&self, order: &OrderRequest) -> Result<()> {
        let decision = self.risk.check_ceilings(order, Vec::new());
        if decision.allowed {
            Ok(())
        } else {
            Err(KiwoomError::risk_rejected(
                decision.reason.unwrap_or_default(),
            ))
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Unfilled orders (`ka10075`), optionally for one instrument.
    ///
    /// # Errors
    /// Any client error.
    pub async fn outstanding_orders(&self, instrument_id: Option<&str>) -> Result<Value> {
        let mut params = Params::new();
        if let Some(code) = instrument_id {
            params.insert("all_stk_tp".into(), json!("N"));
            params.insert("stk_cd".into(), json!(code));
        }
        self.dispatcher
            .dispatch(ids::OUTSTANDING_ORDERS, params)
            .await
    }

    /// Today's executions (`ka10076`), optionally for one instrument.
    ///
    /// # Errors
    /// Any client error.
    pub async fn executions(&self, instrument_id: Option<&str>) -> Result<Value> {
        let mut params = Params::new();
        if let Some(code) = instrument_id {
            params.insert("stk_cd".into(), json!(code));
        }
        self.dispatcher.dispatch(ids::EXECUTIONS, params).await
    }

    /// Cash available for an order (`kt00010`).
    ///
    /// # Errors
    /// `InvalidOrder` for a bad code, or any client error.
    pub async fn orderable_amount(
        &self,
        instrument_id: &str,
        side: Side,
        price: Option<Decimal>,
    ) -> Result<Value> {
        crate::types::validate_instrument(instrument_id)?;
        let mut params = Params::new();
        params.insert("stk_cd".into(), json!(instrument_id));
        params.insert(
            "trde_tp".into(),
            json!(match side {
                Side::Sell => "1",
                Side::Buy => "2",
            }),
        );
        params.insert("uv".into(), json!(price_text(price)));
        self.dispatcher.dispatch(ids::ORDERABLE_AMOUNT, params).await
    }

    /// Shares orderable at the given price (`kt00011`).
    ///
    /// # Errors
    /// `InvalidOrder` for a bad code, or any client error.
    pub async fn orderable_quantity(
        &self,
        instrument_id: &str,
        price: Option<Decimal>,
    ) -> Result<Value> {
        crate::types::validate_instrument(instrument_id)?;
        let mut params = Params::new();
        params.insert("stk_cd".into(), json!(instrument_id));
        if let Some(price) = price {
            params.insert("uv".into(), json!(price.normalize().to_string()));
        }
        self.dispatcher
            .dispatch(ids::ORDERABLE_QUANTITY, params)
            .await
    }

    /// Holdings and valuation (`kt00004`).
    ///
    /// # Errors
    /// Any client error.
    pub async fn account_evaluation(&self) -> Result<Value> {
        self.dispatcher
            .dispatch(ids::ACCOUNT_EVALUATION, Params::new())
            .await
    }

    /// Outstanding orders, executions and limits fetched together. A failed
    /// section carries `{"error": ...}` instead of data.
    pub async fn trading_summary(&self) -> Value {
        let (outstanding, executions) =
            tokio::join!(self.outstanding_orders(None), self.executions(None));

        let section = |result: Result<Value>| match result {
            Ok(value) => value,
            Err(e) => json!({ "error": e.to_string() }),
        };
        json!({
            "outstanding_orders": section(outstanding),
            "executions": section(executions),
            "limits": self.trading_limits(),
        })
    }

    /// Risk verdict for an order without counting it.
    #[must_use]
    pub fn check_risk(&self, order: &OrderRequest) -> RiskDecision {
        self.risk.preview(order)
    }

    #[must_use]
    pub fn trading_limits(&self) -> LimitsSnapshot {
        self.risk.snapshot()
    }

    // -------------------------------------------------------------------------
    // Envelopes
    // -------------------------------------------------------------------------

    fn envelope(&self, query: String, result: Result<Value>) -> StandardResponse {
        let response = match result {
            Ok(data) => StandardResponse::ok(SERVICE_NAME, query, data),
            Err(e) => {
                tracing::debug!(error = %e, "Operation failed");
                StandardResponse::failure(SERVICE_NAME, query, e)
            }
        };
        response.with_timestamp(self.clock.now())
    }

    pub async fn submit_envelope(&self, order: &OrderRequest, thread_id: &str) -> StandardResponse {
        let result = self
            .submit(order, thread_id)
            .await
            .map(|outcome| outcome.to_value());
        self.envelope(order.query_label(), result)
    }

    pub async fn approve_envelope(
        &self,
        approval_id: Uuid,
        user_input: Option<Context>,
        modification: Option<Context>,
    ) -> StandardResponse {
        let result = self
            .approve(approval_id, user_input, modification)
            .await
            .map(|outcome| outcome.to_value());
        self.envelope(format!("Approve order: {approval_id}"), result)
    }

    pub fn reject_envelope(&self, approval_id: Uuid, reason: &str) -> StandardResponse {
        let result = self
            .reject(approval_id, reason)
            .map(|()| json!({ "id": approval_id, "status": "rejected", "reason": reason }));
        self.envelope(format!("Reject order: {approval_id}"), result)
    }

    pub async fn modify_envelope(&self, request: &ModifyRequest) -> StandardResponse {
        let result = self.modify(request).await;
        self.envelope(format!("Modify order: {}", request.order_no), result)
    }

    pub async fn cancel_envelope(&self, request: &CancelRequest) -> StandardResponse {
        let result = self.cancel(request).await;
        self.envelope(format!("Cancel order: {}", request.order_no), result)
    }

    pub async fn outstanding_orders_envelope(&self, instrument_id: Option<&str>) -> StandardResponse {
        let result = self.outstanding_orders(instrument_id).await;
        self.envelope(
            format!("Outstanding orders: {}", instrument_id.unwrap_or("all")),
            result,
        )
    }

    pub async fn executions_envelope(&self, instrument_id: Option<&str>) -> StandardResponse {
        let result = self.executions(instrument_id).await;
        self.envelope(
            format!("Executions: {}", instrument_id.unwrap_or("all")),
            result,
        )
    }

    pub async fn orderable_amount_envelope(
        &self,
        instrument_id: &str,
        side: Side,
        price: Option<Decimal>,
    ) -> StandardResponse {
        let result = self.orderable_amount(instrument_id, side, price).await;
        self.envelope(format!("Orderable amount: {instrument_id} ({side})"), result)
    }

    pub async fn orderable_quantity_envelope(
        &self,
        instrument_id: &str,
        price: Option<Decimal>,
    ) -> StandardResponse {
        let result = self.orderable_quantity(instrument_id, price).await;
        self.envelope(format!("Orderable quantity: {instrument_id}"), result)
    }

    pub async fn account_evaluation_envelope(&self) -> StandardResponse {
        let result = self.account_evaluation().await;
        self.envelope("Account evaluation".to_string(), result)
    }

    pub async fn trading_summary_envelope(&self) -> StandardResponse {
        let summary = self.trading_summary().await;
        self.envelope("Trading summary".to_string(), Ok(summary))
    }

    /// `success` mirrors the verdict; `data` is the decision itself.
    pub fn check_risk_envelope(&self, order: &OrderRequest) -> StandardResponse {
        let query = format!("Risk check: {}", order.instrument_id);
        if let Err(e) = order.validate() {
            return self.envelope(query, Err(e));
        }

        let decision = self.check_risk(order);
        let data = serde_json::to_value(&decision).unwrap_or(Value::Null);
        let response = if decision.allowed {
            StandardResponse::ok(SERVICE_NAME, query, data)
        } else {
            StandardResponse::failure(
                SERVICE_NAME,
                query,
                decision.reason.as_deref().unwrap_or_default(),
            )
            .with_data(data)
        };
        response.with_timestamp(self.clock.now())
    }

    pub fn trading_limits_envelope(&self) -> StandardResponse {
        let result = serde_json::to_value(self.trading_limits()).map_err(KiwoomError::from);
        self.envelope("Trading limits".to_string(), result)
    }
}

fn price_text(price: Option<Decimal>) -> String {
    price.map_or_else(|| "0".to_string(), |p| p.normalize().to_string())
}
