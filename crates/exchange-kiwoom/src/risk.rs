//! Pre-trade risk gate.
//!
//! Every order is checked against three ceilings before it can reach the
//! network:
//! - Orders per trading day
//! - Shares per order
//! - Notional per order (when the price is known)
//!
//! The daily counter rolls over lazily on the first evaluation of a new
//! exchange-local date.

use crate::types::OrderRequest;
use chrono::{FixedOffset, NaiveDate};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trade_gate_core::{RiskConfig, SharedClock};

pub const REASON_DAILY_LIMIT: &str = "daily order limit exceeded";
pub const REASON_QUANTITY_LIMIT: &str = "single order quantity limit exceeded";
pub const REASON_AMOUNT_LIMIT: &str = "order amount limit exceeded";

pub const CHECK_DAILY_LIMIT: &str = "daily_order_limit";
pub const CHECK_QUANTITY_LIMIT: &str = "quantity_limit";
pub const CHECK_AMOUNT_LIMIT: &str = "amount_limit";

// =============================================================================
// Limits
// =============================================================================

/// Ceilings applied to every order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_orders_per_day: u32,
    pub max_single_quantity: u64,
    /// Maximum `price * quantity` in KRW.
    pub max_order_amount: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self::from(&RiskConfig::default())
    }
}

impl From<&RiskConfig> for RiskLimits {
    fn from(config: &RiskConfig) -> Self {
        Self {
            max_orders_per_day: config.max_orders_per_day,
            max_single_quantity: config.max_single_quantity,
            max_order_amount: config.max_order_amount,
        }
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Outcome of a risk evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub allowed: bool,
    /// Reason of the first failing check; `None` when allowed.
    pub reason: Option<String>,
    /// Checks that passed, in evaluation order.
    pub checks_passed: Vec<String>,
}

impl RiskDecision {
    fn reject(reason: &str, checks_passed: Vec<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            checks_passed,
        }
    }
}

/// Orders counted against today's limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounterState {
    pub date: NaiveDate,
    pub order_count: u32,
}

/// Point-in-time view of the limits and today's usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsSnapshot {
    pub limits: RiskLimits,
    pub date: NaiveDate,
    pub order_count: u32,
    pub remaining_orders: u32,
}

// =============================================================================
// RiskGate
// =============================================================================

/// Enforces [`RiskLimits`] with an atomic daily counter.
pub struct RiskGate {
    limits: RiskLimits,
    clock: SharedClock,
    offset: FixedOffset,
    state: Mutex<DailyCounterState>,
}

impl std::fmt::Debug for RiskGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskGate")
            .field("limits", &self.limits)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl RiskGate {
    /// Creates a gate; `offset` fixes which calendar date counts as today.
    pub fn new(limits: RiskLimits, clock: SharedClock, offset: FixedOffset) -> Self {
        let date = clock.today(offset);
        Self {
            limits,
            clock,
            offset,
            state: Mutex::new(DailyCounterState {
                date,
                order_count: 0,
            }),
        }
    }

    #[must_use]
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Evaluates an order and, if allowed, counts it against today's limit.
    ///
    /// The rollover, checks and increment happen under one lock, so concurrent
    /// callers can never push the count past the daily ceiling.
    pub fn evaluate(&self, order: &OrderRequest) -> RiskDecision {
        let today = self.clock.today(self.offset);
        let mut state = self.state.lock();
        if state.date != today {
            tracing::info!(previous = %state.date, %today, orders = state.order_count, "Daily order counter rolled over");
            *state = DailyCounterState {
                date: today,
                order_count: 0,
            };
        }

        if state.order_count >= self.limits.max_orders_per_day {
            tracing::warn!(
                order_count = state.order_count,
                max = self.limits.max_orders_per_day,
                "Order rejected: daily limit"
            );
            return RiskDecision::reject(REASON_DAILY_LIMIT, Vec::new());
        }

        let decision = self.check_ceilings(order, vec![CHECK_DAILY_LIMIT.to_string()]);
        if decision.allowed {
            state.order_count += 1;
            tracing::debug!(
                instrument = %order.instrument_id,
                order_count = state.order_count,
                "Order passed risk gate"
            );
        } else {
            tracing::warn!(
                instrument = %order.instrument_id,
                quantity = order.quantity,
                reason = decision.reason.as_deref().unwrap_or_default(),
                "Order rejected by risk gate"
            );
        }
        decision
    }

    /// Runs every check without counting the order.
    pub fn preview(&self, order: &OrderRequest) -> RiskDecision {
        let today = self.clock.today(self.offset);
        let used = {
            let state = self.state.lock();
            if state.date == today {
                state.order_count
            } else {
                0
            }
        };

        if used >= self.limits.max_orders_per_day {
            return RiskDecision::reject(REASON_DAILY_LIMIT, Vec::new());
        }
        self.check_ceilings(order, vec![CHECK_DAILY_LIMIT.to_string()])
    }

    /// Quantity and amount checks only; the daily count is left alone.
    ///
    /// Used to re-validate an order whose terms changed during approval.
    pub fn check_ceilings(&self, order: &OrderRequest, mut passed: Vec<String>) -> RiskDecision {
        if order.quantity > self.limits.max_single_quantity {
            return RiskDecision::reject(REASON_QUANTITY_LIMIT, passed);
        }
        passed.push(CHECK_QUANTITY_LIMIT.to_string());

        if let Some(price) = order.price {
            let within = price
                .checked_mul(Decimal::from(order.quantity))
                .is_some_and(|amount| amount <= self.limits.max_order_amount);
            if !within {
                return RiskDecision::reject(REASON_AMOUNT_LIMIT, passed);
            }
        }
        passed.push(CHECK_AMOUNT_LIMIT.to_string());

        RiskDecision {
            allowed: true,
            reason: None,
            checks_passed: passed,
        }
    }

    /// Limits plus today's usage.
    pub fn snapshot(&self) -> LimitsSnapshot {
        let today = self.clock.today(self.offset);
        let state = self.state.lock();
        let order_count = if state.date == today {
            state.order_count
        } else {
            0
        };
        LimitsSnapshot {
            limits: self.limits.clone(),
            date: today,
            order_count,
            remaining_orders: self.limits.max_orders_per_day.saturating_sub(order_count),
        }
    }
}
