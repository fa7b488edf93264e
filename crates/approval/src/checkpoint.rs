//! Checkpoint definitions and the trade-action filter.

use crate::types::{ApprovalReason, Context};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Checkpoint ids that always count as trade-related (substring match, case-insensitive).
pub const TRADE_CHECKPOINT_PATTERNS: [&str; 5] = [
    "execute_order",
    "human_approval",
    "trading_execution",
    "order_submission",
    "risk_assessment",
];

const TRADE_NODE_KEYWORDS: [&str; 3] = ["execute", "order", "approval"];

/// Predicate deciding whether a checkpoint fires for a context.
pub type Trigger = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// A named point at which a trade action may be suspended for approval.
#[derive(Clone)]
pub struct CheckpointDefinition {
    pub checkpoint_id: String,
    pub reason: ApprovalReason,
    /// `None` fires unconditionally.
    pub trigger: Option<Trigger>,
    /// `None` falls back to the manager's default timeout.
    pub timeout: Option<Duration>,
    pub auto_resume: bool,
}

impl fmt::Debug for CheckpointDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointDefinition")
            .field("checkpoint_id", &self.checkpoint_id)
            .field("reason", &self.reason)
            .field("has_trigger", &self.trigger.is_some())
            .field("timeout", &self.timeout)
            .field("auto_resume", &self.auto_resume)
            .finish()
    }
}

impl CheckpointDefinition {
    pub fn new(checkpoint_id: impl Into<String>, reason: ApprovalReason) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            reason,
            trigger: None,
            timeout: None,
            auto_resume: false,
        }
    }

    #[must_use]
    pub fn with_trigger<F>(mut self, trigger: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.trigger = Some(Arc::new(trigger));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_auto_resume(mut self, auto_resume: bool) -> Self {
        self.auto_resume = auto_resume;
        self
    }

    #[must_use]
    pub fn fires(&self, context: &Context) -> bool {
        self.trigger.as_ref().map_or(true, |trigger| trigger(context))
    }
}

fn field<'a>(context: &'a Context, key: &str) -> Option<&'a str> {
    context.get(key).and_then(Value::as_str)
}

/// True when `action` is `buy` or `sell`.
#[must_use]
pub fn is_buy_sell(context: &Context) -> bool {
    field(context, "action")
        .map(str::to_lowercase)
        .is_some_and(|action| action == "buy" || action == "sell")
}

/// Classifies a checkpoint as trade-related by id, or by a trading agent's
/// buy/sell action on an order-execution node.
#[must_use]
pub fn is_trade_checkpoint(checkpoint_id: &str, context: Option<&Context>) -> bool {
    let id = checkpoint_id.to_lowercase();
    if TRADE_CHECKPOINT_PATTERNS
        .iter()
        .any(|pattern| id.contains(pattern))
    {
        return true;
    }

    let Some(context) = context else {
        return false;
    };
    let agent = field(context, "agent_name").unwrap_or_default().to_lowercase();
    let node = field(context, "current_node")
        .unwrap_or_default()
        .to_lowercase();

    agent.contains("trading")
        && is_buy_sell(context)
        && TRADE_NODE_KEYWORDS.iter().any(|keyword| node.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_trade_ids_match_case_insensitively() {
        assert!(is_trade_checkpoint("ORDER_SUBMISSION", None));
        assert!(is_trade_checkpoint("pre_execute_order_check", None));
        assert!(is_trade_checkpoint("risk_assessment", None));
        assert!(!is_trade_checkpoint("data_collection", None));
    }

    #[test]
    fn test_trade_context_requires_all_signals() {
        let trading = ctx(json!({
            "agent_name": "TradingAgent",
            "action": "BUY",
            "current_node": "execute_trade",
        }));
        assert!(is_trade_checkpoint("custom", Some(&trading)));

        let wrong_node = ctx(json!({
            "agent_name": "trading_agent",
            "action": "buy",
            "current_node": "analyze",
        }));
        assert!(!is_trade_checkpoint("custom", Some(&wrong_node)));

        let wrong_action = ctx(json!({
            "agent_name": "trading_agent",
            "action": "hold",
            "current_node": "execute_trade",
        }));
        assert!(!is_trade_checkpoint("custom", Some(&wrong_action)));
    }

    #[test]
    fn test_definition_without_trigger_always_fires() {
        let def = CheckpointDefinition::new(
            "order_submission",
            ApprovalReason::checkpoint(Priority::High, "Order approval"),
        );
        assert!(def.fires(&Context::new()));

        let def = def.with_trigger(|c| c.get("quantity").and_then(Value::as_u64) > Some(100));
        assert!(!def.fires(&ctx(json!({"quantity": 10}))));
        assert!(def.fires(&ctx(json!({"quantity": 500}))));
    }
}
