//! Order models for Kiwoom stock trading.
//!
//! All prices and notionals use `rust_decimal::Decimal`. Kiwoom takes
//! quantities and prices as strings on the wire; [`OrderRequest::to_params`]
//! produces that shape.

use crate::error::{KiwoomError, Result};
use crate::operations::{ids, Params};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use trade_gate_approval::Context;

/// Domestic exchange routed to by default.
pub const DEFAULT_EXCHANGE: &str = "KRX";

/// Agent name stamped on order contexts so checkpoint filters recognise them.
pub const TRADING_AGENT: &str = "trading_agent";

// =============================================================================
// Enums
// =============================================================================

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Catalog operation that places an order on this side.
    #[must_use]
    pub fn operation_id(self) -> &'static str {
        match self {
            Self::Buy => ids::STOCK_BUY_ORDER,
            Self::Sell => ids::STOCK_SELL_ORDER,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = KiwoomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(KiwoomError::InvalidOrder(format!(
                "side must be buy or sell, got {other:?}"
            ))),
        }
    }
}

/// Order pricing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    /// Limit order at `price`.
    #[default]
    Limit,
    /// Market order.
    Market,
}

impl OrderKind {
    /// Kiwoom `trde_tp` code.
    #[must_use]
    pub fn trade_code(self) -> &'static str {
        match self {
            Self::Limit => "01",
            Self::Market => "03",
        }
    }
}

// =============================================================================
// OrderRequest
// =============================================================================

/// A buy or sell order for a domestic stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Six-digit instrument code (e.g., "005930").
    pub instrument_id: String,

    pub side: Side,

    /// Shares to trade.
    pub quantity: u64,

    /// Limit price in KRW. Market orders may carry an indicative price for
    /// the amount check.
    pub price: Option<Decimal>,

    #[serde(default)]
    pub kind: OrderKind,

    /// Account to trade in; `None` uses the gateway's configured account.
    #[serde(default)]
    pub account_id: Option<String>,
}

impl OrderRequest {
    /// Creates a limit order.
    pub fn limit(
        instrument_id: impl Into<String>,
        side: Side,
        quantity: u64,
        price: Decimal,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            side,
            quantity,
            price: Some(price),
            kind: OrderKind::Limit,
            account_id: None,
        }
    }

    /// Creates a market order.
    pub fn market(instrument_id: impl Into<String>, side: Side, quantity: u64) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            side,
            quantity,
            price: None,
            kind: OrderKind::Market,
            account_id: None,
        }
    }

    /// Creates a limit buy order.
    pub fn buy(instrument_id: impl Into<String>, quantity: u64, price: Decimal) -> Self {
        Self::limit(instrument_id, Side::Buy, quantity, price)
    }

    /// Creates a limit sell order.
    pub fn sell(instrument_id: impl Into<String>, quantity: u64, price: Decimal) -> Self {
        Self::limit(instrument_id, Side::Sell, quantity, price)
    }

    #[must_use]
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    #[must_use]
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    /// Validates the order locally.
    ///
    /// # Errors
    /// Returns `InvalidOrder` for a malformed instrument code, zero quantity,
    /// a priceless limit order, or a non-positive price.
    pub fn validate(&self) -> Result<()> {
        validate_instrument(&self.instrument_id)?;
        if self.quantity == 0 {
            return Err(KiwoomError::InvalidOrder(
                "quantity must be positive".to_string(),
            ));
        }
        match (self.kind, self.price) {
            (OrderKind::Limit, None) => Err(KiwoomError::InvalidOrder(
                "limit order requires a price".to_string(),
            )),
            (_, Some(price)) if price <= Decimal::ZERO => Err(KiwoomError::InvalidOrder(
                format!("price must be positive, got {price}"),
            )),
            _ => Ok(()),
        }
    }

    /// `price * quantity` when the price is known.
    #[must_use]
    pub fn notional(&self) -> Option<Decimal> {
        self.price
            .and_then(|price| price.checked_mul(Decimal::from(self.quantity)))
    }

    /// Wire parameters for `kt10000` / `kt10001`. Market orders omit `ord_uv`.
    #[must_use]
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("dmst_stex_tp".into(), json!(DEFAULT_EXCHANGE));
        params.insert("stk_cd".into(), json!(self.instrument_id));
        params.insert("ord_qty".into(), json!(self.quantity.to_string()));
        params.insert("trde_tp".into(), json!(self.kind.trade_code()));
        if let (OrderKind::Limit, Some(price)) = (self.kind, self.price) {
            params.insert("ord_uv".into(), json!(price.normalize().to_string()));
        }
        params
    }

    /// Approval context describing this order.
    #[must_use]
    pub fn to_context(&self) -> Context {
        let mut context = Context::new();
        context.insert("agent_name".into(), json!(TRADING_AGENT));
        context.insert("action".into(), json!(self.side.as_str()));
        context.insert("instrument_id".into(), json!(self.instrument_id));
        context.insert("quantity".into(), json!(self.quantity));
        context.insert(
            "price".into(),
            self.price
                .map_or(Value::Null, |p| json!(p.normalize().to_string())),
        );
        context.insert("order_kind".into(), json!(self.kind));
        context.insert(
            "account_id".into(),
            self.account_id.as_ref().map_or(Value::Null, |a| json!(a)),
        );
        context
    }

    /// Rebuilds an order from an approval context, including any reviewer
    /// modification merged into it. Prices may be numbers or strings.
    ///
    /// # Errors
    /// Returns `InvalidOrder` if a field is missing or malformed.
    pub fn from_context(context: &Context) -> Result<Self> {
        let instrument_id = context
            .get("instrument_id")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_field("instrument_id"))?
            .to_string();

        let side = context
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_field("action"))?
            .parse()?;

        let quantity = match context.get("quantity") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| invalid_field("quantity"))?;

        let price = match context.get("price") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => {
                Some(s.trim().parse::<Decimal>().map_err(|_| invalid_field("price"))?)
            }
            Some(Value::Number(n)) => Some(
                n.to_string()
                    .parse::<Decimal>()
                    .map_err(|_| invalid_field("price"))?,
            ),
            Some(_) => return Err(invalid_field("price")),
        };

        let kind = match context.get("order_kind") {
            None | Some(Value::Null) => OrderKind::default(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| invalid_field("order_kind"))?,
        };

        let account_id = context
            .get("account_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            instrument_id,
            side,
            quantity,
            price,
            kind,
            account_id,
        })
    }

    /// Human-readable label used as the envelope `query`.
    #[must_use]
    pub fn query_label(&self) -> String {
        let side = match self.side {
            Side::Buy => "Buy order",
            Side::Sell => "Sell order",
        };
        match self.price {
            Some(price) => format!("{side}: {} {} @ {}", self.instrument_id, self.quantity, price),
            None => format!("{side}: {} {} @ market", self.instrument_id, self.quantity),
        }
    }
}

fn invalid_field(name: &str) -> KiwoomError {
    KiwoomError::InvalidOrder(format!("missing or malformed {name} in order context"))
}

/// Rejects anything but a six-digit instrument code.
///
/// # Errors
/// Returns `InvalidOrder` for malformed codes.
pub fn validate_instrument(code: &str) -> Result<()> {
    if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(KiwoomError::InvalidOrder(format!(
            "instrument code must be 6 digits, got {code:?}"
        )))
    }
}

fn validate_order_no(order_no: &str) -> Result<()> {
    if order_no.trim().is_empty() {
        return Err(KiwoomError::InvalidOrder(
            "original order number is required".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// Modify / Cancel
// =============================================================================

/// Amendment of a resting order (`kt10002`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyRequest {
    pub order_no: String,
    pub instrument_id: String,
    pub quantity: u64,
    /// New price; `None` sends `"0"`.
    pub price: Option<Decimal>,
}

impl ModifyRequest {
    /// # Errors
    /// Returns `InvalidOrder` for a blank order number, bad code or zero quantity.
    pub fn validate(&self) -> Result<()> {
        validate_order_no(&self.order_no)?;
        validate_instrument(&self.instrument_id)?;
        if self.quantity == 0 {
            return Err(KiwoomError::InvalidOrder(
                "modify quantity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("dmst_stex_tp".into(), json!(DEFAULT_EXCHANGE));
        params.insert("orig_ord_no".into(), json!(self.order_no));
        params.insert("stk_cd".into(), json!(self.instrument_id));
        params.insert("mdfy_qty".into(), json!(self.quantity.to_string()));
        params.insert(
            "mdfy_uv".into(),
            json!(self
                .price
                .map_or_else(|| "0".to_string(), |p| p.normalize().to_string())),
        );
        params
    }
}

/// Cancellation of a resting order (`kt10003`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub order_no: String,
    pub instrument_id: String,
    pub quantity: u64,
}

impl CancelRequest {
    /// # Errors
    /// Returns `InvalidOrder` for a blank order number, bad code or zero quantity.
    pub fn validate(&self) -> Result<()> {
        validate_order_no(&self.order_no)?;
        validate_instrument(&self.instrument_id)?;
        if self.quantity == 0 {
            return Err(KiwoomError::InvalidOrder(
                "cancel quantity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("dmst_stex_tp".into(), json!(DEFAULT_EXCHANGE));
        params.insert("orig_ord_no".into(), json!(self.order_no));
        params.insert("stk_cd".into(), json!(self.instrument_id));
        params.insert("cncl_qty".into(), json!(self.quantity.to_string()));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // ==================== Validation Tests ====================

    #[test]
    fn test_valid_limit_order() {
        assert!(OrderRequest::buy("005930", 10, dec!(70000)).validate().is_ok());
        assert!(OrderRequest::market("005930", Side::Sell, 1).validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_instrument() {
        for code in ["5930", "0059301", "00593A", ""] {
            let err = OrderRequest::buy(code, 1, dec!(100)).validate().unwrap_err();
            assert!(matches!(err, KiwoomError::InvalidOrder(_)), "{code}");
        }
    }

    #[test]
    fn test_rejects_zero_quantity() {
        assert!(OrderRequest::buy("005930", 0, dec!(100)).validate().is_err());
    }

    #[test]
    fn test_limit_requires_price() {
        let mut order = OrderRequest::buy("005930", 1, dec!(100));
        order.price = None;
        assert!(order.validate().is_err());
        assert!(OrderRequest::buy("005930", 1, dec!(-5)).validate().is_err());
    }

    // ==================== Wire Shape Tests ====================

    #[test]
    fn test_limit_params() {
        let params = OrderRequest::buy("005930", 10, dec!(70000.00)).to_params();
        assert_eq!(params["dmst_stex_tp"], "KRX");
        assert_eq!(params["stk_cd"], "005930");
        assert_eq!(params["ord_qty"], "10");
        assert_eq!(params["trde_tp"], "01");
        assert_eq!(params["ord_uv"], "70000");
    }

    #[test]
    fn test_market_params_omit_price() {
        let params = OrderRequest::market("000660", Side::Sell, 3)
            .with_price(dec!(150000))
            .to_params();
        assert_eq!(params["trde_tp"], "03");
        assert!(!params.contains_key("ord_uv"));
    }

    #[test]
    fn test_side_operation_ids() {
        assert_eq!(Side::Buy.operation_id(), "kt10000");
        assert_eq!(Side::Sell.operation_id(), "kt10001");
        assert_eq!("SELL".parse::<Side>().unwrap(), Side::Sell);
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn test_notional() {
        assert_eq!(
            OrderRequest::buy("005930", 100, dec!(70000)).notional(),
            Some(dec!(7000000))
        );
        assert_eq!(OrderRequest::market("005930", Side::Buy, 1).notional(), None);
    }

    #[test]
    fn test_modify_and_cancel_params() {
        let modify = ModifyRequest {
            order_no: "0000123".into(),
            instrument_id: "005930".into(),
            quantity: 5,
            price: None,
        };
        assert!(modify.validate().is_ok());
        let params = modify.to_params();
        assert_eq!(params["orig_ord_no"], "0000123");
        assert_eq!(params["mdfy_uv"], "0");

        let cancel = CancelRequest {
            order_no: " ".into(),
            instrument_id: "005930".into(),
            quantity: 5,
        };
        assert!(cancel.validate().is_err());
    }

    // ==================== Context Tests ====================

    #[test]
    fn test_context_round_trip_keeps_trade_markers() {
        let order = OrderRequest::buy("005930", 10, dec!(70000)).with_account("1234567890");
        let context = order.to_context();

        assert_eq!(context["agent_name"], "trading_agent");
        assert_eq!(context["action"], "buy");
        assert_eq!(OrderRequest::from_context(&context).unwrap(), order);
    }

    #[test]
    fn test_from_context_accepts_modified_numbers() {
        let mut context = OrderRequest::buy("005930", 10, dec!(70000)).to_context();
        context.insert("quantity".into(), json!("20"));
        context.insert("price".into(), json!(69500.5));

        let order = OrderRequest::from_context(&context).unwrap();
        assert_eq!(order.quantity, 20);
        assert_eq!(order.price, Some(dec!(69500.5)));
    }

    #[test]
    fn test_from_context_rejects_missing_fields() {
        let mut context = OrderRequest::buy("005930", 10, dec!(70000)).to_context();
        context.remove("quantity");
        assert!(OrderRequest::from_context(&context).is_err());
    }

    #[test]
    fn test_query_label() {
        assert_eq!(
            OrderRequest::buy("005930", 10, dec!(70000)).query_label(),
            "Buy order: 005930 10 @ 70000"
        );
    }
}
