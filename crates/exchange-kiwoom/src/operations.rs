//! Operation catalog.
//!
//! Each remote capability is described by an [`OperationDescriptor`]: the
//! `api-id` header value, HTTP method, path, and the parameters the server
//! insists on. Validation is a plain set difference between the required names
//! and the supplied ones.

use crate::error::{KiwoomError, Result};
use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// String-keyed request parameters.
pub type Params = Map<String, Value>;

/// Operation ids used by the gateway.
pub mod ids {
    pub const STOCK_INFO: &str = "ka10001";
    pub const STOCK_ORDERBOOK: &str = "ka10004";
    pub const STOCK_QUOTE: &str = "ka10007";
    pub const STOCK_DAILY_CHART: &str = "ka10081";
    pub const OUTSTANDING_ORDERS: &str = "ka10075";
    pub const EXECUTIONS: &str = "ka10076";
    pub const ACCOUNT_EVALUATION: &str = "kt00004";
    pub const ORDERABLE_AMOUNT: &str = "kt00010";
    pub const ORDERABLE_QUANTITY: &str = "kt00011";
    pub const STOCK_BUY_ORDER: &str = "kt10000";
    pub const STOCK_SELL_ORDER: &str = "kt10001";
    pub const STOCK_MODIFY_ORDER: &str = "kt10002";
    pub const STOCK_CANCEL_ORDER: &str = "kt10003";
}

const PATH_STOCK_INFO: &str = "/api/dostk/stkinfo";
const PATH_MARKET: &str = "/api/dostk/mrkcond";
const PATH_CHART: &str = "/api/dostk/chart";
const PATH_ACCOUNT: &str = "/api/dostk/acnt";
const PATH_ORDER: &str = "/api/dostk/ordr";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Whether params travel as a JSON body rather than a query string.
    #[must_use]
    pub fn sends_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    #[must_use]
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub required_params: BTreeSet<String>,
    /// Merged underneath caller params.
    #[serde(default)]
    pub defaults: Params,
}

impl OperationDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        method: HttpMethod,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            method,
            path: path.into(),
            required_params: BTreeSet::new(),
            defaults: Params::new(),
        }
    }

    #[must_use]
    pub fn with_required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_params.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    /// Required names absent from `params`, sorted.
    #[must_use]
    pub fn missing_params(&self, params: &Params) -> Vec<String> {
        let supplied: BTreeSet<&str> = params
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, _)| name.as_str())
            .collect();

        self.required_params
            .iter()
            .filter(|name| !supplied.contains(name.as_str()))
            .cloned()
            .collect()
    }

    /// Merges defaults under `params` and validates the result.
    ///
    /// # Errors
    /// Returns [`KiwoomError::InvalidParams`] listing every missing name.
    pub fn prepare(&self, params: Params) -> Result<Params> {
        let mut merged = self.defaults.clone();
        merged.extend(params);

        let missing = self.missing_params(&merged);
        if !missing.is_empty() {
            return Err(KiwoomError::invalid_params(&self.id, missing));
        }
        Ok(merged)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    operations: Vec<OperationDescriptor>,
}

/// Lookup table of operation descriptors, immutable once the client is built.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, OperationDescriptor>,
}

impl OperationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the operations the gateway itself issues.
    #[must_use]
    pub fn builtin() -> Self {
        use HttpMethod::Post;

        let mut registry = Self::new();
        for descriptor in [
            OperationDescriptor::new(ids::STOCK_INFO, "Stock basic info", Post, PATH_STOCK_INFO)
                .with_required(["stk_cd"]),
            OperationDescriptor::new(ids::STOCK_ORDERBOOK, "Stock orderbook", Post, PATH_MARKET)
                .with_required(["stk_cd"]),
            OperationDescriptor::new(ids::STOCK_QUOTE, "Stock quote table", Post, PATH_MARKET)
                .with_required(["stk_cd"]),
            OperationDescriptor::new(ids::STOCK_DAILY_CHART, "Daily chart", Post, PATH_CHART)
                .with_required(["stk_cd", "base_dt", "upd_stkpc_tp"])
                .with_default("upd_stkpc_tp", "1"),
            OperationDescriptor::new(ids::OUTSTANDING_ORDERS, "Outstanding orders", Post, PATH_ACCOUNT)
                .with_required(["all_stk_tp", "trde_tp", "stex_tp"])
                .with_default("all_stk_tp", "Y")
                .with_default("trde_tp", "0")
                .with_default("stex_tp", "0"),
            OperationDescriptor::new(ids::EXECUTIONS, "Executions", Post, PATH_ACCOUNT)
                .with_required(["qry_tp", "sell_tp", "stex_tp"])
                .with_default("qry_tp", "1")
                .with_default("sell_tp", "0")
                .with_default("stex_tp", "0"),
            OperationDescriptor::new(ids::ACCOUNT_EVALUATION, "Account evaluation", Post, PATH_ACCOUNT)
                .with_required(["qry_tp", "dmst_stex_tp"])
                .with_default("qry_tp", "0")
                .with_default("dmst_stex_tp", "KRX"),
            OperationDescriptor::new(ids::ORDERABLE_AMOUNT, "Orderable amount", Post, PATH_ACCOUNT)
                .with_required(["stk_cd", "trde_tp", "uv"]),
            OperationDescriptor::new(ids::ORDERABLE_QUANTITY, "Orderable quantity", Post, PATH_ACCOUNT)
                .with_required(["stk_cd"]),
            OperationDescriptor::new(ids::STOCK_BUY_ORDER, "Stock buy order", Post, PATH_ORDER)
                .with_required(["dmst_stex_tp", "stk_cd", "ord_qty", "trde_tp"])
                .with_default("dmst_stex_tp", "KRX"),
            OperationDescriptor::new(ids::STOCK_SELL_ORDER, "Stock sell order", Post, PATH_ORDER)
                .with_required(["dmst_stex_tp", "stk_cd", "ord_qty", "trde_tp"])
                .with_default("dmst_stex_tp", "KRX"),
            OperationDescriptor::new(ids::STOCK_MODIFY_ORDER, "Stock modify order", Post, PATH_ORDER)
                .with_required(["dmst_stex_tp", "orig_ord_no", "stk_cd", "mdfy_qty", "mdfy_uv"])
                .with_default("dmst_stex_tp", "KRX"),
            OperationDescriptor::new(ids::STOCK_CANCEL_ORDER, "Stock cancel order", Post, PATH_ORDER)
                .with_required(["dmst_stex_tp", "orig_ord_no", "stk_cd", "cncl_qty"])
                .with_default("dmst_stex_tp", "KRX"),
        ] {
            registry.insert(descriptor);
        }
        registry
    }

    /// Built-in catalog extended (and overridden) by a TOML file of
    /// `[[operations]]` tables.
    ///
    /// # Errors
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn builtin_with_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut registry = Self::builtin();
        for descriptor in Self::read_file(path.as_ref())? {
            registry.insert(descriptor);
        }
        Ok(registry)
    }

    fn read_file(path: &Path) -> Result<Vec<OperationDescriptor>> {
        if !path.exists() {
            return Err(KiwoomError::Configuration(format!(
                "operation catalog not found: {}",
                path.display()
            )));
        }
        let catalog: CatalogFile = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| KiwoomError::Configuration(format!("invalid operation catalog: {e}")))?;

        tracing::info!(
            path = %path.display(),
            operations = catalog.operations.len(),
            "Loaded operation catalog"
        );
        Ok(catalog.operations)
    }

    /// Adds or replaces a descriptor.
    pub fn insert(&mut self, descriptor: OperationDescriptor) {
        self.operations.insert(descriptor.id.clone(), descriptor);
    }

    #[must_use]
    pub fn get(&self, operation_id: &str) -> Option<&OperationDescriptor> {
        self.operations.get(operation_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Descriptors sorted by id.
    #[must_use]
    pub fn descriptors(&self) -> Vec<&OperationDescriptor> {
        let mut all: Vec<&OperationDescriptor> = self.operations.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use serde_json::json;

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_missing_params_set_difference() {
        let descriptor = OperationDescriptor::new("tt00001", "Test", HttpMethod::Get, "/t")
            .with_required(["a", "b"]);

        let err = descriptor.prepare(params(json!({"a": 1}))).unwrap_err();
        match err {
            KiwoomError::InvalidParams {
                operation_id,
                missing,
            } => {
                assert_eq!(operation_id, "tt00001");
                assert_eq!(missing, vec!["b".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_null_counts_as_missing() {
        let descriptor = OperationDescriptor::new("tt00001", "Test", HttpMethod::Get, "/t")
            .with_required(["a"]);
        assert_eq!(
            descriptor.missing_params(&params(json!({"a": null}))),
            vec!["a".to_string()]
        );
    }

    #[test]
    fn test_defaults_fill_and_caller_wins() {
        let registry = OperationRegistry::builtin();
        let buy = registry.get(ids::STOCK_BUY_ORDER).unwrap();

        let prepared = buy
            .prepare(params(json!({"stk_cd": "005930", "ord_qty": "10", "trde_tp": "01"})))
            .unwrap();
        assert_eq!(prepared["dmst_stex_tp"], json!("KRX"));

        let prepared = buy
            .prepare(params(json!({
                "dmst_stex_tp": "NXT", "stk_cd": "005930", "ord_qty": "10", "trde_tp": "01"
            })))
            .unwrap();
        assert_eq!(prepared["dmst_stex_tp"], json!("NXT"));
    }

    #[test]
    fn test_builtin_catalog_covers_order_operations() {
        let registry = OperationRegistry::builtin();
        for id in [
            ids::STOCK_BUY_ORDER,
            ids::STOCK_SELL_ORDER,
            ids::STOCK_MODIFY_ORDER,
            ids::STOCK_CANCEL_ORDER,
        ] {
            let descriptor = registry.get(id).unwrap();
            assert_eq!(descriptor.path, "/api/dostk/ordr");
            assert!(descriptor.method.sends_body());
        }
        assert!(registry.get("zz00000").is_none());
        assert_eq!(registry.descriptors().first().unwrap().id, ids::STOCK_INFO);
    }

    #[test]
    fn test_method_body_split() {
        assert!(!HttpMethod::Get.sends_body());
        assert!(!HttpMethod::Delete.sends_body());
        assert!(HttpMethod::Patch.sends_body());
    }

    #[test]
    fn test_catalog_file_overrides_builtin() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "operations.toml",
                r#"
                [[operations]]
                id = "ka10001"
                name = "Stock basic info (GET)"
                method = "GET"
                path = "/api/dostk/stkinfo"
                required_params = ["stk_cd", "mrkt_tp"]

                [[operations]]
                id = "ka10099"
                method = "POST"
                path = "/api/dostk/stkinfo"

                [operations.defaults]
                mrkt_tp = "0"
                "#,
            )?;

            let registry = OperationRegistry::builtin_with_file("operations.toml").unwrap();
            let overridden = registry.get(ids::STOCK_INFO).unwrap();
            assert_eq!(overridden.method, HttpMethod::Get);
            assert!(overridden.required_params.contains("mrkt_tp"));
            assert_eq!(registry.get("ka10099").unwrap().defaults["mrkt_tp"], json!("0"));
            Ok(())
        });
    }

    #[test]
    fn test_missing_catalog_file_is_configuration_error() {
        let err = OperationRegistry::builtin_with_file("/nonexistent/operations.toml").unwrap_err();
        assert!(matches!(err, KiwoomError::Configuration(_)));
    }
}
