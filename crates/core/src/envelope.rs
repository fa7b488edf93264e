use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Uniform result shape handed back to the orchestration layer.
///
/// Successful and failed outcomes share the same fields so callers never have
/// to branch on an error type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardResponse {
    pub success: bool,
    pub query: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
}

impl StandardResponse {
    pub fn ok(service_name: impl Into<String>, query: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            query: query.into(),
            data,
            error: None,
            timestamp: Utc::now(),
            service_name: service_name.into(),
        }
    }

    pub fn failure(
        service_name: impl Into<String>,
        query: impl Into<String>,
        error: impl ToString,
    ) -> Self {
        Self {
            success: false,
            query: query.into(),
            data: Value::Null,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
            service_name: service_name.into(),
        }
    }

    /// Replaces `data` on a failure, e.g. to attach a risk decision.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
