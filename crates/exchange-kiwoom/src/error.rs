//! Error types for the Kiwoom gateway.
//!
//! Validation and risk failures are raised before any network I/O. Transport
//! and server failures are retried by the client and surface as
//! [`KiwoomError::RequestFailed`] once every retry attempt is spent.

use thiserror::Error;
use trade_gate_approval::ApprovalError;
use uuid::Uuid;

/// Errors that can occur when talking to Kiwoom or gating an order.
#[derive(Debug, Error)]
pub enum KiwoomError {
    /// Operation id is not in the catalog.
    #[error("unknown operation: {operation_id}")]
    UnknownOperation {
        /// The requested operation id.
        operation_id: String,
    },

    /// Required parameters were not supplied.
    #[error("invalid params for {operation_id}: missing {}", .missing.join(", "))]
    InvalidParams {
        /// Operation being called.
        operation_id: String,
        /// Missing parameter names, sorted.
        missing: Vec<String>,
    },

    /// Order failed local validation.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Token exchange failed or the credential kept being rejected.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Non-success HTTP status from the API.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Response body or reason.
        message: String,
    },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Retries exhausted or a non-retryable failure.
    #[error("{operation_id} request to {endpoint} failed after {attempts} attempt(s): {last_error}")]
    RequestFailed {
        /// Operation being called.
        operation_id: String,
        /// Full request URL.
        endpoint: String,
        /// Display text of the last failure.
        last_error: String,
        /// Attempts performed.
        attempts: u32,
    },

    /// Order blocked by the risk gate.
    #[error("risk check failed: {reason}")]
    RiskRejected {
        /// The failing check's reason.
        reason: String,
    },

    /// No pending approval with this id.
    #[error("approval not found: {id}")]
    ApprovalNotFound {
        /// Approval id.
        id: Uuid,
    },

    /// The approval timed out.
    #[error("approval expired: {id}")]
    ApprovalExpired {
        /// Approval id.
        id: Uuid,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KiwoomError {
    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates an invalid params error; names are sorted.
    pub fn invalid_params(operation_id: impl Into<String>, mut missing: Vec<String>) -> Self {
        missing.sort();
        Self::InvalidParams {
            operation_id: operation_id.into(),
            missing,
        }
    }

    /// Creates an unknown operation error.
    pub fn unknown_operation(operation_id: impl Into<String>) -> Self {
        Self::UnknownOperation {
            operation_id: operation_id.into(),
        }
    }

    /// Creates a risk rejection.
    pub fn risk_rejected(reason: impl Into<String>) -> Self {
        Self::RiskRejected {
            reason: reason.into(),
        }
    }

    /// Returns true for a 401 response.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Api {
                status_code: 401,
                ..
            }
        )
    }

    /// Returns true if the failure is worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Api { status_code, .. } => *status_code >= 500 || *status_code == 429,
            _ => false,
        }
    }

    /// Returns true if the failure happened before any request was sent.
    #[must_use]
    pub fn is_pre_flight(&self) -> bool {
        matches!(
            self,
            Self::UnknownOperation { .. }
                | Self::InvalidParams { .. }
                | Self::InvalidOrder(_)
                | Self::RiskRejected { .. }
        )
    }
}

impl From<reqwest::Error> for KiwoomError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for KiwoomError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ApprovalError> for KiwoomError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::NotFound { id } => Self::ApprovalNotFound { id },
            ApprovalError::Expired { id } => Self::ApprovalExpired { id },
            ApprovalError::InvalidModification { .. } => Self::InvalidOrder(err.to_string()),
        }
    }
}

/// Result type alias for Kiwoom operations.
pub type Result<T> = std::result::Result<T, KiwoomError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Construction Tests ====================

    #[test]
    fn test_invalid_params_sorted_and_displayed() {
        let err = KiwoomError::invalid_params("kt10000", vec!["stk_cd".into(), "ord_qty".into()]);
        match &err {
            KiwoomError::InvalidParams { missing, .. } => {
                assert_eq!(missing, &vec!["ord_qty".to_string(), "stk_cd".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("missing ord_qty, stk_cd"));
    }

    #[test]
    fn test_request_failed_display() {
        let err = KiwoomError::RequestFailed {
            operation_id: "ka10001".to_string(),
            endpoint: "https://mockapi.kiwoom.com/api/dostk/stkinfo".to_string(),
            last_error: "API error: 503 - unavailable".to_string(),
            attempts: 3,
        };
        let display = err.to_string();
        assert!(display.contains("ka10001"));
        assert!(display.contains("3 attempt"));
        assert!(display.contains("503"));
    }

    #[test]
    fn test_approval_errors_convert() {
        let id = Uuid::new_v4();
        assert!(matches!(
            KiwoomError::from(ApprovalError::not_found(id)),
            KiwoomError::ApprovalNotFound { id: got } if got == id
        ));
        assert!(matches!(
            KiwoomError::from(ApprovalError::expired(id)),
            KiwoomError::ApprovalExpired { .. }
        ));
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_server_errors_are_transient() {
        assert!(KiwoomError::api(500, "internal").is_transient());
        assert!(KiwoomError::api(503, "unavailable").is_transient());
        assert!(KiwoomError::api(429, "slow down").is_transient());
        assert!(KiwoomError::Network("reset".to_string()).is_transient());
        assert!(KiwoomError::Timeout("30s".to_string()).is_transient());
    }

    #[test]
    fn test_client_errors_are_not_transient() {
        assert!(!KiwoomError::api(400, "bad request").is_transient());
        assert!(!KiwoomError::api(401, "unauthorized").is_transient());
        assert!(!KiwoomError::Authentication("bad key".to_string()).is_transient());
        assert!(!KiwoomError::risk_rejected("daily order limit exceeded").is_transient());
    }

    #[test]
    fn test_auth_failure_detection() {
        assert!(KiwoomError::api(401, "expired token").is_auth_failure());
        assert!(!KiwoomError::api(403, "forbidden").is_auth_failure());
    }

    #[test]
    fn test_pre_flight_errors() {
        assert!(KiwoomError::unknown_operation("zz99999").is_pre_flight());
        assert!(KiwoomError::risk_rejected("order amount limit exceeded").is_pre_flight());
        assert!(!KiwoomError::api(500, "boom").is_pre_flight());
    }
}
