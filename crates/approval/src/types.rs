//! Data model for checkpoints and pending approvals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Key/value context captured at a checkpoint.
pub type Context = Map<String, Value>;

// =============================================================================
// Reason
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    Checkpoint,
    Conditional,
    Manual,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// Human-readable explanation attached to a suspension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalReason {
    pub kind: InterruptKind,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    pub requires_approval: bool,
    pub allows_modification: bool,
    #[serde(default)]
    pub metadata: Context,
}

impl ApprovalReason {
    /// A checkpoint reason requiring approval, with modification allowed.
    pub fn checkpoint(priority: Priority, title: impl Into<String>) -> Self {
        Self {
            kind: InterruptKind::Checkpoint,
            priority,
            title: title.into(),
            description: String::new(),
            requires_approval: true,
            allows_modification: true,
            metadata: Context::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: InterruptKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_modification(mut self, allowed: bool) -> Self {
        self.allows_modification = allowed;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl fmt::Display for ApprovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.title)
        } else {
            write!(f, "{}: {}", self.title, self.description)
        }
    }
}

// =============================================================================
// Pending approval
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Resumed,
}

impl ApprovalStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Expired | Self::Resumed)
    }
}

/// A suspended trade action waiting for a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: Uuid,
    pub checkpoint_id: String,
    pub thread_id: String,
    pub node_name: String,
    pub context: Context,
    pub reason: ApprovalReason,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ApprovalStatus,
    pub user_input: Option<Context>,
    pub modification: Option<Context>,
    pub rejection_reason: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingApproval {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// Seconds from creation to resolution, once resolved.
    #[must_use]
    pub fn resolution_secs(&self) -> Option<f64> {
        self.resolved_at
            .map(|at| (at - self.created_at).num_milliseconds() as f64 / 1000.0)
    }
}

// =============================================================================
// Submission result
// =============================================================================

/// Outcome of submitting a context at a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Continue with this (possibly merged) context.
    Proceed(Context),
    /// Halt the workflow until the approval is resolved.
    Suspended {
        approval_id: Uuid,
        reason: ApprovalReason,
    },
}

impl Submission {
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }

    /// The `{status, id, reason}` envelope for this outcome.
    #[must_use]
    pub fn envelope(&self) -> SubmissionEnvelope {
        match self {
            Self::Proceed(_) => SubmissionEnvelope {
                status: "proceed".to_string(),
                id: None,
                reason: None,
            },
            Self::Suspended {
                approval_id,
                reason,
            } => SubmissionEnvelope {
                status: "suspended".to_string(),
                id: Some(*approval_id),
                reason: Some(reason.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionEnvelope {
    pub status: String,
    pub id: Option<Uuid>,
    pub reason: Option<String>,
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalEventKind {
    Suspended,
    Approved,
    Resumed,
    Rejected,
    Expired,
}

/// Notification published on every approval transition.
#[derive(Debug, Clone)]
pub struct ApprovalEvent {
    pub kind: ApprovalEventKind,
    pub approval: PendingApproval,
}
