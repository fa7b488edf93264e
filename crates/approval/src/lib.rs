//! Human-approval checkpoints for trade actions.
//!
//! A checkpoint is a named point in the order flow where a trade can be held
//! until someone approves or rejects it. [`ApprovalManager::submit`] returns
//! [`Submission::Proceed`] when nothing needs to happen, or
//! [`Submission::Suspended`] with the id to resolve later through
//! [`ApprovalManager::approve`], [`ApprovalManager::resume`], or
//! [`ApprovalManager::reject`].
//!
//! # Example
//!
//! ```ignore
//! use trade_gate_approval::{ApprovalManager, ApprovalSettings, ApprovalReason, CheckpointDefinition, Priority, Submission};
//! use trade_gate_core::SystemClock;
//!
//! let approvals = ApprovalManager::new(ApprovalSettings::default(), SystemClock::shared());
//! approvals.register_checkpoint(CheckpointDefinition::new(
//!     "order_submission",
//!     ApprovalReason::checkpoint(Priority::High, "Order approval"),
//! ));
//!
//! match approvals.submit("order_submission", context, "thread-1", "execute_order") {
//!     Submission::Proceed(context) => dispatch(context),
//!     Submission::Suspended { approval_id, reason } => notify(approval_id, reason),
//! }
//! ```
//!
//! # Trade-only mode
//!
//! With `trading_only` set (the default) checkpoints are honoured only for
//! buy/sell actions, and only checkpoints whose id looks trade-related can be
//! registered without [`ApprovalManager::register_checkpoint_forced`].

pub mod checkpoint;
pub mod error;
pub mod manager;
pub mod types;

pub use checkpoint::{is_buy_sell, is_trade_checkpoint, CheckpointDefinition, Trigger, TRADE_CHECKPOINT_PATTERNS};
pub use error::{ApprovalError, Result};
pub use manager::{ApprovalManager, ApprovalSettings, ApprovalStatistics};
pub use types::{
    ApprovalEvent, ApprovalEventKind, ApprovalReason, ApprovalStatus, Context, InterruptKind,
    PendingApproval, Priority, Submission, SubmissionEnvelope,
};
