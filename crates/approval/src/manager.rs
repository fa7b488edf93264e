//! The approval state machine.
//!
//! ```text
//! pending ──approve──▶ approved ──▶ resumed
//!    │
//!    ├──reject──▶ rejected
//!    └──(expiry observed on access)──▶ expired
//! ```
//!
//! Pending entries live in a sharded map keyed by approval id, so resolving one
//! id never blocks another. Terminal entries move to a bounded history.
//! Expiry is lazy: every lookup checks the deadline first.

use crate::checkpoint::{is_buy_sell, is_trade_checkpoint, CheckpointDefinition};
use crate::error::{ApprovalError, Result};
use crate::types::{
    ApprovalEvent, ApprovalEventKind, ApprovalStatus, Context, InterruptKind, PendingApproval,
    Submission,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::broadcast;
use trade_gate_core::{ApprovalConfig, SharedClock};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone)]
pub struct ApprovalSettings {
    /// Applied when a checkpoint does not set its own timeout. `None` never expires.
    pub default_timeout: Option<Duration>,
    /// Only honour trade-related checkpoints and buy/sell contexts.
    pub trading_only: bool,
    /// Allow checkpoints flagged `auto_resume` to approve themselves.
    pub auto_resume: bool,
    pub history_limit: usize,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            default_timeout: Some(Duration::from_secs(300)),
            trading_only: true,
            auto_resume: false,
            history_limit: 1000,
        }
    }
}

impl From<&ApprovalConfig> for ApprovalSettings {
    fn from(config: &ApprovalConfig) -> Self {
        Self {
            default_timeout: (config.timeout_secs > 0)
                .then(|| Duration::from_secs(config.timeout_secs)),
            trading_only: config.trading_only,
            auto_resume: config.auto_resume,
            history_limit: config.history_limit.max(1),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApprovalStatistics {
    pub pending: usize,
    pub resolved: usize,
    pub by_status: HashMap<ApprovalStatus, usize>,
    pub by_kind: HashMap<InterruptKind, usize>,
    pub average_resolution_secs: Option<f64>,
    pub registered_checkpoints: usize,
}

// =============================================================================
// ApprovalManager
// =============================================================================

pub struct ApprovalManager {
    settings: ApprovalSettings,
    clock: SharedClock,
    checkpoints: RwLock<HashMap<String, CheckpointDefinition>>,
    active: DashMap<Uuid, PendingApproval>,
    history: Mutex<VecDeque<PendingApproval>>,
    events: broadcast::Sender<ApprovalEvent>,
}

impl std::fmt::Debug for ApprovalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalManager")
            .field("settings", &self.settings)
            .field("checkpoints", &self.checkpoints.read().len())
            .field("pending", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl ApprovalManager {
    #[must_use]
    pub fn new(settings: ApprovalSettings, clock: SharedClock) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            clock,
            checkpoints: RwLock::new(HashMap::new()),
            active: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            events,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ApprovalSettings {
        &self.settings
    }

    /// Receives every transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.events.subscribe()
    }

    // -------------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------------

    /// Registers a checkpoint. Returns `false` (and registers nothing) when the
    /// manager is restricted to trade actions and the id is not trade-related.
    pub fn register_checkpoint(&self, definition: CheckpointDefinition) -> bool {
        if self.settings.trading_only && !is_trade_checkpoint(&definition.checkpoint_id, None) {
            tracing::debug!(
                checkpoint_id = %definition.checkpoint_id,
                "Skipping non-trading checkpoint"
            );
            return false;
        }
        self.register_checkpoint_forced(definition);
        true
    }

    /// Registers a checkpoint regardless of the trade-action filter.
    pub fn register_checkpoint_forced(&self, definition: CheckpointDefinition) {
        tracing::info!(checkpoint_id = %definition.checkpoint_id, "Checkpoint registered");
        self.checkpoints
            .write()
            .insert(definition.checkpoint_id.clone(), definition);
    }

    pub fn unregister_checkpoint(&self, checkpoint_id: &str) -> bool {
        self.checkpoints.write().remove(checkpoint_id).is_some()
    }

    #[must_use]
    pub fn checkpoint_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.checkpoints.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    // -------------------------------------------------------------------------
    // Submit
    // -------------------------------------------------------------------------

    /// Offers `context` to the checkpoint and either lets it through or suspends it.
    pub fn submit(
        &self,
        checkpoint_id: &str,
        context: Context,
        thread_id: &str,
        node_name: &str,
    ) -> Submission {
        let Some(definition) = self.checkpoints.read().get(checkpoint_id).cloned() else {
            return Submission::Proceed(context);
        };

        if self.settings.trading_only {
            let mut scoped = context.clone();
            scoped.insert("current_node".to_string(), Value::from(node_name));
            if !is_trade_checkpoint(checkpoint_id, Some(&scoped)) || !is_buy_sell(&context) {
                tracing::debug!(checkpoint_id, thread_id, "Not a buy/sell action, passing through");
                return Submission::Proceed(context);
            }
        }

        if !definition.fires(&context) {
            return Submission::Proceed(context);
        }

        let now = self.clock.now();
        let expires_at = definition
            .timeout
            .or(self.settings.default_timeout)
            .and_then(|timeout| chrono::Duration::from_std(timeout).ok())
            .map(|timeout| now + timeout);

        let approval = PendingApproval {
            id: Uuid::new_v4(),
            checkpoint_id: checkpoint_id.to_string(),
            thread_id: thread_id.to_string(),
            node_name: node_name.to_string(),
            context,
            reason: definition.reason.clone(),
            created_at: now,
            expires_at,
            status: ApprovalStatus::Pending,
            user_input: None,
            modification: None,
            rejection_reason: None,
            resolved_at: None,
        };
        let approval_id = approval.id;

        tracing::info!(
            %approval_id,
            checkpoint_id,
            thread_id,
            priority = ?approval.reason.priority,
            expires_at = ?expires_at,
            "Trade action suspended pending approval"
        );
        self.active.insert(approval_id, approval.clone());
        self.publish(ApprovalEventKind::Suspended, approval);

        if definition.auto_resume && self.settings.auto_resume {
            let mut input = Context::new();
            input.insert("auto_resumed".to_string(), Value::Bool(true));
            match self.approve(approval_id, Some(input)) {
                Ok(merged) => return Submission::Proceed(merged),
                Err(err) => tracing::warn!(%approval_id, error = %err, "Auto-resume failed"),
            }
        }

        Submission::Suspended {
            approval_id,
            reason: definition.reason,
        }
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    /// Approves a pending entry and returns its context merged with `user_input`.
    ///
    /// # Errors
    /// `NotFound` for unknown or resolved ids, `Expired` once the deadline has passed.
    pub fn approve(&self, id: Uuid, user_input: Option<Context>) -> Result<Context> {
        self.resume(id, user_input, None)
    }

    /// Like [`ApprovalManager::approve`], additionally merging `modification` on top.
    ///
    /// # Errors
    /// `NotFound`, `Expired`, or `InvalidModification` when the checkpoint does
    /// not allow modification.
    pub fn resume(
        &self,
        id: Uuid,
        user_input: Option<Context>,
        modification: Option<Context>,
    ) -> Result<Context> {
        let now = self.clock.now();
        if let Some((_, expired)) = self.active.remove_if(&id, |_, a| a.is_expired_at(now)) {
            self.expire(expired, now);
            return Err(ApprovalError::expired(id));
        }

        if modification.is_some() {
            let allowed = self
                .active
                .get(&id)
                .map(|entry| entry.reason.allows_modification);
            if allowed == Some(false) {
                return Err(ApprovalError::InvalidModification {
                    id,
                    message: "checkpoint does not allow modification".to_string(),
                });
            }
        }

        let mut approval = self.take_pending(id, now)?;

        let mut merged = approval.context.clone();
        for layer in [&user_input, &modification].into_iter().flatten() {
            merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        approval.user_input = user_input;
        approval.modification = modification;
        approval.status = ApprovalStatus::Approved;
        self.publish(ApprovalEventKind::Approved, approval.clone());

        approval.status = ApprovalStatus::Resumed;
        approval.resolved_at = Some(now);
        tracing::info!(approval_id = %id, thread_id = %approval.thread_id, "Approval resumed");
        self.publish(ApprovalEventKind::Resumed, approval.clone());
        self.record(approval);

        Ok(merged)
    }

    /// Rejects a pending entry.
    ///
    /// # Errors
    /// `NotFound` for unknown or resolved ids, `Expired` once the deadline has passed.
    pub fn reject(&self, id: Uuid, reason: impl Into<String>) -> Result<()> {
        let now = self.clock.now();
        let mut approval = self.take_pending(id, now)?;
        let reason = reason.into();

        tracing::info!(approval_id = %id, reason = %reason, "Approval rejected");
        approval.status = ApprovalStatus::Rejected;
        approval.rejection_reason = Some(reason);
        approval.resolved_at = Some(now);
        self.publish(ApprovalEventKind::Rejected, approval.clone());
        self.record(approval);
        Ok(())
    }

    /// Looks up a pending entry without resolving it.
    ///
    /// # Errors
    /// `NotFound` or `Expired`, as for [`ApprovalManager::approve`].
    pub fn get(&self, id: Uuid) -> Result<PendingApproval> {
        let now = self.clock.now();
        if let Some((_, expired)) = self.active.remove_if(&id, |_, a| a.is_expired_at(now)) {
            self.expire(expired, now);
            return Err(ApprovalError::expired(id));
        }
        self.active
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ApprovalError::not_found(id))
    }

    /// Removes the entry atomically; concurrent resolutions of the same id see `NotFound`.
    fn take_pending(&self, id: Uuid, now: DateTime<Utc>) -> Result<PendingApproval> {
        let (_, approval) = self
            .active
            .remove(&id)
            .ok_or_else(|| ApprovalError::not_found(id))?;

        if approval.is_expired_at(now) {
            self.expire(approval, now);
            return Err(ApprovalError::expired(id));
        }
        Ok(approval)
    }

    fn expire(&self, mut approval: PendingApproval, now: DateTime<Utc>) {
        tracing::warn!(
            approval_id = %approval.id,
            checkpoint_id = %approval.checkpoint_id,
            "Approval expired"
        );
        approval.status = ApprovalStatus::Expired;
        approval.resolved_at = Some(now);
        self.publish(ApprovalEventKind::Expired, approval.clone());
        self.record(approval);
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Pending entries, oldest first, after expiring any that are overdue.
    #[must_use]
    pub fn list_pending(&self, thread_id: Option<&str>) -> Vec<PendingApproval> {
        self.sweep_expired();

        let mut pending: Vec<PendingApproval> = self
            .active
            .iter()
            .filter(|entry| thread_id.map_or(true, |t| entry.thread_id == t))
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|a| a.created_at);
        pending
    }

    /// Expires every overdue entry. Returns how many were expired.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let overdue: Vec<Uuid> = self
            .active
            .iter()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| *entry.key())
            .collect();

        let mut expired = 0;
        for id in overdue {
            if let Some((_, approval)) = self.active.remove_if(&id, |_, a| a.is_expired_at(now)) {
                self.expire(approval, now);
                expired += 1;
            }
        }
        expired
    }

    /// Resolved entries, oldest first. `limit` keeps the most recent ones.
    #[must_use]
    pub fn history(&self, thread_id: Option<&str>, limit: Option<usize>) -> Vec<PendingApproval> {
        let history = self.history.lock();
        let matching: Vec<PendingApproval> = history
            .iter()
            .filter(|a| thread_id.map_or(true, |t| a.thread_id == t))
            .cloned()
            .collect();

        match limit {
            Some(limit) if matching.len() > limit => matching[matching.len() - limit..].to_vec(),
            _ => matching,
        }
    }

    #[must_use]
    pub fn statistics(&self) -> ApprovalStatistics {
        let mut stats = ApprovalStatistics {
            pending: self.active.len(),
            registered_checkpoints: self.checkpoints.read().len(),
            ..ApprovalStatistics::default()
        };

        for entry in &self.active {
            *stats.by_status.entry(entry.status).or_default() += 1;
            *stats.by_kind.entry(entry.reason.kind).or_default() += 1;
        }

        let history = self.history.lock();
        stats.resolved = history.len();
        let mut total_secs = 0.0;
        let mut timed = 0usize;
        for approval in history.iter() {
            *stats.by_status.entry(approval.status).or_default() += 1;
            *stats.by_kind.entry(approval.reason.kind).or_default() += 1;
            if let Some(secs) = approval.resolution_secs() {
                total_secs += secs;
                timed += 1;
            }
        }
        if timed > 0 {
            stats.average_resolution_secs = Some(total_secs / timed as f64);
        }
        stats
    }

    fn record(&self, approval: PendingApproval) {
        let mut history = self.history.lock();
        history.push_back(approval);
        while history.len() > self.settings.history_limit {
            history.pop_front();
        }
    }

    fn publish(&self, kind: ApprovalEventKind, approval: PendingApproval) {
        // Send only fails when nobody is subscribed.
        let _ = self.events.send(ApprovalEvent { kind, approval });
    }
}
