//! Errors raised while resolving approvals.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    /// No pending approval exists for this id (unknown or already resolved).
    #[error("approval not found: {id}")]
    NotFound { id: Uuid },

    /// The approval timed out before it was resolved.
    #[error("approval expired: {id}")]
    Expired { id: Uuid },

    /// A modification was supplied for a checkpoint that does not allow one.
    #[error("invalid modification for {id}: {message}")]
    InvalidModification { id: Uuid, message: String },
}

impl ApprovalError {
    pub fn not_found(id: Uuid) -> Self {
        Self::NotFound { id }
    }

    pub fn expired(id: Uuid) -> Self {
        Self::Expired { id }
    }

    /// Returns the approval id the error refers to.
    #[must_use]
    pub fn id(&self) -> Uuid {
        match self {
            Self::NotFound { id } | Self::Expired { id } | Self::InvalidModification { id, .. } => {
                *id
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ApprovalError>;
