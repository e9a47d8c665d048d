use crate::domain::{BillId, BillStatus};
use crate::engine::EngineError;
use crate::repository::RepositoryError;
use thiserror::Error;

/// Errors returned by the [`Ledger`](crate::orchestration::Ledger) service.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Repository failure: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Merge conflict on bill {bill_id}: the bill set changed while merging")]
    ConcurrentMergeConflict { bill_id: BillId },
    #[error("Merge timed out after {timeout_ms}ms")]
    MergeTimeout { timeout_ms: u64 },
    #[error("Bill {bill_id} cannot move from {from} to {to}")]
    InvalidTransition {
        bill_id: BillId,
        from: BillStatus,
        to: BillStatus,
    },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    /// True when re-running the same call from scratch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrentMergeConflict { .. } | LedgerError::MergeTimeout { .. }
        )
    }

    /// The bill this error is tied to, if any.
    pub fn bill_id(&self) -> Option<&BillId> {
        match self {
            LedgerError::Engine(e) => e.bill_id(),
            LedgerError::ConcurrentMergeConflict { bill_id }
            | LedgerError::InvalidTransition { bill_id, .. } => Some(bill_id),
            LedgerError::Repository(RepositoryError::Conflict { bill_id }) => Some(bill_id),
            _ => None,
        }
    }
}
