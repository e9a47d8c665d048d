//! Repository contract the ledger core reads from and writes to.

use crate::domain::{Bill, BillId, BillShare, BillStatus, Money, NewBill, User, UserId};
use crate::engine::MergePlan;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryRepository;

/// Persistence contract for users and bills.
///
/// Implementations must make [`LedgerRepository::commit_merge`] atomic:
/// either every merged bill is created and every original transitioned, or
/// nothing changes.
#[async_trait]
pub trait LedgerRepository: Send + Sync + fmt::Debug {
    /// All registered users, ordered by id.
    async fn list_users(&self) -> Result<Vec<User>, RepositoryError>;

    /// Register a user under a freshly assigned id.
    async fn create_user(&self, name: &str) -> Result<User, RepositoryError>;

    /// Bills whose status is in `statuses`; every bill when `statuses` is empty.
    ///
    /// Ordered by `(created_at, id)`.
    async fn list_bills(&self, statuses: &[BillStatus]) -> Result<Vec<Bill>, RepositoryError>;

    async fn get_bill(&self, id: &BillId) -> Result<Option<Bill>, RepositoryError>;

    /// Persist a new bill, assigning `id` and `created_at`.
    ///
    /// # Errors
    /// `InvalidRecord` if the shares do not sum to the total.
    async fn create_bill(&self, bill: NewBill) -> Result<Bill, RepositoryError>;

    async fn update_bill_status(
        &self,
        id: &BillId,
        status: BillStatus,
    ) -> Result<Bill, RepositoryError>;

    /// Replace a bill's shares.
    ///
    /// # Errors
    /// `InvalidRecord` if the new shares do not sum to the bill's total.
    async fn update_bill_shares(
        &self,
        id: &BillId,
        shares: Vec<BillShare>,
    ) -> Result<Bill, RepositoryError>;

    /// Returns false if no such bill existed.
    async fn delete_bill(&self, id: &BillId) -> Result<bool, RepositoryError>;

    /// Apply a merge plan in one transaction.
    ///
    /// Every original in the plan must still be `Pending` at the revision the
    /// plan observed; otherwise nothing is written and `Conflict` is returned.
    /// Returns the created bills in plan order.
    async fn commit_merge(&self, plan: &MergePlan) -> Result<Vec<Bill>, RepositoryError>;
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    /// The record changed between read and write.
    #[error("bill {bill_id} was modified concurrently")]
    Conflict { bill_id: BillId },
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub(crate) fn check_shares(total: Money, shares: &[BillShare]) -> Result<(), RepositoryError> {
    if total.is_negative() {
        return Err(RepositoryError::InvalidRecord(format!(
            "total {} must not be negative",
            total
        )));
    }
    if shares.iter().any(|s| s.amount.is_negative()) {
        return Err(RepositoryError::InvalidRecord(
            "share amounts must not be negative".to_string(),
        ));
    }
    let sum = Money::checked_sum(shares.iter().map(|s| s.amount))
        .ok_or_else(|| RepositoryError::InvalidRecord("share amounts overflow".to_string()))?;
    if sum != total {
        return Err(RepositoryError::InvalidRecord(format!(
            "shares sum to {} but total is {}",
            sum, total
        )));
    }
    Ok(())
}

pub(crate) fn new_user_id() -> UserId {
    UserId::new(uuid::Uuid::new_v4().to_string())
}
