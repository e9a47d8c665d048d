//! Serialized, all-or-nothing bill merging.

use crate::domain::{Bill, BillId, BillStatus, Currency};
use crate::engine::NettingPlanner;
use crate::error::LedgerError;
use crate::repository::RepositoryError;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::Ledger;

/// What a merge call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    /// New merged bills per currency.
    pub created: BTreeMap<Currency, Vec<Bill>>,
    /// Originals transitioned to `Merged`.
    pub retired: Vec<BillId>,
    /// Fully paid originals transitioned to `Completed`.
    pub completed: Vec<BillId>,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

impl MergeOutcome {
    /// True if the call wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.retired.is_empty() && self.completed.is_empty()
    }

    pub fn created_count(&self) -> usize {
        self.created.values().map(Vec::len).sum()
    }
}

impl Ledger {
    /// Consolidate every currency group of two or more pending bills into
    /// one bill per net creditor.
    ///
    /// Merges are serialized within this `Ledger`. Each attempt reads a
    /// fresh snapshot, plans, and commits in one repository transaction; an
    /// optimistic conflict restarts the attempt. The whole call is bounded by
    /// the merge timeout, and a timed-out call leaves prior state untouched.
    ///
    /// # Errors
    /// - `ConcurrentMergeConflict` once every attempt has hit a conflict
    /// - `MergeTimeout` if the deadline passes
    /// - `Engine` on inconsistent input
    /// - `Repository` on I/O failure, never retried
    pub async fn merge_bills(&self) -> Result<MergeOutcome, LedgerError> {
        let _guard = self.merge_lock.lock().await;
        let timeout_ms = u64::try_from(self.merge_timeout.as_millis()).unwrap_or(u64::MAX);

        match tokio::time::timeout(self.merge_timeout, self.merge_with_retries()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms, "Merge timed out; nothing was committed");
                Err(LedgerError::MergeTimeout { timeout_ms })
            }
        }
    }

    async fn merge_with_retries(&self) -> Result<MergeOutcome, LedgerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.merge_once().await {
                Ok(mut outcome) => {
                    outcome.attempts = attempt;
                    return Ok(outcome);
                }
                Err(LedgerError::Repository(RepositoryError::Conflict { bill_id })) => {
                    if attempt >= self.merge_max_attempts {
                        warn!(bill_id = %bill_id, attempts = attempt, "Merge conflict, giving up");
                        return Err(LedgerError::ConcurrentMergeConflict { bill_id });
                    }
                    warn!(bill_id = %bill_id, attempt, "Merge conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn merge_once(&self) -> Result<MergeOutcome, LedgerError> {
        let users = self.repo.list_users().await?;
        let bills = self.repo.list_bills(&[BillStatus::Pending]).await?;

        let plan = NettingPlanner::plan(&bills, &users)?;
        if plan.is_empty() {
            debug!(pending = bills.len(), "No currency has enough pending bills to merge");
            return Ok(MergeOutcome::default());
        }

        let created = self.repo.commit_merge(&plan).await?;

        let mut outcome = MergeOutcome::default();
        for bill in created {
            outcome.created.entry(bill.currency).or_default().push(bill);
        }
        for group in &plan.groups {
            outcome
                .retired
                .extend(group.retired.iter().map(|r| r.id.clone()));
            outcome
                .completed
                .extend(group.completed.iter().map(|r| r.id.clone()));
        }

        info!(
            created = outcome.created_count(),
            retired = outcome.retired.len(),
            completed = outcome.completed.len(),
            "Bills merged"
        );
        Ok(outcome)
    }
}
