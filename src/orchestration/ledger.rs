use crate::config::Config;
use crate::domain::{Bill, BillId, BillStatus, NewBill, Settlement, User, UserId};
use crate::engine::{partition_by_currency, BalanceSheet, SettlementCalculator, SettlementScope};
use crate::error::LedgerError;
use crate::repository::LedgerRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const UNKNOWN_USER: &str = "unknown user";

/// Status change requested by [`Ledger::batch_update_bills`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    MarkPending,
    MarkCompleted,
}

impl BatchAction {
    fn target(&self) -> BillStatus {
        match self {
            BatchAction::MarkPending => BillStatus::Pending,
            BatchAction::MarkCompleted => BillStatus::Completed,
        }
    }
}

/// A user's view over the bill list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillView {
    /// Bills the user created or has a share in.
    All,
    /// Bills where the user still owes someone else.
    ToPay,
    /// Bills the user created that still have an unpaid share.
    ToReceive,
}

impl BillView {
    fn matches(&self, bill: &Bill, user: &UserId) -> bool {
        match self {
            BillView::All => bill.involves(user),
            BillView::ToPay => {
                &bill.created_by != user
                    && bill.unpaid_shares().any(|s| &s.user_id == user)
            }
            BillView::ToReceive => {
                &bill.created_by == user && bill.unpaid_shares().next().is_some()
            }
        }
    }

    /// The looser filter applied to batch updates.
    fn admits_batch(&self, bill: &Bill, user: &UserId) -> bool {
        match self {
            BillView::All => true,
            BillView::ToPay => bill.unpaid_shares().any(|s| &s.user_id == user),
            BillView::ToReceive => &bill.created_by == user,
        }
    }
}

/// Settlement, merge and bill bookkeeping over a [`LedgerRepository`].
///
/// Settlement reads are lock-free. Merges are serialized in-process and
/// guarded by revision checks in the repository.
#[derive(Debug)]
pub struct Ledger {
    pub(super) repo: Arc<dyn LedgerRepository>,
    scope: SettlementScope,
    pub(super) merge_timeout: Duration,
    pub(super) merge_max_attempts: u32,
    pub(super) merge_lock: Mutex<()>,
}

impl Ledger {
    pub const DEFAULT_MERGE_TIMEOUT: Duration = Duration::from_millis(5000);
    pub const DEFAULT_MERGE_MAX_ATTEMPTS: u32 = 3;

    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self {
            repo,
            scope: SettlementScope::default(),
            merge_timeout: Self::DEFAULT_MERGE_TIMEOUT,
            merge_max_attempts: Self::DEFAULT_MERGE_MAX_ATTEMPTS,
            merge_lock: Mutex::new(()),
        }
    }

    pub fn from_config(repo: Arc<dyn LedgerRepository>, config: &Config) -> Self {
        Self::new(repo)
            .with_scope(config.settlement_scope)
            .with_merge_timeout(Duration::from_millis(config.merge_timeout_ms))
            .with_merge_max_attempts(config.merge_max_attempts)
    }

    pub fn with_scope(mut self, scope: SettlementScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_merge_timeout(mut self, timeout: Duration) -> Self {
        self.merge_timeout = timeout;
        self
    }

    pub fn with_merge_max_attempts(mut self, attempts: u32) -> Self {
        self.merge_max_attempts = attempts.max(1);
        self
    }

    pub fn scope(&self) -> SettlementScope {
        self.scope
    }

    // ---- reports ----

    /// Suggested payments that clear every balance, currency by currency.
    ///
    /// # Errors
    /// `Engine(InputInconsistency)` naming the first bill whose shares do not
    /// sum to its total.
    pub async fn settlements(&self) -> Result<Vec<Settlement>, LedgerError> {
        let users = self.repo.list_users().await?;
        let bills = self.repo.list_bills(self.scope.statuses()).await?;

        let settlements = SettlementCalculator::compute_with_scope(&bills, &users, self.scope)
            .map_err(|e| {
                warn!(bill_id = ?e.bill_id(), error = %e, "Settlement rejected");
                e
            })?;

        debug!(
            bills = bills.len(),
            settlements = settlements.len(),
            "Settlements computed"
        );
        Ok(settlements)
    }

    /// Net balance of every user, one sheet per currency with open bills.
    pub async fn balances(&self) -> Result<Vec<BalanceSheet>, LedgerError> {
        let users = self.repo.list_users().await?;
        let bills = self.repo.list_bills(self.scope.statuses()).await?;

        let mut sheets = Vec::new();
        for (currency, group) in partition_by_currency(&bills, self.scope.statuses()) {
            sheets.push(BalanceSheet::build(currency, group, &users)?);
        }
        Ok(sheets)
    }

    // ---- users ----

    pub async fn register_user(&self, name: &str) -> Result<User, LedgerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::Validation(
                "user name must not be empty".to_string(),
            ));
        }
        let user = self.repo.create_user(name).await?;
        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    pub async fn users(&self) -> Result<Vec<User>, LedgerError> {
        Ok(self.repo.list_users().await?)
    }

    /// Display name for `id`; `"unknown user"` if nobody is registered under it.
    pub async fn user_name(&self, id: &UserId) -> Result<String, LedgerError> {
        let users = self.repo.list_users().await?;
        Ok(users
            .into_iter()
            .find(|u| &u.id == id)
            .map(|u| u.name)
            .unwrap_or_else(|| UNKNOWN_USER.to_string()))
    }

    // ---- bills ----

    /// Record a new bill.
    ///
    /// If every share amount is zero the total is split evenly over the
    /// listed participants. The creator's own share is always marked paid.
    ///
    /// # Errors
    /// `Validation` if the bill is malformed or its shares do not sum to the
    /// total.
    pub async fn add_bill(&self, mut bill: NewBill) -> Result<Bill, LedgerError> {
        if bill.title.trim().is_empty() {
            return Err(LedgerError::Validation("bill title must not be empty".to_string()));
        }
        if bill.shares.is_empty() {
            return Err(LedgerError::Validation(
                "bill must have at least one share".to_string(),
            ));
        }
        if bill.total_amount.is_negative() || bill.shares.iter().any(|s| s.amount.is_negative()) {
            return Err(LedgerError::Validation(
                "amounts must not be negative".to_string(),
            ));
        }
        if !matches!(bill.status, BillStatus::Unpaid | BillStatus::Pending) {
            return Err(LedgerError::Validation(format!(
                "new bills start unpaid or pending, not {}",
                bill.status
            )));
        }

        if bill.shares.iter().all(|s| s.amount.is_zero()) {
            let participants: Vec<UserId> =
                bill.shares.iter().map(|s| s.user_id.clone()).collect();
            bill.shares = NewBill::split_evenly(
                bill.title.clone(),
                bill.total_amount,
                bill.currency,
                bill.created_by.clone(),
                &participants,
            )
            .shares;
        }
        bill.mark_creator_paid();

        match bill.shares_sum() {
            Some(sum) if sum == bill.total_amount => {}
            Some(sum) => {
                return Err(LedgerError::Validation(format!(
                    "shares sum to {} but total is {}",
                    sum, bill.total_amount
                )));
            }
            None => {
                return Err(LedgerError::Validation(
                    "share amounts overflow".to_string(),
                ));
            }
        }

        let created = self.repo.create_bill(bill).await?;
        info!(
            bill_id = %created.id,
            currency = %created.currency,
            total = %created.total_amount,
            "Bill created"
        );
        Ok(created)
    }

    /// # Errors
    /// `NotFound` if no such bill exists.
    pub async fn bill(&self, id: &BillId) -> Result<Bill, LedgerError> {
        self.repo
            .get_bill(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("bill {}", id)))
    }

    pub async fn mark_bill_pending(&self, id: &BillId) -> Result<Bill, LedgerError> {
        self.transition(id, BillStatus::Pending).await
    }

    pub async fn mark_bill_completed(&self, id: &BillId) -> Result<Bill, LedgerError> {
        self.transition(id, BillStatus::Completed).await
    }

    /// Mark `user`'s share of a bill as paid.
    ///
    /// # Errors
    /// `Validation` if the bill is already completed or merged, `NotFound`
    /// if the bill or the share does not exist.
    pub async fn mark_share_paid(&self, bill_id: &BillId, user: &UserId) -> Result<Bill, LedgerError> {
        let bill = self.bill(bill_id).await?;
        if bill.status.is_terminal() {
            return Err(LedgerError::Validation(format!(
                "bill {} is {}; its shares are frozen",
                bill_id, bill.status
            )));
        }
        if !bill.shares.iter().any(|s| &s.user_id == user) {
            return Err(LedgerError::NotFound(format!(
                "share of {} in bill {}",
                user, bill_id
            )));
        }

        let shares = bill
            .shares
            .into_iter()
            .map(|mut s| {
                if &s.user_id == user {
                    s.paid = true;
                }
                s
            })
            .collect();
        let updated = self.repo.update_bill_shares(bill_id, shares).await?;
        debug!(bill_id = %bill_id, user_id = %user, "Share marked paid");
        Ok(updated)
    }

    /// Apply `action` to each bill in `ids`.
    ///
    /// Unknown and merged bills are skipped, as are bills rejected by the
    /// optional `(user, view)` filter or whose status cannot make the move.
    /// Returns the bills actually updated.
    pub async fn batch_update_bills(
        &self,
        ids: &[BillId],
        action: BatchAction,
        filter: Option<(&UserId, BillView)>,
    ) -> Result<Vec<Bill>, LedgerError> {
        let target = action.target();
        let mut updated = Vec::new();

        for id in ids {
            let Some(bill) = self.repo.get_bill(id).await? else {
                debug!(bill_id = %id, "Batch update: unknown bill");
                continue;
            };
            if bill.status == BillStatus::Merged {
                debug!(bill_id = %id, "Batch update: skipping merged bill");
                continue;
            }
            if let Some((user, view)) = filter {
                if !view.admits_batch(&bill, user) {
                    continue;
                }
            }
            if !bill.status.can_transition_to(target) {
                debug!(bill_id = %id, from = %bill.status, to = %target, "Batch update: transition not allowed");
                continue;
            }
            updated.push(self.repo.update_bill_status(id, target).await?);
        }

        info!(requested = ids.len(), updated = updated.len(), to = %target, "Batch update applied");
        Ok(updated)
    }

    /// Every bill matching `view` for `user`, oldest first.
    pub async fn bills_by_user(&self, user: &UserId, view: BillView) -> Result<Vec<Bill>, LedgerError> {
        let bills = self.repo.list_bills(&[]).await?;
        Ok(bills.into_iter().filter(|b| view.matches(b, user)).collect())
    }

    /// # Errors
    /// `NotFound` if no such bill exists.
    pub async fn delete_bill(&self, id: &BillId) -> Result<(), LedgerError> {
        if !self.repo.delete_bill(id).await? {
            return Err(LedgerError::NotFound(format!("bill {}", id)));
        }
        info!(bill_id = %id, "Bill deleted");
        Ok(())
    }

    /// Delete each bill in `ids`; true if every one of them existed.
    pub async fn delete_bills(&self, ids: &[BillId]) -> Result<bool, LedgerError> {
        let mut all_deleted = true;
        for id in ids {
            if !self.repo.delete_bill(id).await? {
                warn!(bill_id = %id, "Delete skipped: unknown bill");
                all_deleted = false;
            }
        }
        Ok(all_deleted)
    }

    async fn transition(&self, id: &BillId, to: BillStatus) -> Result<Bill, LedgerError> {
        let bill = self.bill(id).await?;
        if !bill.status.can_transition_to(to) {
            return Err(LedgerError::InvalidTransition {
                bill_id: id.clone(),
                from: bill.status,
                to,
            });
        }
        let updated = self.repo.update_bill_status(id, to).await?;
        info!(bill_id = %id, from = %bill.status, to = %to, "Bill status changed");
        Ok(updated)
    }
}
