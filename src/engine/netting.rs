//! Bill netting: consolidate outstanding shares into one bill per creditor.
//!
//! Planning is pure. The resulting [`MergePlan`] is handed to the repository,
//! which applies it in a single transaction.

use crate::domain::{Bill, BillId, BillShare, BillStatus, Currency, Money, NewBill, User, UserId};
use serde::Serialize;
use tracing::debug;

use super::partition::partition_by_currency;
use super::{BalanceSheet, EngineError, Position};

/// Identity plus the revision observed when the plan was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillRef {
    pub id: BillId,
    pub revision: i64,
}

impl From<&Bill> for BillRef {
    fn from(bill: &Bill) -> Self {
        BillRef {
            id: bill.id.clone(),
            revision: bill.revision,
        }
    }
}

/// The planned merge for one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyMerge {
    pub currency: Currency,
    /// One replacement bill per creditor with a non-empty allocation.
    pub merged_bills: Vec<NewBill>,
    /// Originals with unpaid shares; they become `Merged`.
    pub retired: Vec<BillRef>,
    /// Originals whose shares are all paid; they become `Completed`.
    pub completed: Vec<BillRef>,
}

impl CurrencyMerge {
    /// Total carried by the replacement bills.
    pub fn merged_total(&self) -> Money {
        self.merged_bills.iter().map(|b| b.total_amount).sum()
    }
}

/// Everything a merge will write, across currencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePlan {
    pub groups: Vec<CurrencyMerge>,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every original bill the plan will transition.
    pub fn touched(&self) -> impl Iterator<Item = &BillRef> {
        self.groups
            .iter()
            .flat_map(|g| g.retired.iter().chain(g.completed.iter()))
    }
}

/// Builds merge plans from a snapshot of bills and users.
pub struct NettingPlanner;

impl NettingPlanner {
    /// A currency group needs at least this many pending bills to merge.
    pub const MIN_BILLS: usize = 2;

    /// Plan a merge over every `Pending` bill in `bills`.
    ///
    /// System bills (empty creator) have no creditor to carry their shares,
    /// so they are never retired and stay `Pending`. Currencies with fewer
    /// than [`Self::MIN_BILLS`] mergeable bills are left out of the plan
    /// entirely.
    pub fn plan(bills: &[Bill], users: &[User]) -> Result<MergePlan, EngineError> {
        let mut plan = MergePlan::default();
        for (currency, group) in partition_by_currency(bills, &[BillStatus::Pending]) {
            let mergeable = group.iter().filter(|b| !b.created_by.is_system()).count();
            if mergeable < Self::MIN_BILLS {
                debug!(currency = %currency, bills = mergeable, "Nothing to merge");
                continue;
            }
            plan.groups.push(Self::plan_currency(currency, &group, users)?);
        }
        Ok(plan)
    }

    fn plan_currency(
        currency: Currency,
        group: &[&Bill],
        users: &[User],
    ) -> Result<CurrencyMerge, EngineError> {
        let sheet = BalanceSheet::build(currency, group.iter().copied(), users)?;
        let allocations = Self::allocate(&sheet)?;

        let (completed, retired): (Vec<&Bill>, Vec<&Bill>) = group
            .iter()
            .copied()
            .filter(|b| !b.created_by.is_system())
            .partition(|b| b.all_shares_paid());

        let merged_bills = allocations
            .into_iter()
            .map(|(creditor, shares)| {
                let total: Money = shares.iter().map(|s| s.amount).sum();
                let name = display_name(users, &creditor);
                let own = retired.iter().filter(|b| b.created_by == creditor).count();
                NewBill {
                    title: format!("Merged bill - {} ({})", name, currency),
                    description: Some(format!("Automatically merged {} {} bills", own, currency)),
                    total_amount: total,
                    currency,
                    created_by: creditor,
                    status: BillStatus::Pending,
                    shares,
                }
            })
            .collect();

        Ok(CurrencyMerge {
            currency,
            merged_bills,
            retired: retired.into_iter().map(BillRef::from).collect(),
            completed: completed.into_iter().map(BillRef::from).collect(),
        })
    }

    /// Assign debtors to creditors.
    ///
    /// Creditors are served largest first; each pulls from a shared debtor
    /// pool (largest first) that is consumed across creditors. Creditors with
    /// an empty allocation are skipped.
    ///
    /// # Errors
    /// Returns `BalanceInvariantViolation` if debt or credit remains once
    /// either side is exhausted.
    pub fn allocate(sheet: &BalanceSheet) -> Result<Vec<(UserId, Vec<BillShare>)>, EngineError> {
        let mut debtors: Vec<Position> = sheet.debtors();
        let mut di = 0;
        let mut out = Vec::new();
        let mut unmet = Money::ZERO;

        for creditor in sheet.creditors() {
            let mut remaining = creditor.amount;
            let mut shares = Vec::new();

            while remaining.is_positive() && di < debtors.len() {
                let take = remaining.min(debtors[di].amount);
                if take.is_positive() {
                    shares.push(BillShare::new(debtors[di].user_id.clone(), take));
                }
                remaining -= take;
                debtors[di].amount -= take;
                if debtors[di].amount.is_zero() {
                    di += 1;
                }
            }

            unmet += remaining;
            if !shares.is_empty() {
                out.push((creditor.user_id, shares));
            }
        }

        let leftover = unmet + debtors[di..].iter().map(|p| p.amount).sum::<Money>();
        if !leftover.is_zero() {
            return Err(EngineError::BalanceInvariantViolation {
                currency: sheet.currency,
                leftover,
            });
        }
        Ok(out)
    }
}

fn display_name(users: &[User], id: &UserId) -> String {
    users
        .iter()
        .find(|u| &u.id == id)
        .map(|u| u.name.clone())
        .unwrap_or_else(|| "unknown user".to_string())
}
