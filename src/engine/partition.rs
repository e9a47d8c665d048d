//! Grouping of bills into independent per-currency sub-problems.

use crate::domain::{Bill, BillStatus, Currency};
use std::collections::BTreeMap;

/// Which bill statuses feed the settlement report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettlementScope {
    /// Only bills actively awaiting payment.
    #[default]
    Pending,
    /// Also count unpaid shares left on completed bills.
    PendingAndCompleted,
}

impl SettlementScope {
    pub fn statuses(&self) -> &'static [BillStatus] {
        match self {
            SettlementScope::Pending => &[BillStatus::Pending],
            SettlementScope::PendingAndCompleted => &[BillStatus::Pending, BillStatus::Completed],
        }
    }
}

/// Group bills whose status is in `statuses` by currency.
///
/// Iteration order of the result follows the declared currency order, and
/// bills keep their input order within a group.
pub fn partition_by_currency<'a>(
    bills: &'a [Bill],
    statuses: &[BillStatus],
) -> BTreeMap<Currency, Vec<&'a Bill>> {
    let mut groups: BTreeMap<Currency, Vec<&Bill>> = BTreeMap::new();
    for bill in bills.iter().filter(|b| statuses.contains(&b.status)) {
        groups.entry(bill.currency).or_default().push(bill);
    }
    groups
}
