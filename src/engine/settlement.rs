//! Greedy debt settlement per currency.
//!
//! The largest debtor pays the largest creditor until one side is exhausted.
//! Every step retires at least one side, so the result terminates with at
//! most `#debtors + #creditors - 1` payments per currency. It is not
//! guaranteed to be the global minimum number of payments; that problem is
//! NP-hard in general.

use crate::domain::{Bill, Money, Settlement, User};
use tracing::debug;

use super::partition::{partition_by_currency, SettlementScope};
use super::{BalanceSheet, EngineError};

/// Pure settlement calculator; no I/O and no shared state.
pub struct SettlementCalculator;

impl SettlementCalculator {
    /// Compute settlements over `Pending` bills, all currencies combined.
    pub fn compute(bills: &[Bill], users: &[User]) -> Result<Vec<Settlement>, EngineError> {
        Self::compute_with_scope(bills, users, SettlementScope::Pending)
    }

    /// Compute settlements over bills selected by `scope`.
    ///
    /// Currencies are solved independently and concatenated in declared
    /// currency order.
    pub fn compute_with_scope(
        bills: &[Bill],
        users: &[User],
        scope: SettlementScope,
    ) -> Result<Vec<Settlement>, EngineError> {
        let mut out = Vec::new();
        for (currency, group) in partition_by_currency(bills, scope.statuses()) {
            let sheet = BalanceSheet::build(currency, group, users)?;
            out.extend(Self::settle_sheet(&sheet)?);
        }
        Ok(out)
    }

    /// Greedy two-pointer match over one currency's balance sheet.
    ///
    /// # Errors
    /// Returns `BalanceInvariantViolation` if either side has a remainder
    /// once the other is exhausted.
    pub fn settle_sheet(sheet: &BalanceSheet) -> Result<Vec<Settlement>, EngineError> {
        let mut debtors = sheet.debtors();
        let mut creditors = sheet.creditors();
        let mut settlements = Vec::new();

        let (mut di, mut ci) = (0, 0);
        while di < debtors.len() && ci < creditors.len() {
            let amount = debtors[di].amount.min(creditors[ci].amount);
            if amount.is_positive() {
                settlements.push(Settlement {
                    from_user: debtors[di].user_id.clone(),
                    to_user: creditors[ci].user_id.clone(),
                    amount,
                    currency: sheet.currency,
                });
            }

            debtors[di].amount -= amount;
            creditors[ci].amount -= amount;
            if debtors[di].amount.is_zero() {
                di += 1;
            }
            if creditors[ci].amount.is_zero() {
                ci += 1;
            }
        }

        let leftover: Money = debtors[di..]
            .iter()
            .chain(creditors[ci..].iter())
            .map(|p| p.amount)
            .sum();
        if !leftover.is_zero() {
            return Err(EngineError::BalanceInvariantViolation {
                currency: sheet.currency,
                leftover,
            });
        }

        debug!(
            currency = %sheet.currency,
            settlements = settlements.len(),
            "Computed settlements"
        );
        Ok(settlements)
    }
}
