use crate::domain::{Bill, Currency, Money, Settlement, User, UserId};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::EngineError;

/// One side of the ledger for a user: the magnitude they owe or are owed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub user_id: UserId,
    pub amount: Money,
}

/// Net balance per user in one currency.
///
/// Sign convention: positive = net debtor (owes money), negative = net
/// creditor (is owed money). Only unpaid shares contribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSheet {
    pub currency: Currency,
    pub balances: BTreeMap<UserId, Money>,
}

impl BalanceSheet {
    /// Empty sheet with every known user at zero.
    pub fn new(currency: Currency, users: &[User]) -> Self {
        Self {
            currency,
            balances: users.iter().map(|u| (u.id.clone(), Money::ZERO)).collect(),
        }
    }

    /// Accumulate unpaid shares of `bills` into a fresh sheet.
    ///
    /// # Errors
    /// Rejects any bill in a different currency, with a negative share, or
    /// whose shares do not add up to its total.
    pub fn build<'a, I>(currency: Currency, bills: I, users: &[User]) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = &'a Bill>,
    {
        let mut sheet = Self::new(currency, users);
        for bill in bills {
            sheet.add_bill(bill)?;
        }
        Ok(sheet)
    }

    fn add_bill(&mut self, bill: &Bill) -> Result<(), EngineError> {
        if bill.currency != self.currency {
            return Err(EngineError::CurrencyMismatch {
                bill_id: bill.id.clone(),
                expected: self.currency,
                found: bill.currency,
            });
        }
        if let Some(share) = bill.shares.iter().find(|s| s.amount.is_negative()) {
            return Err(EngineError::NegativeShare {
                bill_id: bill.id.clone(),
                user_id: share.user_id.clone(),
            });
        }
        let shares_sum = bill.shares_sum().ok_or_else(|| EngineError::AmountOverflow {
            bill_id: bill.id.clone(),
        })?;
        if shares_sum != bill.total_amount {
            return Err(EngineError::InputInconsistency {
                bill_id: bill.id.clone(),
                total: bill.total_amount,
                shares_sum,
            });
        }
        if bill.created_by.is_system() {
            debug!(bill_id = %bill.id, "Skipping system-generated bill with no creditor");
            return Ok(());
        }

        for share in bill.unpaid_shares() {
            if share.user_id == bill.created_by {
                continue;
            }
            let debtor = self.balance(&share.user_id).checked_add(share.amount);
            let creditor = self.balance(&bill.created_by).checked_sub(share.amount);
            let (Some(debtor), Some(creditor)) = (debtor, creditor) else {
                return Err(EngineError::AmountOverflow {
                    bill_id: bill.id.clone(),
                });
            };
            self.balances.insert(share.user_id.clone(), debtor);
            self.balances.insert(bill.created_by.clone(), creditor);
        }

        // Totals over the sheet must stay in range too.
        let owed = self.balances.values().copied().filter(|b| b.is_positive());
        if Money::checked_sum(owed).is_none() {
            return Err(EngineError::AmountOverflow {
                bill_id: bill.id.clone(),
            });
        }
        Ok(())
    }

    pub fn balance(&self, user: &UserId) -> Money {
        self.balances.get(user).copied().unwrap_or_default()
    }

    /// Net debtors, largest first; ties broken by user id ascending.
    pub fn debtors(&self) -> Vec<Position> {
        rank(
            self.balances
                .iter()
                .filter(|(_, b)| b.is_positive())
                .map(|(u, b)| Position {
                    user_id: u.clone(),
                    amount: *b,
                })
                .collect(),
        )
    }

    /// Net creditors as absolute amounts, largest first; ties broken by user id ascending.
    pub fn creditors(&self) -> Vec<Position> {
        rank(
            self.balances
                .iter()
                .filter(|(_, b)| b.is_negative())
                .map(|(u, b)| Position {
                    user_id: u.clone(),
                    amount: b.abs(),
                })
                .collect(),
        )
    }

    /// Sum of all positive balances.
    pub fn total_owed(&self) -> Money {
        self.balances.values().filter(|b| b.is_positive()).sum()
    }

    /// Sum of all negative balances, as a magnitude.
    pub fn total_receivable(&self) -> Money {
        self.balances
            .values()
            .filter(|b| b.is_negative())
            .map(|b| b.abs())
            .sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total_owed() == self.total_receivable()
    }

    pub fn is_settled(&self) -> bool {
        self.balances.values().all(|b| b.is_zero())
    }

    /// Record a payment: the payer's debt shrinks, the payee's claim shrinks.
    pub fn apply(&mut self, settlement: &Settlement) {
        *self.balances.entry(settlement.from_user.clone()).or_default() -= settlement.amount;
        *self.balances.entry(settlement.to_user.clone()).or_default() += settlement.amount;
    }
}

pub(crate) fn rank(mut positions: Vec<Position>) -> Vec<Position> {
    positions.sort_by(|a, b| {
        b.amount
            .cmp(&a.amount)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BillId, BillShare, BillStatus, TimeMs};

    fn bill(id: &str, creator: &str, shares: &[(&str, i64, bool)]) -> Bill {
        let shares: Vec<BillShare> = shares
            .iter()
            .map(|(u, a, p)| BillShare {
                user_id: UserId::new(*u),
                amount: Money::from_minor(*a),
                paid: *p,
            })
            .collect();
        Bill {
            id: BillId::new(id),
            title: id.to_string(),
            description: None,
            total_amount: Money::checked_sum(shares.iter().map(|s| s.amount)).unwrap_or_default(),
            currency: Currency::Cny,
            created_by: UserId::new(creator),
            created_at: TimeMs::new(0),
            status: BillStatus::Pending,
            shares,
            revision: 0,
        }
    }

    #[test]
    fn test_unpaid_shares_shift_balance_to_creator() {
        let users = vec![User::new("a", "A"), User::new("b", "B"), User::new("c", "C")];
        let bills = vec![bill("1", "a", &[("a", 100, true), ("b", 100, false), ("c", 100, false)])];
        let sheet = BalanceSheet::build(Currency::Cny, &bills, &users).unwrap();

        assert_eq!(sheet.balance(&UserId::new("a")), Money::from_minor(-200));
        assert_eq!(sheet.balance(&UserId::new("b")), Money::from_minor(100));
        assert_eq!(sheet.balance(&UserId::new("c")), Money::from_minor(100));
        assert!(sheet.is_balanced());
    }

    #[test]
    fn test_paid_shares_are_ignored() {
        let users = vec![User::new("a", "A"), User::new("b", "B")];
        let bills = vec![bill("1", "a", &[("b", 100, true)])];
        let sheet = BalanceSheet::build(Currency::Cny, &bills, &users).unwrap();
        assert!(sheet.is_settled());
    }

    #[test]
    fn test_inconsistent_bill_is_rejected_with_its_id() {
        let users = vec![User::new("a", "A"), User::new("b", "B")];
        let mut broken = bill("broken", "a", &[("b", 100, false)]);
        broken.total_amount = Money::from_minor(120);
        let err = BalanceSheet::build(Currency::Cny, &[broken], &users).unwrap_err();
        match err {
            EngineError::InputInconsistency {
                bill_id,
                total,
                shares_sum,
            } => {
                assert_eq!(bill_id.as_str(), "broken");
                assert_eq!(total, Money::from_minor(120));
                assert_eq!(shares_sum, Money::from_minor(100));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_overflowing_shares_are_rejected_not_wrapped() {
        let mut wrapped = bill("wrap", "a", &[("b", i64::MAX, false), ("c", i64::MAX, false)]);
        wrapped.total_amount = Money::from_minor(-2);
        let err = BalanceSheet::build(Currency::Cny, &[wrapped], &[]).unwrap_err();
        assert_eq!(
            err,
            EngineError::AmountOverflow {
                bill_id: BillId::new("wrap")
            }
        );
    }

    #[test]
    fn test_balances_overflowing_across_bills_are_rejected() {
        let bills = vec![
            bill("1", "a", &[("b", i64::MAX, false)]),
            bill("2", "c", &[("b", 1, false)]),
        ];
        let err = BalanceSheet::build(Currency::Cny, &bills, &[]).unwrap_err();
        assert_eq!(err.bill_id(), Some(&BillId::new("2")));
        assert!(matches!(err, EngineError::AmountOverflow { .. }));
    }

    #[test]
    fn test_currency_mismatch_is_rejected() {
        let mut jpy = bill("j", "a", &[("b", 5, false)]);
        jpy.currency = Currency::Jpy;
        let err = BalanceSheet::build(Currency::Cny, &[jpy], &[]).unwrap_err();
        assert!(matches!(err, EngineError::CurrencyMismatch { .. }));
    }

    #[test]
    fn test_system_bill_contributes_nothing() {
        let system = bill("s", "", &[("b", 50, false)]);
        let sheet = BalanceSheet::build(Currency::Cny, &[system], &[]).unwrap();
        assert!(sheet.is_settled());
    }

    #[test]
    fn test_ranking_ties_break_on_user_id() {
        let users = vec![User::new("x", "X"), User::new("b", "B"), User::new("m", "M")];
        let bills = vec![bill("1", "x", &[("m", 40, false), ("b", 40, false)])];
        let sheet = BalanceSheet::build(Currency::Cny, &bills, &users).unwrap();
        let debtors_owned = sheet.debtors();
        let debtors: Vec<&str> = debtors_owned.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(debtors, vec!["b", "m"]);
        assert_eq!(sheet.creditors()[0].amount, Money::from_minor(80));
    }
}
