//! Pure computation engine(s) for settlement and netting.
//!
//! Nothing in here performs I/O; callers pass in a snapshot of bills and
//! users and get back either settlements or a merge plan.

use crate::domain::{BillId, Currency, Money, UserId};
use thiserror::Error;

pub mod balances;
pub mod netting;
pub mod partition;
pub mod settlement;

pub use balances::{BalanceSheet, Position};
pub use netting::{BillRef, CurrencyMerge, MergePlan, NettingPlanner};
pub use partition::{partition_by_currency, SettlementScope};
pub use settlement::SettlementCalculator;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A bill's shares do not add up to its total. Fatal to the call.
    #[error("bill {bill_id}: shares sum to {shares_sum} but total is {total}")]
    InputInconsistency {
        bill_id: BillId,
        total: Money,
        shares_sum: Money,
    },
    /// Share amounts or running balances left the i64 range.
    #[error("bill {bill_id}: amounts overflow")]
    AmountOverflow { bill_id: BillId },
    #[error("bill {bill_id}: share of {user_id} is negative")]
    NegativeShare { bill_id: BillId, user_id: UserId },
    #[error("bill {bill_id} is in {found}, expected {expected}")]
    CurrencyMismatch {
        bill_id: BillId,
        expected: Currency,
        found: Currency,
    },
    /// Debts and credits did not cancel out. Indicates an internal bug.
    #[error("balance invariant violated in {currency}: {leftover} minor units left over")]
    BalanceInvariantViolation { currency: Currency, leftover: Money },
}

impl EngineError {
    /// The bill the error is tied to, if any.
    pub fn bill_id(&self) -> Option<&BillId> {
        match self {
            EngineError::InputInconsistency { bill_id, .. }
            | EngineError::AmountOverflow { bill_id }
            | EngineError::NegativeShare { bill_id, .. }
            | EngineError::CurrencyMismatch { bill_id, .. } => Some(bill_id),
            EngineError::BalanceInvariantViolation { .. } => None,
        }
    }
}
