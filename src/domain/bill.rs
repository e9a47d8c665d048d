//! Bills, their shares, and the bill status state machine.

use crate::domain::{BillId, Currency, Money, TimeMs, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bill lifecycle.
///
/// Only `Pending` bills take part in settlement and merge computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    /// Recorded but not yet activated for settlement.
    Unpaid,
    /// Awaiting payment.
    Pending,
    /// Every share paid, or explicitly closed.
    Completed,
    /// Consumed by the netting engine; frozen.
    Merged,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Unpaid => "unpaid",
            BillStatus::Pending => "pending",
            BillStatus::Completed => "completed",
            BillStatus::Merged => "merged",
        }
    }

    /// Nothing leaves `Completed` or `Merged`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BillStatus::Completed | BillStatus::Merged)
    }

    pub fn can_transition_to(&self, next: BillStatus) -> bool {
        matches!(
            (self, next),
            (BillStatus::Unpaid, BillStatus::Pending)
                | (BillStatus::Pending, BillStatus::Completed)
                | (BillStatus::Pending, BillStatus::Merged)
        )
    }
}

impl fmt::Display for BillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(BillStatus::Unpaid),
            "pending" => Ok(BillStatus::Pending),
            "completed" => Ok(BillStatus::Completed),
            "merged" => Ok(BillStatus::Merged),
            other => Err(format!("unknown bill status: {}", other)),
        }
    }
}

/// One participant's obligation within a bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillShare {
    pub user_id: UserId,
    pub amount: Money,
    pub paid: bool,
}

impl BillShare {
    pub fn new(user_id: UserId, amount: Money) -> Self {
        Self {
            user_id,
            amount,
            paid: false,
        }
    }

    pub fn paid(user_id: UserId, amount: Money) -> Self {
        Self {
            user_id,
            amount,
            paid: true,
        }
    }
}

/// A persisted expense event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    pub id: BillId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub total_amount: Money,
    pub currency: Currency,
    /// Empty for system-generated bills.
    pub created_by: UserId,
    pub created_at: TimeMs,
    pub status: BillStatus,
    pub shares: Vec<BillShare>,
    /// Bumped on every write; used for optimistic concurrency.
    pub revision: i64,
}

impl Bill {
    /// Sum of all share amounts, or `None` on i64 overflow.
    pub fn shares_sum(&self) -> Option<Money> {
        Money::checked_sum(self.shares.iter().map(|s| s.amount))
    }

    /// True when the shares add up exactly to the bill total.
    pub fn is_consistent(&self) -> bool {
        self.shares_sum() == Some(self.total_amount)
    }

    pub fn unpaid_shares(&self) -> impl Iterator<Item = &BillShare> {
        self.shares.iter().filter(|s| !s.paid)
    }

    pub fn all_shares_paid(&self) -> bool {
        self.shares.iter().all(|s| s.paid)
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.created_by == user || self.shares.iter().any(|s| &s.user_id == user)
    }
}

/// A bill that has not been persisted yet. The repository assigns
/// `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBill {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub total_amount: Money,
    pub currency: Currency,
    pub created_by: UserId,
    pub status: BillStatus,
    pub shares: Vec<BillShare>,
}

impl NewBill {
    /// Split `total` evenly across `participants`.
    ///
    /// Each participant gets `floor(total / n)`; the integer remainder goes to
    /// the creator if they participate, otherwise to the first participant.
    /// The creator's share is marked paid.
    pub fn split_evenly(
        title: impl Into<String>,
        total: Money,
        currency: Currency,
        created_by: UserId,
        participants: &[UserId],
    ) -> Self {
        let shares = even_shares(total, &created_by, participants);
        NewBill {
            title: title.into(),
            description: None,
            total_amount: total,
            currency,
            created_by,
            status: BillStatus::Unpaid,
            shares,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_status(mut self, status: BillStatus) -> Self {
        self.status = status;
        self
    }

    pub fn shares_sum(&self) -> Option<Money> {
        Money::checked_sum(self.shares.iter().map(|s| s.amount))
    }

    pub fn is_consistent(&self) -> bool {
        self.shares_sum() == Some(self.total_amount)
    }

    /// Materialize as a stored bill at revision 0.
    pub fn into_bill(self, id: BillId, created_at: TimeMs) -> Bill {
        Bill {
            id,
            title: self.title,
            description: self.description,
            total_amount: self.total_amount,
            currency: self.currency,
            created_by: self.created_by,
            created_at,
            status: self.status,
            shares: self.shares,
            revision: 0,
        }
    }

    /// Mark the creator's own share as paid; a creator never owes themself.
    pub fn mark_creator_paid(&mut self) {
        for share in &mut self.shares {
            if share.user_id == self.created_by {
                share.paid = true;
            }
        }
    }
}

fn even_shares(total: Money, creator: &UserId, participants: &[UserId]) -> Vec<BillShare> {
    let Some((per_person, remainder)) = Money::split_evenly(total, participants.len()) else {
        return Vec::new();
    };

    let holder = participants
        .iter()
        .position(|p| p == creator)
        .unwrap_or(0);

    participants
        .iter()
        .enumerate()
        .map(|(idx, user)| {
            let amount = if idx == holder {
                per_person + remainder
            } else {
                per_person
            };
            BillShare {
                user_id: user.clone(),
                amount,
                paid: user == creator,
            }
        })
        .collect()
}
