//! Settlement suggestions.

use crate::domain::{Currency, Money, UserId};
use serde::{Deserialize, Serialize};

/// A computed payment: `from_user` pays `to_user` `amount` in `currency`.
///
/// Produced fresh on each calculation and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub from_user: UserId,
    pub to_user: UserId,
    pub amount: Money,
    pub currency: Currency,
}
