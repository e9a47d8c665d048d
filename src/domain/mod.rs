//! Domain types for the shared-expense ledger.
//!
//! This module provides:
//! - Integer minor-unit money per currency
//! - Primitives: TimeMs, UserId, BillId
//! - Users, bills with their shares and status machine
//! - Settlement suggestions

pub mod bill;
pub mod money;
pub mod primitives;
pub mod settlement;
pub mod user;

pub use bill::{Bill, BillShare, BillStatus, NewBill};
pub use money::{Currency, Money, MoneyError};
pub use primitives::{BillId, TimeMs, UserId};
pub use settlement::Settlement;
pub use user::User;
