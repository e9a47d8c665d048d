//! The ledger service the surrounding CRUD layer calls into.

pub mod ledger;
pub mod merge;

pub use ledger::{BatchAction, BillView, Ledger};
pub use merge::MergeOutcome;
