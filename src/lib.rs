pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod repository;

pub use config::Config;
pub use db::{init_db, init_db_with, Repository};
pub use domain::{Bill, BillId, BillShare, BillStatus, Currency, Money, NewBill, Settlement, TimeMs, User, UserId};
pub use engine::{BalanceSheet, EngineError, MergePlan, NettingPlanner, SettlementCalculator, SettlementScope};
pub use error::LedgerError;
pub use orchestration::{BatchAction, BillView, Ledger, MergeOutcome};
pub use repository::{InMemoryRepository, LedgerRepository, RepositoryError};
