//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `bills.rs` - Bill and share operations, including the merge transaction
//! - `users.rs` - User registration and listing

mod bills;
mod users;

use crate::domain::{Bill, BillId, BillShare, BillStatus, NewBill, User};
use crate::engine::MergePlan;
use crate::repository::{LedgerRepository, RepositoryError};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

/// SQLite-backed repository.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerRepository for Repository {
    async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        Ok(self.fetch_users().await?)
    }

    async fn create_user(&self, name: &str) -> Result<User, RepositoryError> {
        Ok(self.register_user(name).await?)
    }

    async fn list_bills(&self, statuses: &[BillStatus]) -> Result<Vec<Bill>, RepositoryError> {
        self.fetch_bills(statuses).await
    }

    async fn get_bill(&self, id: &BillId) -> Result<Option<Bill>, RepositoryError> {
        self.fetch_bill(id).await
    }

    async fn create_bill(&self, bill: NewBill) -> Result<Bill, RepositoryError> {
        self.insert_bill(bill).await
    }

    async fn update_bill_status(
        &self,
        id: &BillId,
        status: BillStatus,
    ) -> Result<Bill, RepositoryError> {
        self.set_bill_status(id, status).await
    }

    async fn update_bill_shares(
        &self,
        id: &BillId,
        shares: Vec<BillShare>,
    ) -> Result<Bill, RepositoryError> {
        self.replace_bill_shares(id, &shares).await
    }

    async fn delete_bill(&self, id: &BillId) -> Result<bool, RepositoryError> {
        Ok(self.remove_bill(id).await?)
    }

    async fn commit_merge(&self, plan: &MergePlan) -> Result<Vec<Bill>, RepositoryError> {
        self.apply_merge(plan).await
    }
}
