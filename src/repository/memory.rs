//! In-memory repository for tests and embedding without a database.

use super::{check_shares, new_user_id, LedgerRepository, RepositoryError};
use crate::domain::{Bill, BillId, BillShare, BillStatus, NewBill, TimeMs, User};
use crate::engine::MergePlan;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<String, User>,
    bills: BTreeMap<BillId, Bill>,
}

/// Repository backed by a lock-protected map.
///
/// Merges hold the write lock for their whole duration, so readers never
/// observe a half-applied plan.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user with a fixed id.
    pub fn with_user(mut self, user: User) -> Self {
        self.state
            .get_mut()
            .users
            .insert(user.id.as_str().to_string(), user);
        self
    }

    /// Seed a bill verbatim, including its id, status and revision.
    pub fn with_bill(mut self, bill: Bill) -> Self {
        self.state.get_mut().bills.insert(bill.id.clone(), bill);
        self
    }
}

fn sorted(mut bills: Vec<Bill>) -> Vec<Bill> {
    bills.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    bills
}

#[async_trait]
impl LedgerRepository for InMemoryRepository {
    async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        Ok(self.state.read().await.users.values().cloned().collect())
    }

    async fn create_user(&self, name: &str) -> Result<User, RepositoryError> {
        let user = User {
            id: new_user_id(),
            name: name.to_string(),
        };
        self.state
            .write()
            .await
            .users
            .insert(user.id.as_str().to_string(), user.clone());
        Ok(user)
    }

    async fn list_bills(&self, statuses: &[BillStatus]) -> Result<Vec<Bill>, RepositoryError> {
        let state = self.state.read().await;
        Ok(sorted(
            state
                .bills
                .values()
                .filter(|b| statuses.is_empty() || statuses.contains(&b.status))
                .cloned()
                .collect(),
        ))
    }

    async fn get_bill(&self, id: &BillId) -> Result<Option<Bill>, RepositoryError> {
        Ok(self.state.read().await.bills.get(id).cloned())
    }

    async fn create_bill(&self, bill: NewBill) -> Result<Bill, RepositoryError> {
        check_shares(bill.total_amount, &bill.shares)?;
        let bill = bill.into_bill(BillId::generate(), TimeMs::now());
        self.state
            .write()
            .await
            .bills
            .insert(bill.id.clone(), bill.clone());
        Ok(bill)
    }

    async fn update_bill_status(
        &self,
        id: &BillId,
        status: BillStatus,
    ) -> Result<Bill, RepositoryError> {
        let mut state = self.state.write().await;
        let bill = state
            .bills
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("bill {}", id)))?;
        bill.status = status;
        bill.revision += 1;
        Ok(bill.clone())
    }

    async fn update_bill_shares(
        &self,
        id: &BillId,
        shares: Vec<BillShare>,
    ) -> Result<Bill, RepositoryError> {
        let mut state = self.state.write().await;
        let bill = state
            .bills
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("bill {}", id)))?;
        check_shares(bill.total_amount, &shares)?;
        bill.shares = shares;
        bill.revision += 1;
        Ok(bill.clone())
    }

    async fn delete_bill(&self, id: &BillId) -> Result<bool, RepositoryError> {
        Ok(self.state.write().await.bills.remove(id).is_some())
    }

    async fn commit_merge(&self, plan: &MergePlan) -> Result<Vec<Bill>, RepositoryError> {
        let mut state = self.state.write().await;

        // Validate everything before the first mutation.
        for original in plan.touched() {
            let current = state.bills.get(&original.id);
            let unchanged = current
                .map(|b| b.status == BillStatus::Pending && b.revision == original.revision)
                .unwrap_or(false);
            if !unchanged {
                return Err(RepositoryError::Conflict {
                    bill_id: original.id.clone(),
                });
            }
        }
        for draft in plan.groups.iter().flat_map(|g| g.merged_bills.iter()) {
            check_shares(draft.total_amount, &draft.shares)?;
        }

        let now = TimeMs::now();
        let mut created = Vec::new();
        for group in &plan.groups {
            for draft in &group.merged_bills {
                let bill = draft.clone().into_bill(BillId::generate(), now);
                state.bills.insert(bill.id.clone(), bill.clone());
                created.push(bill);
            }
            for (refs, status) in [
                (&group.retired, BillStatus::Merged),
                (&group.completed, BillStatus::Completed),
            ] {
                for original in refs {
                    if let Some(bill) = state.bills.get_mut(&original.id) {
                        bill.status = status;
                        bill.revision += 1;
                    }
                }
            }
        }
        Ok(created)
    }
}
