//! Bill, share and merge operations for the repository.

use crate::domain::{Bill, BillId, BillShare, BillStatus, Currency, Money, NewBill, TimeMs, UserId};
use crate::engine::MergePlan;
use crate::repository::{check_shares, RepositoryError};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{info, warn};

use super::Repository;

// SQLite has a 999 parameter limit; chunk to 500 for safety margin.
const CHUNK_SIZE: usize = 500;

const BILL_COLUMNS: &str =
    "id, title, description, total_amount, currency, created_by, created_at, status, revision";

impl Repository {
    /// Query bills by status; every bill when `statuses` is empty.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored row cannot be decoded.
    pub async fn fetch_bills(&self, statuses: &[BillStatus]) -> Result<Vec<Bill>, RepositoryError> {
        let sql = if statuses.is_empty() {
            format!(
                "SELECT {} FROM bills ORDER BY created_at ASC, id ASC",
                BILL_COLUMNS
            )
        } else {
            let placeholders = vec!["?"; statuses.len()].join(",");
            format!(
                "SELECT {} FROM bills WHERE status IN ({}) ORDER BY created_at ASC, id ASC",
                BILL_COLUMNS, placeholders
            )
        };

        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut bills = rows
            .iter()
            .map(bill_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_shares(&mut bills).await?;
        Ok(bills)
    }

    /// Get a single bill with its shares.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn fetch_bill(&self, id: &BillId) -> Result<Option<Bill>, RepositoryError> {
        let sql = format!("SELECT {} FROM bills WHERE id = ?", BILL_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut bills = vec![bill_from_row(&row)?];
                self.attach_shares(&mut bills).await?;
                Ok(bills.pop())
            }
            None => Ok(None),
        }
    }

    /// Persist a new bill and its shares in one transaction.
    ///
    /// # Errors
    /// `InvalidRecord` if the shares do not sum to the total.
    pub async fn insert_bill(&self, bill: NewBill) -> Result<Bill, RepositoryError> {
        check_shares(bill.total_amount, &bill.shares)?;
        let bill = bill.into_bill(BillId::generate(), TimeMs::now());

        let mut tx = self.pool.begin().await?;
        insert_bill_rows(&mut *tx, &bill).await?;
        tx.commit().await?;

        Ok(bill)
    }

    /// Set a bill's status and bump its revision.
    ///
    /// # Errors
    /// `NotFound` if no such bill exists.
    pub async fn set_bill_status(
        &self,
        id: &BillId,
        status: BillStatus,
    ) -> Result<Bill, RepositoryError> {
        let result = sqlx::query("UPDATE bills SET status = ?, revision = revision + 1 WHERE id = ?")
            .bind(status.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("bill {}", id)));
        }
        self.require_bill(id).await
    }

    /// Replace a bill's shares and bump its revision.
    ///
    /// # Errors
    /// `NotFound` if no such bill exists, `InvalidRecord` if the shares do not
    /// sum to the stored total.
    pub async fn replace_bill_shares(
        &self,
        id: &BillId,
        shares: &[BillShare],
    ) -> Result<Bill, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT total_amount FROM bills WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("bill {}", id)))?;
        check_shares(Money::from_minor(row.get::<i64, _>("total_amount")), shares)?;

        sqlx::query("DELETE FROM bill_shares WHERE bill_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        insert_share_rows(&mut *tx, id, shares).await?;
        sqlx::query("UPDATE bills SET revision = revision + 1 WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.require_bill(id).await
    }

    /// Delete a bill and its shares.
    ///
    /// Returns false if no such bill existed.
    pub async fn remove_bill(&self, id: &BillId) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM bill_shares WHERE bill_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM bills WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a merge plan atomically.
    ///
    /// Each original is transitioned only if it is still `pending` at the
    /// revision the plan observed. The first miss aborts the transaction and
    /// nothing is written.
    ///
    /// # Errors
    /// `Conflict` on a concurrent modification; `Database` on I/O failure.
    pub async fn apply_merge(&self, plan: &MergePlan) -> Result<Vec<Bill>, RepositoryError> {
        for draft in plan.groups.iter().flat_map(|g| g.merged_bills.iter()) {
            check_shares(draft.total_amount, &draft.shares)?;
        }

        let now = TimeMs::now();
        let mut created = Vec::new();
        let mut tx = self.pool.begin().await?;

        for group in &plan.groups {
            for (refs, status) in [
                (&group.retired, BillStatus::Merged),
                (&group.completed, BillStatus::Completed),
            ] {
                for original in refs {
                    let result = sqlx::query(
                        r#"
                        UPDATE bills SET status = ?, revision = revision + 1
                        WHERE id = ? AND status = 'pending' AND revision = ?
                        "#,
                    )
                    .bind(status.as_str())
                    .bind(original.id.as_str())
                    .bind(original.revision)
                    .execute(&mut *tx)
                    .await?;

                    if result.rows_affected() == 0 {
                        warn!(
                            bill_id = %original.id,
                            revision = original.revision,
                            "Merge aborted: bill changed since it was read"
                        );
                        // Dropping the transaction rolls it back.
                        return Err(RepositoryError::Conflict {
                            bill_id: original.id.clone(),
                        });
                    }
                }
            }

            for draft in &group.merged_bills {
                let bill = draft.clone().into_bill(BillId::generate(), now);
                insert_bill_rows(&mut *tx, &bill).await?;
                created.push(bill);
            }
        }

        tx.commit().await?;
        info!(
            created = created.len(),
            retired = plan.touched().count(),
            "Merge committed"
        );
        Ok(created)
    }

    async fn require_bill(&self, id: &BillId) -> Result<Bill, RepositoryError> {
        self.fetch_bill(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("bill {}", id)))
    }

    /// Load shares for `bills`, in stored position order.
    ///
    /// Uses chunked queries to avoid SQLite's 999 parameter limit.
    async fn attach_shares(&self, bills: &mut [Bill]) -> Result<(), RepositoryError> {
        if bills.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = bills.iter().map(|b| b.id.as_str().to_string()).collect();
        let mut by_bill: HashMap<String, Vec<BillShare>> = HashMap::new();

        for chunk in ids.chunks(CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                r#"
                SELECT bill_id, user_id, amount, paid
                FROM bill_shares
                WHERE bill_id IN ({})
                ORDER BY bill_id ASC, position ASC
                "#,
                placeholders
            );

            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }

            for row in query.fetch_all(&self.pool).await? {
                by_bill
                    .entry(row.get::<String, _>("bill_id"))
                    .or_default()
                    .push(BillShare {
                        user_id: UserId::new(row.get::<String, _>("user_id")),
                        amount: Money::from_minor(row.get::<i64, _>("amount")),
                        paid: row.get::<i32, _>("paid") != 0,
                    });
            }
        }

        for bill in bills.iter_mut() {
            bill.shares = by_bill.remove(bill.id.as_str()).unwrap_or_default();
        }
        Ok(())
    }
}

fn bill_from_row(row: &SqliteRow) -> Result<Bill, RepositoryError> {
    let id: String = row.get("id");
    let currency: String = row.get("currency");
    let status: String = row.get("status");

    let currency = currency.parse::<Currency>().map_err(|e| {
        RepositoryError::InvalidRecord(format!("bill {}: {}", id, e))
    })?;
    let status = status
        .parse::<BillStatus>()
        .map_err(|e| RepositoryError::InvalidRecord(format!("bill {}: {}", id, e)))?;

    Ok(Bill {
        id: BillId::new(id),
        title: row.get("title"),
        description: row.get("description"),
        total_amount: Money::from_minor(row.get::<i64, _>("total_amount")),
        currency,
        created_by: UserId::new(row.get::<String, _>("created_by")),
        created_at: TimeMs::new(row.get::<i64, _>("created_at")),
        status,
        shares: Vec::new(),
        revision: row.get::<i64, _>("revision"),
    })
}

async fn insert_bill_rows(conn: &mut SqliteConnection, bill: &Bill) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO bills (
            id, title, description, total_amount, currency,
            created_by, created_at, status, revision
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(bill.id.as_str())
    .bind(bill.title.as_str())
    .bind(bill.description.as_deref())
    .bind(bill.total_amount.minor())
    .bind(bill.currency.as_str())
    .bind(bill.created_by.as_str())
    .bind(bill.created_at.as_ms())
    .bind(bill.status.as_str())
    .bind(bill.revision)
    .execute(&mut *conn)
    .await?;

    insert_share_rows(conn, &bill.id, &bill.shares).await
}

async fn insert_share_rows(
    conn: &mut SqliteConnection,
    bill_id: &BillId,
    shares: &[BillShare],
) -> Result<(), sqlx::Error> {
    for (position, share) in shares.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO bill_shares (bill_id, position, user_id, amount, paid)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(bill_id.as_str())
        .bind(position as i64)
        .bind(share.user_id.as_str())
        .bind(share.amount.minor())
        .bind(if share.paid { 1_i32 } else { 0_i32 })
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
