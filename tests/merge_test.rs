//! Merge flow through the `Ledger` service over the in-memory repository.
//!
//! Includes repository wrappers that inject a concurrent writer or a slow
//! read to exercise the retry and timeout paths.

use async_trait::async_trait;
use splitledger::engine::partition_by_currency;
use splitledger::{
    BalanceSheet, Bill, BillId, BillShare, BillStatus, Currency, InMemoryRepository, Ledger,
    LedgerError, LedgerRepository, MergePlan, Money, NewBill, RepositoryError, TimeMs, User,
    UserId,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Fixtures
// =============================================================================

fn share(user: &str, amount: i64, paid: bool) -> BillShare {
    BillShare {
        user_id: UserId::new(user),
        amount: Money::from_minor(amount),
        paid,
    }
}

fn pending(id: &str, currency: Currency, creator: &str, shares: Vec<BillShare>) -> Bill {
    let total: Money = shares.iter().map(|s| s.amount).sum();
    Bill {
        id: BillId::new(id),
        title: format!("bill {}", id),
        description: None,
        total_amount: total,
        currency,
        created_by: UserId::new(creator),
        created_at: TimeMs::new(1_700_000_000_000),
        status: BillStatus::Pending,
        shares,
        revision: 0,
    }
}

fn seeded_repo(bills: Vec<Bill>) -> InMemoryRepository {
    let mut repo = InMemoryRepository::new()
        .with_user(User::new("a", "Alice"))
        .with_user(User::new("b", "Bob"))
        .with_user(User::new("c", "Carol"))
        .with_user(User::new("d", "Dan"));
    for bill in bills {
        repo = repo.with_bill(bill);
    }
    repo
}

fn scenario_c() -> Vec<Bill> {
    vec![
        pending("1", Currency::Cny, "a", vec![share("b", 100, false)]),
        pending("2", Currency::Cny, "a", vec![share("c", 50, false)]),
        pending("3", Currency::Cny, "a", vec![share("b", 25, false)]),
    ]
}

async fn net_balances(
    repo: &dyn LedgerRepository,
) -> BTreeMap<Currency, BTreeMap<UserId, Money>> {
    let users = repo.list_users().await.unwrap();
    let bills = repo.list_bills(&[BillStatus::Pending]).await.unwrap();
    partition_by_currency(&bills, &[BillStatus::Pending])
        .into_iter()
        .map(|(currency, group)| {
            let sheet = BalanceSheet::build(currency, group, &users).unwrap();
            let nonzero = sheet
                .balances
                .into_iter()
                .filter(|(_, b)| !b.is_zero())
                .collect();
            (currency, nonzero)
        })
        .collect()
}

// =============================================================================
// Scenarios and properties
// =============================================================================

#[tokio::test]
async fn test_scenario_c_merges_into_one_bill_per_creditor() {
    let repo = Arc::new(seeded_repo(scenario_c()));
    let ledger = Ledger::new(repo.clone());

    let outcome = ledger.merge_bills().await.unwrap();

    let created = &outcome.created[&Currency::Cny];
    assert_eq!(created.len(), 1);
    let merged = &created[0];
    assert_eq!(merged.created_by, UserId::new("a"));
    assert_eq!(merged.status, BillStatus::Pending);
    assert_eq!(merged.title, "Merged bill - Alice (CNY)");
    assert_eq!(
        merged.description.as_deref(),
        Some("Automatically merged 3 CNY bills")
    );
    assert_eq!(merged.total_amount, Money::from_minor(175));
    assert_eq!(
        merged.shares,
        vec![share("b", 125, false), share("c", 50, false)]
    );

    for id in ["1", "2", "3"] {
        let original = repo.get_bill(&BillId::new(id)).await.unwrap().unwrap();
        assert_eq!(original.status, BillStatus::Merged);
    }
    assert_eq!(outcome.retired.len(), 3);
}

#[tokio::test]
async fn test_merge_conserves_unpaid_total_without_cross_debt() {
    let repo = Arc::new(seeded_repo(scenario_c()));
    let ledger = Ledger::new(repo.clone());

    let unpaid_before: Money = repo
        .list_bills(&[BillStatus::Pending])
        .await
        .unwrap()
        .iter()
        .flat_map(|b| b.unpaid_shares())
        .map(|s| s.amount)
        .sum();

    let outcome = ledger.merge_bills().await.unwrap();
    let merged_total: Money = outcome.created[&Currency::Cny]
        .iter()
        .flat_map(|b| b.shares.iter())
        .map(|s| s.amount)
        .sum();

    assert_eq!(merged_total, unpaid_before);
}

#[tokio::test]
async fn test_merge_keeps_system_bill_debt_pending() {
    let bills = vec![
        pending("sys", Currency::Cny, "", vec![share("b", 500, false)]),
        pending("x", Currency::Cny, "a", vec![share("b", 100, false)]),
    ];
    let repo = Arc::new(seeded_repo(bills));
    let ledger = Ledger::new(repo.clone());

    let unpaid = |bills: Vec<Bill>| -> Money {
        bills
            .iter()
            .flat_map(|b| b.unpaid_shares())
            .map(|s| s.amount)
            .sum()
    };

    // Only one bill can be merged, so nothing is written.
    let outcome = ledger.merge_bills().await.unwrap();
    assert!(outcome.is_noop());

    repo.create_bill(NewBill {
        title: "taxi".to_string(),
        description: None,
        total_amount: Money::from_minor(40),
        currency: Currency::Cny,
        created_by: UserId::new("a"),
        status: BillStatus::Pending,
        shares: vec![share("c", 40, false)],
    })
    .await
    .unwrap();
    let before = unpaid(repo.list_bills(&[BillStatus::Pending]).await.unwrap());
    assert_eq!(before, Money::from_minor(640));

    let outcome = ledger.merge_bills().await.unwrap();
    assert_eq!(outcome.retired.len(), 2);
    assert!(!outcome.retired.contains(&BillId::new("sys")));

    let system = repo.get_bill(&BillId::new("sys")).await.unwrap().unwrap();
    assert_eq!(system.status, BillStatus::Pending);
    assert_eq!(system.revision, 0);

    let after = unpaid(repo.list_bills(&[BillStatus::Pending]).await.unwrap());
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_merge_preserves_net_balances_with_cross_debt() {
    let bills = vec![
        pending("1", Currency::Cny, "a", vec![share("a", 30, true), share("b", 90, false)]),
        pending("2", Currency::Cny, "b", vec![share("a", 40, false), share("c", 40, false)]),
        pending("3", Currency::Cny, "c", vec![share("d", 15, false)]),
        pending("4", Currency::Jpy, "d", vec![share("a", 500, false)]),
        pending("5", Currency::Jpy, "a", vec![share("d", 200, false), share("b", 100, false)]),
    ];
    let repo = Arc::new(seeded_repo(bills));
    let ledger = Ledger::new(repo.clone());

    let before = net_balances(&*repo).await;
    let settlements_before = ledger.settlements().await.unwrap();

    let outcome = ledger.merge_bills().await.unwrap();
    assert_eq!(outcome.retired.len(), 5);

    let after = net_balances(&*repo).await;
    assert_eq!(before, after);
    assert_eq!(ledger.settlements().await.unwrap(), settlements_before);

    // Every pending bill left is a merged bill with positive unpaid shares.
    for bill in repo.list_bills(&[BillStatus::Pending]).await.unwrap() {
        assert!(bill.title.starts_with("Merged bill - "));
        assert!(bill.shares.iter().all(|s| s.amount.is_positive() && !s.paid));
        assert!(bill.shares.iter().all(|s| s.user_id != bill.created_by));
        assert_eq!(bill.shares_sum(), Some(bill.total_amount));
    }
}

#[tokio::test]
async fn test_single_bill_currency_is_left_alone() {
    let bills = vec![
        pending("1", Currency::Cny, "a", vec![share("b", 100, false)]),
        pending("2", Currency::Cny, "a", vec![share("c", 50, false)]),
        pending("3", Currency::Jpy, "a", vec![share("b", 700, false)]),
    ];
    let repo = Arc::new(seeded_repo(bills));
    let ledger = Ledger::new(repo.clone());

    let outcome = ledger.merge_bills().await.unwrap();

    assert!(outcome.created.contains_key(&Currency::Cny));
    assert!(!outcome.created.contains_key(&Currency::Jpy));
    let jpy = repo.get_bill(&BillId::new("3")).await.unwrap().unwrap();
    assert_eq!(jpy.status, BillStatus::Pending);
    assert_eq!(jpy.revision, 0);
}

#[tokio::test]
async fn test_fully_paid_bills_complete_during_merge() {
    let bills = vec![
        pending("1", Currency::Cny, "a", vec![share("b", 100, false)]),
        pending("2", Currency::Cny, "a", vec![share("c", 50, true)]),
    ];
    let repo = Arc::new(seeded_repo(bills));
    let ledger = Ledger::new(repo.clone());

    let outcome = ledger.merge_bills().await.unwrap();

    assert_eq!(outcome.retired, vec![BillId::new("1")]);
    assert_eq!(outcome.completed, vec![BillId::new("2")]);
    let paid = repo.get_bill(&BillId::new("2")).await.unwrap().unwrap();
    assert_eq!(paid.status, BillStatus::Completed);
    assert_eq!(
        outcome.created[&Currency::Cny][0].shares,
        vec![share("b", 100, false)]
    );
}

#[tokio::test]
async fn test_merged_bills_are_excluded_from_later_merges() {
    let repo = Arc::new(seeded_repo(scenario_c()));
    let ledger = Ledger::new(repo.clone());

    ledger.merge_bills().await.unwrap();
    ledger
        .add_bill(
            NewBill::split_evenly(
                "taxi",
                Money::from_minor(60),
                Currency::Cny,
                UserId::new("c"),
                &[UserId::new("a"), UserId::new("c")],
            )
            .with_status(BillStatus::Pending),
        )
        .await
        .unwrap();

    let outcome = ledger.merge_bills().await.unwrap();

    // The previous merged bill and the taxi bill; the originals stay merged.
    assert_eq!(outcome.retired.len(), 2);
    let merged = repo.list_bills(&[BillStatus::Merged]).await.unwrap();
    assert_eq!(merged.len(), 5);
}

// =============================================================================
// Concurrency
// =============================================================================

/// Bumps a bill's revision right before the first `remaining` commits.
#[derive(Debug)]
struct InterferingRepository {
    inner: InMemoryRepository,
    target: BillId,
    remaining: AtomicU32,
    commits: AtomicU32,
}

#[async_trait]
impl LedgerRepository for InterferingRepository {
    async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        self.inner.list_users().await
    }

    async fn create_user(&self, name: &str) -> Result<User, RepositoryError> {
        self.inner.create_user(name).await
    }

    async fn list_bills(&self, statuses: &[BillStatus]) -> Result<Vec<Bill>, RepositoryError> {
        self.inner.list_bills(statuses).await
    }

    async fn get_bill(&self, id: &BillId) -> Result<Option<Bill>, RepositoryError> {
        self.inner.get_bill(id).await
    }

    async fn create_bill(&self, bill: NewBill) -> Result<Bill, RepositoryError> {
        self.inner.create_bill(bill).await
    }

    async fn update_bill_status(
        &self,
        id: &BillId,
        status: BillStatus,
    ) -> Result<Bill, RepositoryError> {
        self.inner.update_bill_status(id, status).await
    }

    async fn update_bill_shares(
        &self,
        id: &BillId,
        shares: Vec<BillShare>,
    ) -> Result<Bill, RepositoryError> {
        self.inner.update_bill_shares(id, shares).await
    }

    async fn delete_bill(&self, id: &BillId) -> Result<bool, RepositoryError> {
        self.inner.delete_bill(id).await
    }

    async fn commit_merge(&self, plan: &MergePlan) -> Result<Vec<Bill>, RepositoryError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.remaining.load(Ordering::SeqCst) > 0 {
            self.remaining.fetch_sub(1, Ordering::SeqCst);
            let current = self.inner.get_bill(&self.target).await?;
            if let Some(bill) = current {
                self.inner.update_bill_shares(&self.target, bill.shares).await?;
            }
        }
        self.inner.commit_merge(plan).await
    }
}

fn interfering(times: u32) -> Arc<InterferingRepository> {
    Arc::new(InterferingRepository {
        inner: seeded_repo(scenario_c()),
        target: BillId::new("2"),
        remaining: AtomicU32::new(times),
        commits: AtomicU32::new(0),
    })
}

#[tokio::test]
async fn test_conflict_is_retried_from_a_fresh_snapshot() {
    let repo = interfering(1);
    let ledger = Ledger::new(repo.clone());

    let outcome = ledger.merge_bills().await.unwrap();

    assert_eq!(outcome.attempts, 2);
    assert_eq!(repo.commits.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.created_count(), 1);
    let merged = repo.list_bills(&[BillStatus::Merged]).await.unwrap();
    assert_eq!(merged.len(), 3);
}

#[tokio::test]
async fn test_conflict_surfaces_after_max_attempts() {
    let repo = interfering(10);
    let ledger = Ledger::new(repo.clone()).with_merge_max_attempts(2);

    let err = ledger.merge_bills().await.unwrap_err();

    assert!(err.is_retryable());
    match err {
        LedgerError::ConcurrentMergeConflict { bill_id } => assert_eq!(bill_id, BillId::new("2")),
        other => panic!("Expected ConcurrentMergeConflict, got {:?}", other),
    }
    assert_eq!(repo.commits.load(Ordering::SeqCst), 2);

    // Nothing was applied.
    let all = repo.list_bills(&[]).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|b| b.status == BillStatus::Pending));
}

/// Delays every bill listing.
#[derive(Debug)]
struct SlowRepository {
    inner: InMemoryRepository,
    delay: Duration,
}

#[async_trait]
impl LedgerRepository for SlowRepository {
    async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        self.inner.list_users().await
    }

    async fn create_user(&self, name: &str) -> Result<User, RepositoryError> {
        self.inner.create_user(name).await
    }

    async fn list_bills(&self, statuses: &[BillStatus]) -> Result<Vec<Bill>, RepositoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_bills(statuses).await
    }

    async fn get_bill(&self, id: &BillId) -> Result<Option<Bill>, RepositoryError> {
        self.inner.get_bill(id).await
    }

    async fn create_bill(&self, bill: NewBill) -> Result<Bill, RepositoryError> {
        self.inner.create_bill(bill).await
    }

    async fn update_bill_status(
        &self,
        id: &BillId,
        status: BillStatus,
    ) -> Result<Bill, RepositoryError> {
        self.inner.update_bill_status(id, status).await
    }

    async fn update_bill_shares(
        &self,
        id: &BillId,
        shares: Vec<BillShare>,
    ) -> Result<Bill, RepositoryError> {
        self.inner.update_bill_shares(id, shares).await
    }

    async fn delete_bill(&self, id: &BillId) -> Result<bool, RepositoryError> {
        self.inner.delete_bill(id).await
    }

    async fn commit_merge(&self, plan: &MergePlan) -> Result<Vec<Bill>, RepositoryError> {
        self.inner.commit_merge(plan).await
    }
}

#[tokio::test]
async fn test_timeout_fails_the_merge_and_leaves_state_untouched() {
    let repo = Arc::new(SlowRepository {
        inner: seeded_repo(scenario_c()),
        delay: Duration::from_millis(200),
    });
    let ledger = Ledger::new(repo.clone()).with_merge_timeout(Duration::from_millis(20));

    let err = ledger.merge_bills().await.unwrap_err();

    assert!(matches!(err, LedgerError::MergeTimeout { timeout_ms: 20 }));
    let all = repo.inner.list_bills(&[]).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|b| b.status == BillStatus::Pending && b.revision == 0));
}

#[tokio::test]
async fn test_concurrent_merges_are_serialized() {
    let repo = Arc::new(seeded_repo(scenario_c()));
    let ledger = Arc::new(Ledger::new(repo.clone()));

    let (first, second) = tokio::join!(
        {
            let ledger = ledger.clone();
            async move { ledger.merge_bills().await }
        },
        {
            let ledger = ledger.clone();
            async move { ledger.merge_bills().await }
        }
    );

    let first = first.unwrap();
    let second = second.unwrap();
    // Exactly one call did the work; the other saw only the merged bill.
    assert_eq!(first.created_count() + second.created_count(), 1);
    assert!(first.is_noop() || second.is_noop());

    let pending = repo.list_bills(&[BillStatus::Pending]).await.unwrap();
    assert_eq!(pending.len(), 1);
}
