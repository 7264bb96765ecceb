// Balance Reconciliation
//
// Recomputes balances from completed transactions, audits every profile
// against its ledger, flags likely duplicate transactions and compares the
// node's liquidity with what the app owes its users.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::lightning::{LightningBackend, NodeBalance};
use crate::store::{
    LedgerStore, Profile, Transaction, TransactionFilter, TransactionStatus, TransactionType,
};

const DUPLICATE_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceBreakdown {
    pub deposits: i64,
    pub withdrawals: i64,
    pub internal: i64,
    pub calculated: i64,
    pub transaction_count: usize,
}

/// Balance implied by a user's ledger. Only completed rows count.
pub fn compute_balance(transactions: &[Transaction]) -> BalanceBreakdown {
    let mut breakdown = BalanceBreakdown::default();
    for tx in transactions
        .iter()
        .filter(|tx| tx.status == TransactionStatus::Completed)
    {
        breakdown.transaction_count += 1;
        match tx.tx_type {
            TransactionType::Deposit => {
                breakdown.deposits += tx.amount;
                breakdown.calculated += tx.amount;
            }
            TransactionType::Withdrawal => {
                breakdown.withdrawals += tx.amount;
                breakdown.calculated -= tx.amount;
            }
            TransactionType::Internal => {
                breakdown.internal += tx.amount;
                breakdown.calculated += tx.amount;
            }
        }
    }
    breakdown
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAudit {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub profile_balance: i64,
    pub breakdown: BalanceBreakdown,
    /// `profile_balance - breakdown.calculated`
    pub difference: i64,
}

impl UserAudit {
    pub fn is_consistent(&self) -> bool {
        self.difference == 0
    }

    fn label(&self) -> String {
        self.email.clone().unwrap_or_else(|| self.user_id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LargestDiscrepancy {
    pub user: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub status: AuditStatus,
    pub total_users: usize,
    pub users_with_discrepancies: usize,
    /// Sum of absolute differences
    pub total_discrepancy: i64,
    pub largest_discrepancy: Option<LargestDiscrepancy>,
    /// Largest absolute difference first
    pub discrepancies: Vec<UserAudit>,
    pub skipped_users: usize,
}

fn audit_profile(profile: &Profile, transactions: &[Transaction]) -> UserAudit {
    let breakdown = compute_balance(transactions);
    UserAudit {
        user_id: profile.id,
        email: profile.email.clone(),
        profile_balance: profile.balance,
        breakdown,
        difference: profile.balance - breakdown.calculated,
    }
}

/// Audit a single user
pub async fn audit_user(store: &dyn LedgerStore, user_id: Uuid) -> LedgerResult<UserAudit> {
    let profile = store
        .get_profile(user_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound("User profile not found".to_string()))?;
    let transactions = store
        .list_transactions(&TransactionFilter {
            user_id: Some(user_id),
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        })
        .await?;
    Ok(audit_profile(&profile, &transactions))
}

/// Audit every non-deleted profile
pub async fn audit_all_balances(store: &dyn LedgerStore) -> LedgerResult<AuditReport> {
    let profiles = store.list_profiles(false).await?;
    info!(users = profiles.len(), "Starting balance audit");

    let mut discrepancies = Vec::new();
    let mut skipped_users = 0;

    for profile in &profiles {
        let filter = TransactionFilter {
            user_id: Some(profile.id),
            status: Some(TransactionStatus::Completed),
            ..Default::default()
        };
        let transactions = match store.list_transactions(&filter).await {
            Ok(transactions) => transactions,
            Err(e) => {
                warn!(user_id = %profile.id, "Skipping user in audit, failed to load transactions: {}", e);
                skipped_users += 1;
                continue;
            }
        };

        let audit = audit_profile(profile, &transactions);
        if !audit.is_consistent() {
            warn!(
                user_id = %profile.id,
                profile_balance = audit.profile_balance,
                calculated = audit.breakdown.calculated,
                difference = audit.difference,
                "Balance discrepancy detected"
            );
            discrepancies.push(audit);
        }
    }

    discrepancies.sort_by(|a, b| b.difference.abs().cmp(&a.difference.abs()));

    let total_discrepancy = discrepancies.iter().map(|d| d.difference.abs()).sum();
    let largest_discrepancy = discrepancies.first().map(|d| LargestDiscrepancy {
        user: d.label(),
        amount: d.difference,
    });

    let report = AuditReport {
        status: if discrepancies.is_empty() {
            AuditStatus::Passed
        } else {
            AuditStatus::Failed
        },
        total_users: profiles.len(),
        users_with_discrepancies: discrepancies.len(),
        total_discrepancy,
        largest_discrepancy,
        discrepancies,
        skipped_users,
    };

    info!(
        total_users = report.total_users,
        users_with_discrepancies = report.users_with_discrepancies,
        total_discrepancy = report.total_discrepancy,
        "Balance audit finished"
    );
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicatePair {
    pub first: Transaction,
    pub second: Transaction,
    pub minutes_apart: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampCollision {
    pub created_at: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub total_transactions: usize,
    pub duplicate_pairs: Vec<DuplicatePair>,
    /// Completed deposits with no payment hash or payment request
    pub deposits_without_invoice: Vec<Transaction>,
    pub identical_timestamps: Vec<TimestampCollision>,
}

impl DuplicateReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_pairs.is_empty()
            && self.deposits_without_invoice.is_empty()
            && self.identical_timestamps.is_empty()
    }
}

/// An invoice-era memo followed by a hand-written one for the same movement
fn memos_look_duplicated(first: &str, second: &str) -> bool {
    let deposit = first.contains("Deposit")
        && first.contains("sats to Ganamos!")
        && second.contains("Deposit of")
        && second.contains("sats");
    let withdrawal = first.contains("Withdrawal of")
        && first.contains("sats from Ganamos!")
        && second.contains("Withdrawal of")
        && second.contains("sats");
    deposit || withdrawal
}

/// Flag transactions that look like double bookings
pub fn find_duplicate_transactions(transactions: &[Transaction]) -> DuplicateReport {
    let mut groups: HashMap<(Uuid, i64, TransactionType), Vec<&Transaction>> = HashMap::new();
    for tx in transactions {
        groups
            .entry((tx.user_id, tx.amount, tx.tx_type))
            .or_default()
            .push(tx);
    }

    let window = Duration::minutes(DUPLICATE_WINDOW_MINUTES);
    let mut duplicate_pairs = Vec::new();
    for group in groups.values_mut().filter(|g| g.len() > 1) {
        group.sort_by_key(|tx| tx.created_at);
        for pair in group.windows(2) {
            let (first, second) = (pair[0], pair[1]);
            let gap = second.created_at - first.created_at;
            if gap > window {
                continue;
            }
            let memo1 = first.memo.as_deref().unwrap_or_default();
            let memo2 = second.memo.as_deref().unwrap_or_default();
            if memos_look_duplicated(memo1, memo2) {
                duplicate_pairs.push(DuplicatePair {
                    first: first.clone(),
                    second: second.clone(),
                    minutes_apart: gap.num_milliseconds() as f64 / 60_000.0,
                });
            }
        }
    }
    duplicate_pairs.sort_by_key(|p| p.first.created_at);

    let deposits_without_invoice = transactions
        .iter()
        .filter(|tx| {
            tx.tx_type == TransactionType::Deposit
                && tx.status == TransactionStatus::Completed
                && tx.amount > 0
                && (tx.r_hash_str.is_none() || tx.payment_request.is_none())
        })
        .cloned()
        .collect();

    let mut by_timestamp: BTreeMap<DateTime<Utc>, Vec<Transaction>> = BTreeMap::new();
    for tx in transactions {
        by_timestamp.entry(tx.created_at).or_default().push(tx.clone());
    }
    let identical_timestamps = by_timestamp
        .into_iter()
        .filter(|(_, txs)| txs.len() > 1)
        .map(|(created_at, transactions)| TimestampCollision {
            created_at,
            transactions,
        })
        .collect();

    DuplicateReport {
        total_transactions: transactions.len(),
        duplicate_pairs,
        deposits_without_invoice,
        identical_timestamps,
    }
}

/// Load every transaction and run duplicate detection over it
pub async fn scan_for_duplicates(store: &dyn LedgerStore) -> LedgerResult<DuplicateReport> {
    let transactions = store
        .list_transactions(&TransactionFilter::default())
        .await?;
    Ok(find_duplicate_transactions(&transactions))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquiditySummary {
    pub node: NodeBalance,
    pub app_total_balance: i64,
    /// `node.total_balance - app_total_balance`
    pub difference: i64,
}

/// Compare what the node holds with what users are owed
pub async fn liquidity_summary(
    store: &dyn LedgerStore,
    lightning: &dyn LightningBackend,
) -> LedgerResult<LiquiditySummary> {
    let node = lightning.node_balance().await?;
    let app_total_balance: i64 = store
        .list_profiles(false)
        .await?
        .iter()
        .map(|p| p.balance)
        .sum();

    Ok(LiquiditySummary {
        node,
        app_total_balance,
        difference: node.total_balance - app_total_balance,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCount {
    pub count: usize,
    pub amount: i64,
}

impl VolumeCount {
    fn add(&mut self, amount: i64) {
        self.count += 1;
        self.amount += amount;
    }
}

/// Completed ledger movements inside a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub since: DateTime<Utc>,
    pub transactions: usize,
    pub deposits: VolumeCount,
    pub withdrawals: VolumeCount,
    /// Incoming internal legs only, so each transfer counts once
    pub transfers: VolumeCount,
}

pub const DEFAULT_ACTIVITY_WINDOW_HOURS: i64 = 24;

/// Count and sum completed deposits, withdrawals and transfers since `since`
pub async fn activity_summary(
    store: &dyn LedgerStore,
    since: DateTime<Utc>,
) -> LedgerResult<ActivitySummary> {
    let transactions = store
        .list_transactions(&TransactionFilter::completed_since(since))
        .await?;

    let mut summary = ActivitySummary {
        since,
        transactions: transactions.len(),
        deposits: VolumeCount::default(),
        withdrawals: VolumeCount::default(),
        transfers: VolumeCount::default(),
    };
    for tx in &transactions {
        match tx.tx_type {
            TransactionType::Deposit => summary.deposits.add(tx.amount),
            TransactionType::Withdrawal => summary.withdrawals.add(tx.amount),
            TransactionType::Internal if tx.amount > 0 => summary.transfers.add(tx.amount),
            TransactionType::Internal => {}
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lightning::FakeLightningNode;
    use crate::store::{MemoryStore, ProfileStatus};

    fn tx(
        user_id: Uuid,
        tx_type: TransactionType,
        amount: i64,
        status: TransactionStatus,
        memo: &str,
    ) -> Transaction {
        Transaction::new(user_id, tx_type, amount, status, memo)
    }

    #[test]
    fn test_compute_balance_counts_completed_only() {
        let user = Uuid::new_v4();
        let txs = vec![
            tx(user, TransactionType::Deposit, 1_000, TransactionStatus::Completed, "d"),
            tx(user, TransactionType::Deposit, 5_000, TransactionStatus::Pending, "d"),
            tx(user, TransactionType::Withdrawal, 300, TransactionStatus::Completed, "w"),
            tx(user, TransactionType::Withdrawal, 200, TransactionStatus::Failed, "w"),
            tx(user, TransactionType::Internal, -100, TransactionStatus::Completed, "t"),
            tx(user, TransactionType::Internal, 50, TransactionStatus::Completed, "t"),
        ];
        let breakdown = compute_balance(&txs);
        assert_eq!(
            breakdown,
            BalanceBreakdown {
                deposits: 1_000,
                withdrawals: 300,
                internal: -50,
                calculated: 650,
                transaction_count: 4,
            }
        );
    }

    #[tokio::test]
    async fn test_audit_flags_drift_and_skips_deleted() {
        let store = MemoryStore::new();
        let honest = Uuid::new_v4();
        let drifted = Uuid::new_v4();
        let gone = Uuid::new_v4();

        store.upsert_profile(&Profile::new(honest, "honest", 1_000)).await.unwrap();
        store.upsert_profile(&Profile::new(drifted, "drifted", 2_500)).await.unwrap();
        let mut deleted = Profile::new(gone, "gone", 999);
        deleted.status = ProfileStatus::Deleted;
        store.upsert_profile(&deleted).await.unwrap();

        for user in [honest, drifted] {
            store
                .insert_transaction(&tx(
                    user,
                    TransactionType::Deposit,
                    1_000,
                    TransactionStatus::Completed,
                    "Deposit 1000 sats to Ganamos!",
                ))
                .await
                .unwrap();
        }

        let report = audit_all_balances(&store).await.unwrap();
        assert_eq!(report.status, AuditStatus::Failed);
        assert_eq!(report.total_users, 2);
        assert_eq!(report.users_with_discrepancies, 1);
        assert_eq!(report.total_discrepancy, 1_500);
        assert_eq!(report.discrepancies[0].user_id, drifted);
        assert_eq!(report.largest_discrepancy.as_ref().unwrap().amount, 1_500);

        store.force_balance(drifted, 1_000).await.unwrap();
        let report = audit_all_balances(&store).await.unwrap();
        assert_eq!(report.status, AuditStatus::Passed);
        assert!(report.largest_discrepancy.is_none());
    }

    #[tokio::test]
    async fn test_audit_discrepancies_sorted_by_magnitude() {
        let store = MemoryStore::new();
        let small = Uuid::new_v4();
        let large = Uuid::new_v4();
        store.upsert_profile(&Profile::new(small, "small", 10)).await.unwrap();
        store.upsert_profile(&Profile::new(large, "large", -400)).await.unwrap();

        let report = audit_all_balances(&store).await.unwrap();
        assert_eq!(report.discrepancies.len(), 2);
        assert_eq!(report.discrepancies[0].user_id, large);
        assert_eq!(report.discrepancies[0].difference, -400);
        assert_eq!(report.total_discrepancy, 410);
    }

    #[test]
    fn test_duplicate_memo_families_within_window() {
        let user = Uuid::new_v4();
        let first = tx(
            user,
            TransactionType::Deposit,
            500,
            TransactionStatus::Completed,
            "Deposit 500 sats to Ganamos!",
        );
        let mut second = tx(
            user,
            TransactionType::Deposit,
            500,
            TransactionStatus::Completed,
            "Deposit of 500 sats",
        );
        second.created_at = first.created_at + Duration::minutes(2);

        let mut late = second.clone();
        late.id = Uuid::new_v4();
        late.memo = Some("Deposit of 500 sats".into());
        late.created_at = first.created_at + Duration::minutes(30);

        let report = find_duplicate_transactions(&[first.clone(), second.clone(), late]);
        assert_eq!(report.duplicate_pairs.len(), 1);
        assert_eq!(report.duplicate_pairs[0].first.id, first.id);
        assert_eq!(report.duplicate_pairs[0].second.id, second.id);
        assert!((report.duplicate_pairs[0].minutes_apart - 2.0).abs() < f64::EPSILON);
        // None of the completed deposits carry an invoice
        assert_eq!(report.deposits_without_invoice.len(), 3);
    }

    #[test]
    fn test_regular_deposits_are_not_duplicates() {
        let user = Uuid::new_v4();
        let mut a = tx(
            user,
            TransactionType::Deposit,
            100,
            TransactionStatus::Completed,
            "Deposit 100 sats to Ganamos!",
        );
        a.r_hash_str = Some("aa".into());
        a.payment_request = Some("lnbc".into());
        let mut b = a.clone();
        b.id = Uuid::new_v4();
        b.created_at = a.created_at + Duration::seconds(30);

        let report = find_duplicate_transactions(&[a, b]);
        assert!(report.is_clean());
    }

    #[test]
    fn test_identical_timestamps_grouped() {
        let a = tx(Uuid::new_v4(), TransactionType::Internal, -5, TransactionStatus::Completed, "t");
        let mut b = tx(Uuid::new_v4(), TransactionType::Internal, 5, TransactionStatus::Completed, "t");
        b.created_at = a.created_at;

        let report = find_duplicate_transactions(&[a, b]);
        assert_eq!(report.identical_timestamps.len(), 1);
        assert_eq!(report.identical_timestamps[0].transactions.len(), 2);
    }

    #[tokio::test]
    async fn test_activity_summary_window() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let mut old = tx(user, TransactionType::Deposit, 9_000, TransactionStatus::Completed, "d");
        old.created_at = now - Duration::hours(30);
        let rows = [
            old,
            tx(user, TransactionType::Deposit, 1_000, TransactionStatus::Completed, "d"),
            tx(user, TransactionType::Deposit, 500, TransactionStatus::Completed, "d"),
            tx(user, TransactionType::Deposit, 700, TransactionStatus::Pending, "d"),
            tx(user, TransactionType::Withdrawal, 300, TransactionStatus::Completed, "w"),
            tx(user, TransactionType::Withdrawal, 200, TransactionStatus::Failed, "w"),
            tx(user, TransactionType::Internal, -50, TransactionStatus::Completed, "t"),
            tx(Uuid::new_v4(), TransactionType::Internal, 50, TransactionStatus::Completed, "t"),
        ];
        for row in &rows {
            store.insert_transaction(row).await.unwrap();
        }

        let since = now - Duration::hours(DEFAULT_ACTIVITY_WINDOW_HOURS);
        let summary = activity_summary(&store, since).await.unwrap();
        assert_eq!(summary.transactions, 5);
        assert_eq!(summary.deposits, VolumeCount { count: 2, amount: 1_500 });
        assert_eq!(summary.withdrawals, VolumeCount { count: 1, amount: 300 });
        assert_eq!(summary.transfers, VolumeCount { count: 1, amount: 50 });

        let empty = activity_summary(&store, now + Duration::minutes(1)).await.unwrap();
        assert_eq!(empty.transactions, 0);
        assert_eq!(empty.deposits, VolumeCount::default());
    }

    #[tokio::test]
    async fn test_liquidity_summary() {
        let store = MemoryStore::new();
        let node = FakeLightningNode::new();
        node.set_node_balance(NodeBalance::new(10_000, 500, 2_000)).await;
        store.upsert_profile(&Profile::new(Uuid::new_v4(), "a", 4_000)).await.unwrap();
        store.upsert_profile(&Profile::new(Uuid::new_v4(), "b", 6_000)).await.unwrap();

        let summary = liquidity_summary(&store, &node).await.unwrap();
        assert_eq!(summary.node.total_balance, 12_500);
        assert_eq!(summary.app_total_balance, 10_000);
        assert_eq!(summary.difference, 2_500);
    }
}
