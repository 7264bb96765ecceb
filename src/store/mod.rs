// Ledger Store
//
// Persistence seam for profiles, transactions, activities, funded posts and
// donations. Balance changes and status transitions are atomic at this level
// so that callers never read-modify-write a balance themselves.

pub mod memory;
pub mod model;
pub mod supabase;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use model::{
    Activity, Donation, DonationPool, DonationStatus, FundedPost, Profile, ProfileStatus,
    Transaction, TransactionFilter, TransactionStatus, TransactionType,
};
pub use supabase::SupabaseStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance { available: i64, requested: i64 },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to decode stored record: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>>;

    async fn list_profiles(&self, include_deleted: bool) -> StoreResult<Vec<Profile>>;

    async fn upsert_profile(&self, profile: &Profile) -> StoreResult<()>;

    /// Atomically add `delta` to the balance and return the new balance.
    /// Fails with `InsufficientBalance` without touching the row when
    /// `allow_negative` is false and the result would drop below zero.
    async fn adjust_balance(&self, user_id: Uuid, delta: i64, allow_negative: bool)
        -> StoreResult<i64>;

    async fn insert_transaction(&self, tx: &Transaction) -> StoreResult<()>;

    async fn get_transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>>;

    async fn find_transaction_by_r_hash(&self, r_hash: &str) -> StoreResult<Option<Transaction>>;

    /// Transactions matching `filter`, oldest first
    async fn list_transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<Transaction>>;

    /// Compare-and-set on status. Returns false when the row is no longer in `from`.
    async fn transition_transaction(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        payment_hash: Option<&str>,
    ) -> StoreResult<bool>;

    async fn insert_activity(&self, activity: &Activity) -> StoreResult<()>;

    /// Fails with `Conflict` when the funding hash was already used
    async fn insert_funded_post(&self, post: &FundedPost) -> StoreResult<()>;

    async fn find_post_by_funding_hash(&self, r_hash: &str) -> StoreResult<Option<FundedPost>>;

    async fn find_or_create_pool(
        &self,
        location_type: &str,
        location_name: &str,
    ) -> StoreResult<DonationPool>;

    async fn get_pool(&self, pool_id: Uuid) -> StoreResult<Option<DonationPool>>;

    async fn insert_donation(&self, donation: &Donation) -> StoreResult<()>;

    async fn find_donation_by_hash(&self, payment_hash: &str) -> StoreResult<Option<Donation>>;

    /// Pending to completed compare-and-set; adds the amount to the pool total
    /// when it wins.
    async fn complete_donation(&self, payment_hash: &str) -> StoreResult<bool>;
}
