// In-memory ledger store
//
// All tables live behind a single lock so every trait method is atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Activity, Donation, DonationPool, DonationStatus, FundedPost, LedgerStore, Profile,
    StoreError, StoreResult, Transaction, TransactionFilter, TransactionStatus,
};

#[derive(Debug, Default)]
struct Tables {
    profiles: HashMap<Uuid, Profile>,
    transactions: Vec<Transaction>,
    activities: Vec<Activity>,
    posts: Vec<FundedPost>,
    pools: Vec<DonationPool>,
    donations: Vec<Donation>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activities recorded so far, oldest first
    pub async fn activities(&self) -> Vec<Activity> {
        self.tables.read().await.activities.clone()
    }

    /// Overwrite a balance without recording a transaction. Used to simulate
    /// drift in reconciliation tests.
    pub async fn force_balance(&self, user_id: Uuid, balance: i64) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let profile = tables
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))?;
        profile.balance = balance;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        Ok(self.tables.read().await.profiles.get(&user_id).cloned())
    }

    async fn list_profiles(&self, include_deleted: bool) -> StoreResult<Vec<Profile>> {
        let tables = self.tables.read().await;
        let mut profiles: Vec<Profile> = tables
            .profiles
            .values()
            .filter(|p| include_deleted || !p.is_deleted())
            .cloned()
            .collect();
        profiles.sort_by_key(|p| p.created_at);
        Ok(profiles)
    }

    async fn upsert_profile(&self, profile: &Profile) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .profiles
            .insert(profile.id, profile.clone());
        Ok(())
    }

    async fn adjust_balance(
        &self,
        user_id: Uuid,
        delta: i64,
        allow_negative: bool,
    ) -> StoreResult<i64> {
        let mut tables = self.tables.write().await;
        let profile = tables
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))?;

        let new_balance = profile.balance + delta;
        if new_balance < 0 && !allow_negative {
            return Err(StoreError::InsufficientBalance {
                available: profile.balance,
                requested: -delta,
            });
        }
        profile.balance = new_balance;
        profile.updated_at = Utc::now();
        Ok(new_balance)
    }

    async fn insert_transaction(&self, tx: &Transaction) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.transactions.iter().any(|t| t.id == tx.id) {
            return Err(StoreError::Conflict(format!("transaction {} already exists", tx.id)));
        }
        tables.transactions.push(tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn find_transaction_by_r_hash(&self, r_hash: &str) -> StoreResult<Option<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .find(|t| t.r_hash_str.as_deref() == Some(r_hash))
            .cloned())
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<Transaction>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Transaction> = tables
            .transactions
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        found.sort_by_key(|t| t.created_at);
        Ok(found)
    }

    async fn transition_transaction(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        payment_hash: Option<&str>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let tx = tables
            .transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", id)))?;

        if tx.status != from {
            return Ok(false);
        }
        tx.status = to;
        if let Some(hash) = payment_hash {
            tx.payment_hash = Some(hash.to_string());
        }
        tx.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_activity(&self, activity: &Activity) -> StoreResult<()> {
        self.tables.write().await.activities.push(activity.clone());
        Ok(())
    }

    async fn insert_funded_post(&self, post: &FundedPost) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables
            .posts
            .iter()
            .any(|p| p.funding_r_hash == post.funding_r_hash)
        {
            return Err(StoreError::Conflict(
                "Payment has already been used to create a post".to_string(),
            ));
        }
        tables.posts.push(post.clone());
        Ok(())
    }

    async fn find_post_by_funding_hash(&self, r_hash: &str) -> StoreResult<Option<FundedPost>> {
        let tables = self.tables.read().await;
        Ok(tables
            .posts
            .iter()
            .find(|p| p.funding_r_hash == r_hash)
            .cloned())
    }

    async fn find_or_create_pool(
        &self,
        location_type: &str,
        location_name: &str,
    ) -> StoreResult<DonationPool> {
        let mut tables = self.tables.write().await;
        if let Some(pool) = tables
            .pools
            .iter()
            .find(|p| p.location_type == location_type && p.location_name == location_name)
        {
            return Ok(pool.clone());
        }
        let pool = DonationPool::new(location_type, location_name);
        tables.pools.push(pool.clone());
        Ok(pool)
    }

    async fn get_pool(&self, pool_id: Uuid) -> StoreResult<Option<DonationPool>> {
        let tables = self.tables.read().await;
        Ok(tables.pools.iter().find(|p| p.id == pool_id).cloned())
    }

    async fn insert_donation(&self, donation: &Donation) -> StoreResult<()> {
        self.tables.write().await.donations.push(donation.clone());
        Ok(())
    }

    async fn find_donation_by_hash(&self, payment_hash: &str) -> StoreResult<Option<Donation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .donations
            .iter()
            .find(|d| d.payment_hash == payment_hash)
            .cloned())
    }

    async fn complete_donation(&self, payment_hash: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(donation) = tables
            .donations
            .iter_mut()
            .find(|d| d.payment_hash == payment_hash)
        else {
            return Err(StoreError::NotFound(format!("donation {}", payment_hash)));
        };

        if donation.status != DonationStatus::Pending {
            return Ok(false);
        }
        donation.status = DonationStatus::Completed;
        donation.completed_at = Some(Utc::now());
        let (pool_id, amount) = (donation.donation_pool_id, donation.amount);

        if let Some(pool) = tables.pools.iter_mut().find(|p| p.id == pool_id) {
            pool.total_donated += amount;
        }
        Ok(true)
    }
}
