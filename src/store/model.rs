// Ledger records, shaped like the rows of the Supabase tables they mirror

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    #[default]
    Active,
    Deleted,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Custodial balance in sats
    pub balance: i64,
    /// Older rows predate the column and carry `null`
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub status: ProfileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(id: Uuid, name: impl Into<String>, balance: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: None,
            name: Some(name.into()),
            balance,
            status: ProfileStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == ProfileStatus::Deleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Internal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

/// A ledger movement. Deposits and withdrawals carry positive amounts,
/// internal transfers are signed (negative for the sender).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub amount: i64,
    pub status: TransactionStatus,
    #[serde(default)]
    pub r_hash_str: Option<String>,
    #[serde(default)]
    pub payment_request: Option<String>,
    #[serde(default)]
    pub payment_hash: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        user_id: Uuid,
        tx_type: TransactionType,
        amount: i64,
        status: TransactionStatus,
        memo: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            tx_type,
            amount,
            status,
            r_hash_str: None,
            payment_request: None,
            payment_hash: None,
            memo: Some(memo.into()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filter for `list_transactions`; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<TransactionStatus>,
    pub tx_type: Option<TransactionType>,
    /// Only rows created at or after this instant
    pub created_since: Option<DateTime<Utc>>,
}

impl TransactionFilter {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn pending_deposits() -> Self {
        Self {
            status: Some(TransactionStatus::Pending),
            tx_type: Some(TransactionType::Deposit),
            ..Default::default()
        }
    }

    pub fn completed_since(since: DateTime<Utc>) -> Self {
        Self {
            status: Some(TransactionStatus::Completed),
            created_since: Some(since),
            ..Default::default()
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        self.user_id.map_or(true, |id| tx.user_id == id)
            && self.status.map_or(true, |s| tx.status == s)
            && self.tx_type.map_or(true, |t| tx.tx_type == t)
            && self.created_since.map_or(true, |since| tx.created_at >= since)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub related_id: Option<Uuid>,
    pub related_table: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl Activity {
    pub fn for_transaction(tx: &Transaction, metadata: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: tx.user_id,
            activity_type: tx.tx_type.as_str().to_string(),
            related_id: Some(tx.id),
            related_table: Some("transactions".to_string()),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// Anonymous post paid for through L402
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundedPost {
    pub id: Uuid,
    pub title: Option<String>,
    pub description: String,
    pub reward: i64,
    pub image_url: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city: Option<String>,
    pub funding_r_hash: String,
    pub funding_status: String,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationPool {
    pub id: Uuid,
    pub location_type: String,
    pub location_name: String,
    pub boost_percentage: i64,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub total_donated: i64,
    pub created_at: DateTime<Utc>,
}

impl DonationPool {
    pub const DEFAULT_BOOST_PERCENTAGE: i64 = 10;

    pub fn new(location_type: &str, location_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            location_type: location_type.to_string(),
            location_name: location_name.to_string(),
            boost_percentage: Self::DEFAULT_BOOST_PERCENTAGE,
            total_donated: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: Uuid,
    pub donation_pool_id: Uuid,
    pub amount: i64,
    pub payment_request: String,
    pub payment_hash: String,
    pub status: DonationStatus,
    pub donor_name: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
