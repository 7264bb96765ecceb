// Supabase ledger store
//
// Talks to PostgREST (`rest/v1/<table>`) with the service-role key. Status
// transitions are conditional PATCHes that only succeed when a row comes
// back; balance changes go through the `adjust_balance` RPC with an
// optimistic compare-and-set fallback.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::{
    Activity, Donation, DonationPool, DonationStatus, FundedPost, LedgerStore, Profile,
    StoreError, StoreResult, Transaction, TransactionFilter, TransactionStatus,
};
use crate::config::SupabaseConfig;

const PAGE_SIZE: usize = 1000;
const MAX_CAS_RETRIES: usize = 5;

/// Percent-encode a filter value. PostgREST reads `+` literally, so spaces
/// become `%20`.
fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[derive(Debug, Deserialize)]
struct BalanceRow {
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct PoolTotalRow {
    total_donated: i64,
}

/// Build the PostgREST query for a transaction filter
fn transaction_query(filter: &TransactionFilter) -> String {
    let mut query = String::from("rest/v1/transactions?select=*");
    if let Some(user_id) = filter.user_id {
        query.push_str(&format!("&user_id=eq.{}", user_id));
    }
    if let Some(status) = filter.status {
        query.push_str(&format!("&status=eq.{}", status.as_str()));
    }
    if let Some(tx_type) = filter.tx_type {
        query.push_str(&format!("&type=eq.{}", tx_type.as_str()));
    }
    if let Some(since) = filter.created_since {
        query.push_str(&format!("&created_at=gte.{}", url_encode(&since.to_rfc3339())));
    }
    query.push_str("&order=created_at.asc");
    query
}

fn is_missing_function(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND || body.contains("PGRST202")
}

pub struct SupabaseStore {
    client: Client,
    url: Url,
    api_key: String,
}

impl Debug for SupabaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseStore")
            .field("url", &self.url.as_str())
            .finish()
    }
}

impl SupabaseStore {
    pub fn new(config: &SupabaseConfig) -> StoreResult<Self> {
        let url = Url::parse(&format!("{}/", config.url.trim_end_matches('/')))
            .map_err(|e| StoreError::Backend(format!("Invalid SUPABASE_URL: {}", e)))?;

        Ok(Self {
            client: Client::new(),
            url,
            api_key: config.service_role_key.clone(),
        })
    }

    fn join_url(&self, path: &str) -> StoreResult<Url> {
        self.url
            .join(path)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn get_request(&self, path: &str) -> StoreResult<(StatusCode, String)> {
        let url = self.join_url(path)?;
        debug!(method = "GET", url = %url, "Supabase request");

        let res = self
            .client
            .get(url.clone())
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        debug!(method = "GET", url = %url, status = %status, "Supabase response");
        Ok((status, text))
    }

    async fn post_request<T: Serialize + Debug + ?Sized>(
        &self,
        path: &str,
        body: &T,
        prefer: &str,
    ) -> StoreResult<(StatusCode, String)> {
        let url = self.join_url(path)?;
        debug!(method = "POST", url = %url, "Supabase request");

        let res = self
            .client
            .post(url.clone())
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", prefer)
            .json(body)
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        debug!(method = "POST", url = %url, status = %status, "Supabase response");
        Ok((status, text))
    }

    /// PATCH returning the updated rows
    async fn patch_request<T: Serialize + Debug + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> StoreResult<(StatusCode, String)> {
        let url = self.join_url(path)?;
        debug!(method = "PATCH", url = %url, "Supabase request");

        let res = self
            .client
            .patch(url.clone())
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        debug!(method = "PATCH", url = %url, status = %status, "Supabase response");
        Ok((status, text))
    }

    fn check_status(operation: &str, status: StatusCode, text: &str) -> StoreResult<()> {
        if status == StatusCode::CONFLICT {
            return Err(StoreError::Conflict(format!("{}: duplicate row", operation)));
        }
        if !status.is_success() {
            return Err(StoreError::Backend(format!(
                "{} failed: HTTP {} - {}",
                operation, status, text
            )));
        }
        Ok(())
    }

    fn parse_rows<T: DeserializeOwned>(text: &str) -> StoreResult<Vec<T>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(text)?)
    }

    async fn select<T: DeserializeOwned>(&self, operation: &str, path: &str) -> StoreResult<Vec<T>> {
        let (status, text) = self.get_request(path).await?;
        Self::check_status(operation, status, &text)?;
        Self::parse_rows(&text)
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
    ) -> StoreResult<Option<T>> {
        Ok(self.select(operation, path).await?.into_iter().next())
    }

    /// Page through a query that may exceed the PostgREST row limit
    async fn select_all<T: DeserializeOwned>(&self, operation: &str, path: &str) -> StoreResult<Vec<T>> {
        let mut rows = Vec::new();
        let mut offset = 0;
        loop {
            let page: Vec<T> = self
                .select(
                    operation,
                    &format!("{}&limit={}&offset={}", path, PAGE_SIZE, offset),
                )
                .await?;
            let len = page.len();
            rows.extend(page);
            if len < PAGE_SIZE {
                return Ok(rows);
            }
            offset += PAGE_SIZE;
        }
    }

    async fn insert<T: Serialize + Debug>(&self, operation: &str, table: &str, row: &T) -> StoreResult<()> {
        let (status, text) = self
            .post_request(&format!("rest/v1/{}", table), row, "return=minimal")
            .await?;
        Self::check_status(operation, status, &text)
    }

    /// Optimistic read-compare-write used when the RPC is not installed
    async fn adjust_balance_optimistic(
        &self,
        user_id: Uuid,
        delta: i64,
        allow_negative: bool,
    ) -> StoreResult<i64> {
        for attempt in 0..MAX_CAS_RETRIES {
            let current: BalanceRow = self
                .select_one(
                    "get balance",
                    &format!("rest/v1/profiles?id=eq.{}&select=balance", user_id),
                )
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("profile {}", user_id)))?;

            let new_balance = current.balance + delta;
            if new_balance < 0 && !allow_negative {
                return Err(StoreError::InsufficientBalance {
                    available: current.balance,
                    requested: -delta,
                });
            }

            let body = serde_json::json!({
                "balance": new_balance,
                "updated_at": Utc::now(),
            });
            let (status, text) = self
                .patch_request(
                    &format!(
                        "rest/v1/profiles?id=eq.{}&balance=eq.{}",
                        user_id, current.balance
                    ),
                    &body,
                )
                .await?;
            Self::check_status("adjust balance", status, &text)?;

            if !Self::parse_rows::<BalanceRow>(&text)?.is_empty() {
                return Ok(new_balance);
            }
            debug!(user_id = %user_id, attempt, "Balance changed concurrently, retrying");
        }

        Err(StoreError::Backend(format!(
            "balance update for {} lost {} consecutive races",
            user_id, MAX_CAS_RETRIES
        )))
    }

    async fn add_to_pool_total(&self, pool_id: Uuid, amount: i64) -> StoreResult<()> {
        for _ in 0..MAX_CAS_RETRIES {
            let current: PoolTotalRow = self
                .select_one(
                    "get pool total",
                    &format!("rest/v1/donation_pools?id=eq.{}&select=total_donated", pool_id),
                )
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("donation pool {}", pool_id)))?;

            let body = serde_json::json!({ "total_donated": current.total_donated + amount });
            let (status, text) = self
                .patch_request(
                    &format!(
                        "rest/v1/donation_pools?id=eq.{}&total_donated=eq.{}",
                        pool_id, current.total_donated
                    ),
                    &body,
                )
                .await?;
            Self::check_status("update pool total", status, &text)?;
            if !Self::parse_rows::<PoolTotalRow>(&text)?.is_empty() {
                return Ok(());
            }
        }
        Err(StoreError::Backend(format!(
            "pool total update for {} lost {} consecutive races",
            pool_id, MAX_CAS_RETRIES
        )))
    }
}

#[async_trait]
impl LedgerStore for SupabaseStore {
    async fn get_profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        self.select_one("get profile", &format!("rest/v1/profiles?id=eq.{}&select=*", user_id))
            .await
    }

    async fn list_profiles(&self, include_deleted: bool) -> StoreResult<Vec<Profile>> {
        let mut path = String::from("rest/v1/profiles?select=*&order=created_at.asc");
        if !include_deleted {
            path.push_str("&or=(status.is.null,status.neq.deleted)");
        }
        self.select_all("list profiles", &path).await
    }

    async fn upsert_profile(&self, profile: &Profile) -> StoreResult<()> {
        let (status, text) = self
            .post_request(
                "rest/v1/profiles?on_conflict=id",
                profile,
                "resolution=merge-duplicates",
            )
            .await?;
        Self::check_status("upsert profile", status, &text)
    }

    async fn adjust_balance(
        &self,
        user_id: Uuid,
        delta: i64,
        allow_negative: bool,
    ) -> StoreResult<i64> {
        let body = serde_json::json!({
            "p_user_id": user_id,
            "p_delta": delta,
            "p_allow_negative": allow_negative,
        });
        let (status, text) = self
            .post_request("rest/v1/rpc/adjust_balance", &body, "return=representation")
            .await?;

        if status.is_success() {
            return serde_json::from_str::<i64>(text.trim()).map_err(|e| {
                StoreError::Backend(format!("Failed to parse balance response '{}': {}", text, e))
            });
        }

        if text.contains("insufficient_balance") {
            let available = self
                .get_profile(user_id)
                .await?
                .map(|p| p.balance)
                .unwrap_or(0);
            return Err(StoreError::InsufficientBalance {
                available,
                requested: -delta,
            });
        }

        if is_missing_function(status, &text) {
            warn!(
                "RPC adjust_balance unavailable (HTTP {}), falling back to optimistic update",
                status
            );
            return self
                .adjust_balance_optimistic(user_id, delta, allow_negative)
                .await;
        }

        Err(StoreError::Backend(format!(
            "adjust_balance failed: HTTP {} - {}",
            status, text
        )))
    }

    async fn insert_transaction(&self, tx: &Transaction) -> StoreResult<()> {
        self.insert("insert transaction", "transactions", tx).await
    }

    async fn get_transaction(&self, id: Uuid) -> StoreResult<Option<Transaction>> {
        self.select_one(
            "get transaction",
            &format!("rest/v1/transactions?id=eq.{}&select=*", id),
        )
        .await
    }

    async fn find_transaction_by_r_hash(&self, r_hash: &str) -> StoreResult<Option<Transaction>> {
        self.select_one(
            "find transaction",
            &format!(
                "rest/v1/transactions?r_hash_str=eq.{}&select=*&limit=1",
                url_encode(r_hash)
            ),
        )
        .await
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<Transaction>> {
        self.select_all("list transactions", &transaction_query(filter))
            .await
    }

    async fn transition_transaction(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        payment_hash: Option<&str>,
    ) -> StoreResult<bool> {
        let mut body = serde_json::json!({
            "status": to,
            "updated_at": Utc::now(),
        });
        if let Some(hash) = payment_hash {
            body["payment_hash"] = serde_json::Value::String(hash.to_string());
        }

        let (status, text) = self
            .patch_request(
                &format!(
                    "rest/v1/transactions?id=eq.{}&status=eq.{}",
                    id,
                    from.as_str()
                ),
                &body,
            )
            .await?;
        Self::check_status("transition transaction", status, &text)?;

        if !Self::parse_rows::<Transaction>(&text)?.is_empty() {
            return Ok(true);
        }
        match self.get_transaction(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("transaction {}", id))),
        }
    }

    async fn insert_activity(&self, activity: &Activity) -> StoreResult<()> {
        self.insert("insert activity", "activities", activity).await
    }

    async fn insert_funded_post(&self, post: &FundedPost) -> StoreResult<()> {
        if self.find_post_by_funding_hash(&post.funding_r_hash).await?.is_some() {
            return Err(StoreError::Conflict(
                "Payment has already been used to create a post".to_string(),
            ));
        }
        self.insert("insert post", "posts", post)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => StoreError::Conflict(
                    "Payment has already been used to create a post".to_string(),
                ),
                other => other,
            })
    }

    async fn find_post_by_funding_hash(&self, r_hash: &str) -> StoreResult<Option<FundedPost>> {
        self.select_one(
            "find post",
            &format!(
                "rest/v1/posts?funding_r_hash=eq.{}&select=*&limit=1",
                url_encode(r_hash)
            ),
        )
        .await
    }

    async fn find_or_create_pool(
        &self,
        location_type: &str,
        location_name: &str,
    ) -> StoreResult<DonationPool> {
        let path = format!(
            "rest/v1/donation_pools?location_type=eq.{}&location_name=eq.{}&select=*&limit=1",
            url_encode(location_type),
            url_encode(location_name)
        );
        if let Some(pool) = self.select_one("find pool", &path).await? {
            return Ok(pool);
        }

        let pool = DonationPool::new(location_type, location_name);
        let (status, text) = self
            .post_request("rest/v1/donation_pools", &pool, "return=representation")
            .await?;

        if status == StatusCode::CONFLICT {
            // Created concurrently by another request
            return self
                .select_one("find pool", &path)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("donation pool {}", location_name)));
        }
        Self::check_status("create pool", status, &text)?;

        Ok(Self::parse_rows::<DonationPool>(&text)?
            .into_iter()
            .next()
            .unwrap_or(pool))
    }

    async fn get_pool(&self, pool_id: Uuid) -> StoreResult<Option<DonationPool>> {
        self.select_one(
            "get pool",
            &format!("rest/v1/donation_pools?id=eq.{}&select=*", pool_id),
        )
        .await
    }

    async fn insert_donation(&self, donation: &Donation) -> StoreResult<()> {
        self.insert("insert donation", "donations", donation).await
    }

    async fn find_donation_by_hash(&self, payment_hash: &str) -> StoreResult<Option<Donation>> {
        self.select_one(
            "find donation",
            &format!(
                "rest/v1/donations?payment_hash=eq.{}&select=*&limit=1",
                url_encode(payment_hash)
            ),
        )
        .await
    }

    async fn complete_donation(&self, payment_hash: &str) -> StoreResult<bool> {
        let body = serde_json::json!({
            "status": DonationStatus::Completed,
            "completed_at": Utc::now(),
        });
        let (status, text) = self
            .patch_request(
                &format!(
                    "rest/v1/donations?payment_hash=eq.{}&status=eq.pending",
                    url_encode(payment_hash)
                ),
                &body,
            )
            .await?;
        Self::check_status("complete donation", status, &text)?;

        let Some(donation) = Self::parse_rows::<Donation>(&text)?.into_iter().next() else {
            return match self.find_donation_by_hash(payment_hash).await? {
                Some(_) => Ok(false),
                None => Err(StoreError::NotFound(format!("donation {}", payment_hash))),
            };
        };

        self.add_to_pool_total(donation.donation_pool_id, donation.amount)
            .await?;
        Ok(true)
    }
}
