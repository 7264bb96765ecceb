// Lightning Backend
//
// Abstracts the node that custodies user funds (LND over REST in production,
// an in-memory fake for development and tests).

pub mod fake;
pub mod invoice;
pub mod lnd;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fake::FakeLightningNode;
pub use lnd::LndRestClient;

/// Lightning backend errors
#[derive(Debug, Error)]
pub enum LightningError {
    /// Node connection settings are missing or malformed
    #[error("Lightning configuration error: {0}")]
    Config(String),
    /// Transport level failure talking to the node
    #[error("Failed to communicate with Lightning node: {0}")]
    Http(#[from] reqwest::Error),
    /// Node answered with a JSON error
    #[error("LND API error ({status}): {body}")]
    Api { status: u16, body: String },
    /// Reply we could not interpret. For payments the outcome is unknown.
    #[error("Invalid response from Lightning node: {0}")]
    InvalidResponse(String),
    /// Outgoing payment was rejected by the node
    #[error("Payment failed: {0}")]
    PaymentFailed(String),
    /// Invoice could not be decoded
    #[error("Invalid invoice: {0}")]
    InvalidInvoice(String),
    /// Node does not know the invoice
    #[error("Unknown invoice")]
    UnknownInvoice,
}

/// Invoice freshly created on the node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedInvoice {
    pub payment_request: String,
    /// Payment hash, lowercase hex
    pub r_hash: String,
    pub add_index: Option<u64>,
}

/// LND invoice state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceState {
    Open,
    Settled,
    Canceled,
    Accepted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceStatus {
    pub settled: bool,
    pub amount_paid_sats: u64,
    pub state: InvoiceState,
    pub creation_date: i64,
    pub settle_date: i64,
    /// Hex preimage, only revealed once the invoice is settled
    pub preimage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResult {
    pub payment_hash: String,
    pub preimage: Option<String>,
    pub fee_sats: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub pubkey: String,
    pub alias: String,
    pub version: String,
    pub synced_to_chain: bool,
    pub block_height: u32,
}

/// Balances held by the node, in sats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBalance {
    pub channel_balance: i64,
    pub pending_balance: i64,
    pub onchain_balance: i64,
    pub total_balance: i64,
}

impl NodeBalance {
    pub fn new(channel_balance: i64, pending_balance: i64, onchain_balance: i64) -> Self {
        Self {
            channel_balance,
            pending_balance,
            onchain_balance,
            total_balance: channel_balance + pending_balance + onchain_balance,
        }
    }
}

#[async_trait]
pub trait LightningBackend: Send + Sync {
    /// Create an invoice for `amount_sats`
    async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<CreatedInvoice, LightningError>;

    /// Look up an invoice by its hex payment hash
    async fn check_invoice(&self, r_hash: &str) -> Result<InvoiceStatus, LightningError>;

    /// Pay a BOLT11 invoice. `amount_sats` is only used for amountless invoices.
    async fn pay_invoice(
        &self,
        payment_request: &str,
        amount_sats: Option<u64>,
    ) -> Result<PaymentResult, LightningError>;

    async fn node_info(&self) -> Result<NodeInfo, LightningError>;

    /// Channel, pending and on-chain balances
    async fn node_balance(&self) -> Result<NodeBalance, LightningError>;
}
