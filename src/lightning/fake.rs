// Fake Lightning Node
//
// In-memory backend that issues real signed regtest invoices. Used when
// LIGHTNING_BACKEND=fake and by the test-suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use chrono::Utc;
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::invoice::decode_invoice;
use super::{
    CreatedInvoice, InvoiceState, InvoiceStatus, LightningBackend, LightningError, NodeBalance,
    NodeInfo, PaymentResult,
};

const FAKE_NODE_KEY: [u8; 32] = [
    0xe1, 0x26, 0xf6, 0x8f, 0x7e, 0xaf, 0xcc, 0x8b, 0x74, 0xf5, 0x4d, 0x26, 0x9f, 0xe2, 0x06, 0xbe,
    0x71, 0x50, 0x00, 0xf9, 0x4d, 0xac, 0x06, 0x7d, 0x1c, 0x04, 0xa8, 0xca, 0x3b, 0x2d, 0xb7, 0x34,
];

/// Build a signed regtest invoice for `preimage`. Returns the payment request
/// and the hex payment hash.
pub fn build_signed_invoice(
    amount_sats: Option<u64>,
    memo: &str,
    preimage: &[u8; 32],
    expiry_secs: u64,
) -> Result<(String, String), LightningError> {
    let private_key = SecretKey::from_slice(&FAKE_NODE_KEY)
        .map_err(|e| LightningError::Config(format!("Invalid fake node key: {}", e)))?;
    let payment_hash = sha256::Hash::hash(preimage);

    let mut builder = InvoiceBuilder::new(Currency::Regtest)
        .description(memo.to_string())
        .payment_hash(payment_hash)
        .payment_secret(PaymentSecret([42u8; 32]))
        .current_timestamp()
        .min_final_cltv_expiry_delta(144)
        .expiry_time(Duration::from_secs(expiry_secs));

    if let Some(sats) = amount_sats {
        let msats = sats
            .checked_mul(1000)
            .ok_or_else(|| LightningError::InvalidInvoice(format!("{} sats is out of range", sats)))?;
        builder = builder.amount_milli_satoshis(msats);
    }

    let invoice = builder
        .build_signed(|hash| Secp256k1::new().sign_ecdsa_recoverable(hash, &private_key))
        .map_err(|e| LightningError::InvalidInvoice(format!("{:?}", e)))?;

    Ok((invoice.to_string(), hex::encode(payment_hash.to_byte_array())))
}

#[derive(Debug, Clone)]
struct FakeInvoice {
    amount_sats: Option<u64>,
    preimage: [u8; 32],
    state: InvoiceState,
    amount_paid_sats: u64,
    created_at: i64,
    settled_at: i64,
}

/// Outgoing payment recorded by the fake node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPayment {
    pub payment_request: String,
    pub payment_hash: String,
    pub amount_sats: u64,
}

#[derive(Debug)]
pub struct FakeLightningNode {
    invoices: RwLock<HashMap<String, FakeInvoice>>,
    outgoing: RwLock<Vec<OutgoingPayment>>,
    balance: RwLock<NodeBalance>,
    fail_payments: AtomicBool,
}

impl Default for FakeLightningNode {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLightningNode {
    pub fn new() -> Self {
        Self {
            invoices: RwLock::new(HashMap::new()),
            outgoing: RwLock::new(Vec::new()),
            balance: RwLock::new(NodeBalance::new(1_000_000, 0, 0)),
            fail_payments: AtomicBool::new(false),
        }
    }

    /// Mark an invoice as paid in full. Returns the hex preimage, which a
    /// real payer would learn from the payment.
    pub async fn settle(&self, r_hash: &str) -> Option<String> {
        let mut invoices = self.invoices.write().await;
        let invoice = invoices.get_mut(r_hash)?;
        if invoice.state == InvoiceState::Open {
            invoice.state = InvoiceState::Settled;
            invoice.amount_paid_sats = invoice.amount_sats.unwrap_or(0);
            invoice.settled_at = Utc::now().timestamp();
            info!(r_hash = %r_hash, "Fake invoice settled");
        }
        Some(hex::encode(invoice.preimage))
    }

    pub async fn cancel(&self, r_hash: &str) -> bool {
        let mut invoices = self.invoices.write().await;
        match invoices.get_mut(r_hash) {
            Some(invoice) if invoice.state == InvoiceState::Open => {
                invoice.state = InvoiceState::Canceled;
                true
            }
            _ => false,
        }
    }

    pub fn set_fail_payments(&self, fail: bool) {
        self.fail_payments.store(fail, Ordering::SeqCst);
    }

    pub async fn set_node_balance(&self, balance: NodeBalance) {
        *self.balance.write().await = balance;
    }

    pub async fn outgoing_payments(&self) -> Vec<OutgoingPayment> {
        self.outgoing.read().await.clone()
    }

    /// Create an invoice whose preimage the caller already knows
    pub async fn create_invoice_with_preimage(
        &self,
        amount_sats: u64,
        memo: &str,
        preimage: [u8; 32],
        expiry_secs: u64,
    ) -> Result<CreatedInvoice, LightningError> {
        let (payment_request, r_hash) =
            build_signed_invoice(Some(amount_sats), memo, &preimage, expiry_secs)?;

        let mut invoices = self.invoices.write().await;
        invoices.insert(
            r_hash.clone(),
            FakeInvoice {
                amount_sats: Some(amount_sats),
                preimage,
                state: InvoiceState::Open,
                amount_paid_sats: 0,
                created_at: Utc::now().timestamp(),
                settled_at: 0,
            },
        );
        let add_index = invoices.len() as u64;

        debug!(r_hash = %r_hash, amount_sats, "Fake invoice created");

        Ok(CreatedInvoice {
            payment_request,
            r_hash,
            add_index: Some(add_index),
        })
    }
}

#[async_trait]
impl LightningBackend for FakeLightningNode {
    async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<CreatedInvoice, LightningError> {
        let mut preimage = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut preimage);
        self.create_invoice_with_preimage(amount_sats, memo, preimage, expiry_secs)
            .await
    }

    async fn check_invoice(&self, r_hash: &str) -> Result<InvoiceStatus, LightningError> {
        let invoices = self.invoices.read().await;
        let invoice = invoices.get(r_hash).ok_or(LightningError::UnknownInvoice)?;
        let settled = invoice.state == InvoiceState::Settled;

        Ok(InvoiceStatus {
            settled,
            amount_paid_sats: invoice.amount_paid_sats,
            state: invoice.state,
            creation_date: invoice.created_at,
            settle_date: invoice.settled_at,
            preimage: settled.then(|| hex::encode(invoice.preimage)),
        })
    }

    async fn pay_invoice(
        &self,
        payment_request: &str,
        amount_sats: Option<u64>,
    ) -> Result<PaymentResult, LightningError> {
        let decoded = decode_invoice(payment_request)?;
        let amount = decoded.amount_sats.or(amount_sats).ok_or_else(|| {
            LightningError::PaymentFailed("amount must be specified for amountless invoice".into())
        })?;

        if self.fail_payments.load(Ordering::SeqCst) {
            return Err(LightningError::PaymentFailed("no route found".into()));
        }

        // Paying one of our own invoices settles it
        let preimage = {
            let mut invoices = self.invoices.write().await;
            match invoices.get_mut(&decoded.payment_hash) {
                Some(own) if own.state == InvoiceState::Settled => {
                    return Err(LightningError::PaymentFailed("invoice is already paid".into()));
                }
                Some(own) => {
                    own.state = InvoiceState::Settled;
                    own.amount_paid_sats = amount;
                    own.settled_at = Utc::now().timestamp();
                    Some(hex::encode(own.preimage))
                }
                None => None,
            }
        };

        self.outgoing.write().await.push(OutgoingPayment {
            payment_request: payment_request.to_string(),
            payment_hash: decoded.payment_hash.clone(),
            amount_sats: amount,
        });

        Ok(PaymentResult {
            payment_hash: decoded.payment_hash,
            preimage,
            fee_sats: 0,
        })
    }

    async fn node_info(&self) -> Result<NodeInfo, LightningError> {
        let secp = Secp256k1::new();
        let key = SecretKey::from_slice(&FAKE_NODE_KEY)
            .map_err(|e| LightningError::Config(format!("Invalid fake node key: {}", e)))?;

        Ok(NodeInfo {
            pubkey: key.public_key(&secp).to_string(),
            alias: "ganamos-fake".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            synced_to_chain: true,
            block_height: 0,
        })
    }

    async fn node_balance(&self) -> Result<NodeBalance, LightningError> {
        Ok(*self.balance.read().await)
    }
}
