// Location donation pools funded by Lightning invoices

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::lightning::LightningBackend;
use crate::store::{Donation, DonationPool, DonationStatus, LedgerStore};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationRequest {
    pub amount: i64,
    pub location_type: String,
    pub location_name: String,
    #[serde(default)]
    pub donor_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationInvoice {
    pub payment_request: String,
    pub payment_hash: String,
    pub pool_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationState {
    pub donation: Donation,
    pub pool: Option<DonationPool>,
    pub settled: bool,
}

#[derive(Clone)]
pub struct DonationService {
    store: Arc<dyn LedgerStore>,
    lightning: Arc<dyn LightningBackend>,
    invoice_expiry_secs: u64,
}

impl DonationService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        lightning: Arc<dyn LightningBackend>,
        invoice_expiry_secs: u64,
    ) -> Self {
        Self {
            store,
            lightning,
            invoice_expiry_secs,
        }
    }

    pub async fn create_donation_invoice(
        &self,
        request: DonationRequest,
    ) -> LedgerResult<DonationInvoice> {
        if request.amount <= 0 {
            return Err(LedgerError::invalid("Amount must be a positive number of sats"));
        }
        let location_type = request.location_type.trim();
        let location_name = request.location_name.trim();
        if location_type.is_empty() || location_name.is_empty() {
            return Err(LedgerError::invalid("Location type and name are required"));
        }

        let pool = self
            .store
            .find_or_create_pool(location_type, location_name)
            .await?;

        let memo = format!("Donation to {} ({} sats)", location_name, request.amount);
        let invoice = self
            .lightning
            .create_invoice(request.amount as u64, &memo, self.invoice_expiry_secs)
            .await?;

        let donation = Donation {
            id: Uuid::new_v4(),
            donation_pool_id: pool.id,
            amount: request.amount,
            payment_request: invoice.payment_request.clone(),
            payment_hash: invoice.r_hash.clone(),
            status: DonationStatus::Pending,
            donor_name: request.donor_name,
            message: request.message,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.store.insert_donation(&donation).await?;

        info!(pool_id = %pool.id, amount = request.amount, location = %location_name, "Donation invoice created");

        Ok(DonationInvoice {
            payment_request: invoice.payment_request,
            payment_hash: invoice.r_hash,
            pool_id: pool.id,
        })
    }

    /// Look up a donation, completing it when its invoice has been paid
    pub async fn check_donation_status(&self, payment_hash: &str) -> LedgerResult<DonationState> {
        let mut donation = self
            .store
            .find_donation_by_hash(payment_hash)
            .await?
            .ok_or_else(|| LedgerError::NotFound("Donation not found".to_string()))?;

        if donation.status == DonationStatus::Pending {
            let invoice = self.lightning.check_invoice(payment_hash).await?;
            if invoice.settled {
                if self.store.complete_donation(payment_hash).await? {
                    info!(pool_id = %donation.donation_pool_id, amount = donation.amount, "Donation completed");
                }
                if let Some(updated) = self.store.find_donation_by_hash(payment_hash).await? {
                    donation = updated;
                }
            }
        }

        let pool = self.store.get_pool(donation.donation_pool_id).await?;
        Ok(DonationState {
            settled: donation.status == DonationStatus::Completed,
            donation,
            pool,
        })
    }
}
