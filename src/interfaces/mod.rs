// Ganamos Service Interfaces
//
// Wires configuration into the store, the Lightning backend and the
// services shared by the HTTP interface and the deposit poller.

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::FromRef;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::auth::AuthKeys;
use crate::config::{BackendConfig, LightningBackendKind, ServiceConfig, StoreBackendKind};
use crate::donations::DonationService;
use crate::l402::L402Service;
use crate::lightning::{FakeLightningNode, LightningBackend, LndRestClient};
use crate::posts::PostsService;
use crate::price::PriceService;
use crate::store::{LedgerStore, MemoryStore, SupabaseStore};
use crate::wallet::WalletService;

/// Everything a request handler may need
#[derive(Clone)]
pub struct AppState {
    pub wallet: WalletService,
    pub posts: PostsService,
    pub donations: DonationService,
    pub price: PriceService,
    pub store: Arc<dyn LedgerStore>,
    pub lightning: Arc<dyn LightningBackend>,
    pub auth: AuthKeys,
}

impl AppState {
    pub fn new(
        config: &ServiceConfig,
        store: Arc<dyn LedgerStore>,
        lightning: Arc<dyn LightningBackend>,
    ) -> Self {
        let l402 = L402Service::new(
            lightning.clone(),
            config.l402_root_key.clone(),
            config.l402_service.clone(),
            config.invoice_expiry_secs,
        );

        Self {
            wallet: WalletService::new(store.clone(), lightning.clone(), config.invoice_expiry_secs),
            posts: PostsService::new(l402, store.clone()),
            donations: DonationService::new(
                store.clone(),
                lightning.clone(),
                config.invoice_expiry_secs,
            ),
            price: PriceService::new(config.coinmarketcap_api_key.clone()),
            store,
            lightning,
            auth: AuthKeys::new(config.jwt_secret.clone(), config.admin_api_key.clone()),
        }
    }
}

impl FromRef<AppState> for AuthKeys {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Build the Lightning backend selected by the configuration
pub fn build_lightning(config: &BackendConfig) -> Result<Arc<dyn LightningBackend>> {
    match config.lightning_backend {
        LightningBackendKind::Lnd => {
            let lnd = config
                .lightning
                .as_ref()
                .context("LND backend selected but no LND configuration present")?;
            let client = LndRestClient::new(&lnd.rest_url, &lnd.macaroon, lnd.tls_skip_verify)
                .context("Failed to build LND REST client")?;
            info!("⚡ Using LND node at {}", lnd.rest_url);
            Ok(Arc::new(client))
        }
        LightningBackendKind::Fake => {
            warn!("⚠️  Using the fake Lightning node, invoices are not real");
            Ok(Arc::new(FakeLightningNode::new()))
        }
    }
}

/// Build the ledger store selected by the configuration
pub fn build_store(config: &BackendConfig) -> Result<Arc<dyn LedgerStore>> {
    match config.store_backend {
        StoreBackendKind::Supabase => {
            let supabase = config
                .supabase
                .as_ref()
                .context("Supabase store selected but SUPABASE_URL is not set")?;
            let store = SupabaseStore::new(supabase).context("Failed to build Supabase store")?;
            info!("🗄️  Using Supabase ledger at {}", supabase.url);
            Ok(Arc::new(store))
        }
        StoreBackendKind::Memory => {
            warn!("⚠️  Using the in-memory ledger, balances are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Periodically settle pending deposits whose invoices have been paid
pub fn spawn_deposit_poller(wallet: WalletService, interval: Duration) -> JoinHandle<()> {
    info!("🔁 Deposit poller running every {}s", interval.as_secs());
    tokio::spawn(async move {
        loop {
            sleep(interval).await;

            match wallet.settle_pending_deposits().await {
                Ok(summary) if summary.settled > 0 || summary.failed > 0 || summary.errors > 0 => {
                    info!(
                        checked = summary.checked,
                        settled = summary.settled,
                        failed = summary.failed,
                        errors = summary.errors,
                        "Deposit poller pass"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Deposit poller pass failed: {}", e),
            }
        }
    })
}
