use anyhow::{Context, Result};
use ganamos_ledger::config::ServiceConfig;
use ganamos_ledger::interfaces::{
    build_lightning, build_store, http::run_http_interface, spawn_deposit_poller, AppState,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::from_env().context("Invalid service configuration")?;

    info!("🚀 Starting Ganamos ledger service");
    info!("📍 Listening on: {}", config.bind_addr);
    info!("⏱️  Invoice expiry: {}s", config.invoice_expiry_secs);
    if config.admin_api_key.is_none() {
        info!("🔒 ADMIN_API_KEY not set, admin endpoints are disabled");
    }

    let store = build_store(&config.backends)?;
    let lightning = build_lightning(&config.backends)?;
    let state = AppState::new(&config, store, lightning);

    if let Some(interval) = config.deposit_poll_interval {
        spawn_deposit_poller(state.wallet.clone(), interval);
    } else {
        info!("Deposit poller disabled");
    }

    run_http_interface(&config.bind_addr, state).await
}
